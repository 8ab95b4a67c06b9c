//! One collection cycle over every index
//!
//! Per index: spot → ATM strike → bucket expiries → call/put contracts → one
//! joint quote per bucket → baselines → derived fields → sinks. A missing
//! spot skips the index; a missing expiry or contract skips the bucket.
//! Nothing here aborts the cycle.

use chrono::{DateTime, FixedOffset, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::baseline::{aggregate_iv_key, drift, oi_drift};
use super::derive::{
    atm_strike, average_iv, change, days_to_expiry, pcr, percent_change, total_premium,
};
use super::{contracts, ExpiryResolver, ResilientCaller, SessionBaselines, Universes};
use crate::clock::{cycle_stamp, now_ist, rounded_half_minute};
use crate::kite::MarketDataApi;
use crate::models::{
    Bucket, CycleSnapshot, IndexOverview, IndexSpec, LegRecord, OptionSide, OverviewAggregate,
    Quote,
};
use crate::sinks::SinkFanout;

/// Cycle-wide values shared by every record
struct CycleContext {
    stamp: String,
    timestamp: DateTime<FixedOffset>,
    today: NaiveDate,
}

pub struct SnapshotAggregator {
    api: Arc<dyn MarketDataApi>,
    caller: ResilientCaller,
    universes: Universes,
    expiries: ExpiryResolver,
    baselines: SessionBaselines,
    sinks: SinkFanout,
}

impl SnapshotAggregator {
    /// Loads both instrument universes once for the session
    pub async fn new(
        api: Arc<dyn MarketDataApi>,
        caller: ResilientCaller,
        expiries: ExpiryResolver,
        sinks: SinkFanout,
    ) -> Self {
        let universes = Universes::load(api.as_ref(), &caller).await;
        Self::with_universes(api, caller, universes, expiries, sinks)
    }

    pub fn with_universes(
        api: Arc<dyn MarketDataApi>,
        caller: ResilientCaller,
        universes: Universes,
        expiries: ExpiryResolver,
        sinks: SinkFanout,
    ) -> Self {
        Self {
            api,
            caller,
            universes,
            expiries,
            baselines: SessionBaselines::new(),
            sinks,
        }
    }

    pub fn universes(&self) -> &Universes {
        &self.universes
    }

    pub fn baselines(&self) -> &SessionBaselines {
        &self.baselines
    }

    pub fn sinks(&self) -> &SinkFanout {
        &self.sinks
    }

    pub async fn collect(&mut self) -> CycleSnapshot {
        self.collect_at(now_ist()).await
    }

    pub async fn collect_at(&mut self, now: DateTime<FixedOffset>) -> CycleSnapshot {
        let ctx = CycleContext {
            stamp: cycle_stamp(now),
            timestamp: rounded_half_minute(now),
            today: now.date_naive(),
        };
        let mut snapshot = CycleSnapshot::default();

        for spec in IndexSpec::all() {
            let Some(spot) = self.spot_price(&spec).await else {
                warn!(index = spec.name, "Spot price unavailable, skipping index");
                continue;
            };
            let Some(atm) = atm_strike(spot, spec.step) else {
                warn!(index = spec.name, spot, "Spot price out of strike range, skipping index");
                continue;
            };
            debug!(index = spec.name, spot, atm, "Resolved ATM strike");

            let overview = self.collect_index(&spec, atm, &ctx, &mut snapshot.legs).await;
            self.sinks
                .persist_overview(spec.name, &overview, &ctx.timestamp)
                .await;
            snapshot
                .overview_aggregates
                .insert(spec.name.to_string(), overview);
        }

        info!(
            cycle = %ctx.stamp,
            legs = snapshot.legs.len(),
            indices = snapshot.overview_aggregates.len(),
            "Collection cycle complete"
        );
        snapshot
    }

    async fn spot_price(&self, spec: &IndexSpec) -> Option<f64> {
        let symbols = [spec.spot_symbol.to_string()];
        let api = self.api.as_ref();
        let quotes = self
            .caller
            .call("quote/spot", || api.quote(&symbols))
            .await?;
        quotes.get(spec.spot_symbol).and_then(|q| q.last_price)
    }

    /// Expiry date per configured bucket, by position in the resolver output
    fn bucket_expiries(
        &self,
        spec: &IndexSpec,
        atm: i64,
        today: NaiveDate,
    ) -> Vec<(Bucket, Option<NaiveDate>)> {
        let wants_weekly = spec
            .buckets
            .iter()
            .any(|b| matches!(b, Bucket::ThisWeek | Bucket::NextWeek));
        let weekly = if wants_weekly {
            self.expiries
                .weekly_expiries(&self.universes, spec.name, atm, today)
        } else {
            Vec::new()
        };
        let (this_month, next_month) =
            self.expiries
                .monthly_expiries(&self.universes, spec.name, atm, today);

        spec.buckets
            .iter()
            .map(|bucket| {
                let expiry = match bucket {
                    Bucket::ThisWeek => weekly.first().copied(),
                    Bucket::NextWeek => weekly.get(1).copied(),
                    Bucket::ThisMonth => this_month,
                    Bucket::NextMonth => next_month,
                };
                (*bucket, expiry)
            })
            .collect()
    }

    async fn collect_index(
        &mut self,
        spec: &IndexSpec,
        atm: i64,
        ctx: &CycleContext,
        legs: &mut Vec<LegRecord>,
    ) -> IndexOverview {
        let mut overview = IndexOverview::new();

        for (bucket, expiry) in self.bucket_expiries(spec, atm, ctx.today) {
            let Some(expiry) = expiry else {
                debug!(index = spec.name, %bucket, "No expiry for bucket");
                continue;
            };
            let pool = self.universes.pool(spec.universe);
            let Some(pair) = contracts::resolve(pool, spec.name, atm, expiry) else {
                debug!(index = spec.name, %bucket, %expiry, atm, "ATM contracts not found");
                continue;
            };

            let ids = [pair.call.clone(), pair.put.clone()];
            let api = self.api.as_ref();
            let quotes = self
                .caller
                .call("quote/atm", || api.quote(&ids))
                .await
                .unwrap_or_default();

            let (aggregate, bucket_legs) =
                self.process_bucket(spec, bucket, atm, expiry, &pair.call, &pair.put, &quotes, ctx);

            for leg in bucket_legs {
                self.sinks.persist(&leg, &ctx.stamp).await;
                legs.push(leg);
            }
            overview.insert(bucket, aggregate);
        }

        overview
    }

    #[allow(clippy::too_many_arguments)]
    fn process_bucket(
        &mut self,
        spec: &IndexSpec,
        bucket: Bucket,
        atm: i64,
        expiry: NaiveDate,
        call_id: &str,
        put_id: &str,
        quotes: &HashMap<String, Quote>,
        ctx: &CycleContext,
    ) -> (OverviewAggregate, Vec<LegRecord>) {
        let unavailable = Quote::default();
        let call = quotes.get(call_id).unwrap_or(&unavailable);
        let put = quotes.get(put_id).unwrap_or(&unavailable);

        let mut oi_open = [None, None];
        for (slot, (id, quote)) in oi_open.iter_mut().zip([(call_id, call), (put_id, put)]) {
            *slot = self.baselines.observe_oi(id, quote.oi);
            self.baselines.observe_iv(id, quote.iv);
        }

        let atm_iv = average_iv(call.iv, put.iv);
        let iv_open = self
            .baselines
            .observe_aggregate_iv(&aggregate_iv_key(spec.name, bucket.label()), atm_iv);
        let dte = days_to_expiry(expiry, ctx.today);

        let aggregate = OverviewAggregate {
            total_premium: total_premium(call.last_price, put.last_price),
            oi_call: call.oi,
            oi_put: put.oi,
            pcr: pcr(call.oi, put.oi),
            atm_iv,
            iv_open,
            iv_day_change: drift(iv_open, atm_iv),
            days_to_expiry: dte,
        };

        let legs = [
            (OptionSide::Call, call, oi_open[0]),
            (OptionSide::Put, put, oi_open[1]),
        ]
        .into_iter()
        .map(|(side, quote, oi_open)| LegRecord {
            timestamp: ctx.timestamp,
            index: spec.name.to_string(),
            bucket,
            side,
            expiry,
            atm_strike: atm,
            last_price: quote.last_price,
            days_to_expiry: dte,
            average_price: quote.average_price,
            volume: quote.volume,
            oi: quote.oi,
            oi_open,
            oi_change: oi_drift(oi_open, quote.oi),
            ohlc_open: quote.ohlc.open,
            ohlc_high: quote.ohlc.high,
            ohlc_low: quote.ohlc.low,
            ohlc_close: quote.ohlc.close,
            net_change: change(quote.last_price, quote.ohlc.close),
            net_change_percent: percent_change(quote.last_price, quote.ohlc.close),
            day_change: change(quote.last_price, quote.ohlc.open),
            day_change_percent: percent_change(quote.last_price, quote.ohlc.open),
            iv: quote.iv,
        })
        .collect();

        debug!(
            index = spec.name,
            %bucket,
            %expiry,
            tp = aggregate.total_premium,
            pcr = ?aggregate.pcr,
            "Bucket aggregated"
        );
        (aggregate, legs)
    }
}
