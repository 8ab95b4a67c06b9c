//! Market-hours gating and per-cycle health reporting

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::clock::now_ist;
use crate::models::{Bucket, CycleSnapshot, IndexSpec};
use crate::sinks::Point;

/// 09:15 IST
const MARKET_OPEN_SECS: u32 = 9 * 3600 + 15 * 60;
/// 15:30 IST, inclusive
const MARKET_CLOSE_SECS: u32 = 15 * 3600 + 30 * 60;

pub const PIPELINE_TICK: &str = "pipeline_tick";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Weekend,
    PreOpen,
    Open,
    Closed,
}

pub fn market_phase(now: DateTime<FixedOffset>) -> MarketPhase {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketPhase::Weekend;
    }
    let secs = now.num_seconds_from_midnight();
    if secs < MARKET_OPEN_SECS {
        MarketPhase::PreOpen
    } else if secs <= MARKET_CLOSE_SECS {
        MarketPhase::Open
    } else {
        MarketPhase::Closed
    }
}

/// Sleep until the session opens (or has already closed for the day)
pub async fn wait_until_open() -> MarketPhase {
    loop {
        let now = now_ist();
        match market_phase(now) {
            MarketPhase::Weekend => sleep(Duration::from_secs(60)).await,
            MarketPhase::PreOpen => {
                info!(now = %now.format("%H:%M:%S"), "⏳ Waiting for market open");
                sleep(Duration::from_secs(30)).await;
            }
            phase => {
                if phase == MarketPhase::Open {
                    info!("🔔 Market open");
                }
                return phase;
            }
        }
    }
}

/// Expected buckets that produced no legs this cycle
pub fn missing_buckets(snapshot: &CycleSnapshot) -> Vec<(&'static str, Bucket)> {
    let mut missing = Vec::new();
    for spec in IndexSpec::all() {
        let counts = snapshot.leg_counts(spec.name);
        for bucket in spec.buckets {
            if counts.get(bucket).copied().unwrap_or(0) == 0 {
                missing.push((spec.name, *bucket));
            }
        }
    }
    missing
}

/// Log observed vs expected leg counts per index; returns the missing count
pub fn log_completeness(snapshot: &CycleSnapshot) -> usize {
    for spec in IndexSpec::all() {
        let counts = snapshot.leg_counts(spec.name);
        let summary: Vec<String> = spec
            .buckets
            .iter()
            .map(|bucket| match counts.get(bucket).copied().unwrap_or(0) {
                0 => {
                    warn!(index = spec.name, %bucket, "Bucket missing legs this tick");
                    format!("{bucket}:0⚠")
                }
                n => format!("{bucket}:{n}"),
            })
            .collect();
        info!(index = spec.name, "buckets: {{{}}}", summary.join(", "));
    }
    missing_buckets(snapshot).len()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickStats {
    pub loop_duration: Duration,
    pub collect_duration: Duration,
    pub legs_written: usize,
    pub overview_written: usize,
}

pub fn pipeline_tick_point(env: &str, stats: &TickStats, timestamp: DateTime<FixedOffset>) -> Point {
    Point::new(PIPELINE_TICK, timestamp.timestamp_nanos_opt().unwrap_or_default())
        .tag("env", env)
        .tag("app", "logger")
        .float("loop_duration_ms", Some(stats.loop_duration.as_secs_f64() * 1000.0))
        .float("atm_collect_ms", Some(stats.collect_duration.as_secs_f64() * 1000.0))
        .int("records_written_atm_legs", Some(stats.legs_written as i64))
        .int(
            "records_written_index_overview",
            Some(stats.overview_written as i64),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LegRecord, OptionSide};
    use crate::sinks::FieldValue;
    use chrono::NaiveDate;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_market_phase() {
        // 2025-01-02 is a Thursday
        assert_eq!(market_phase(at("2025-01-02T09:14:59+05:30")), MarketPhase::PreOpen);
        assert_eq!(market_phase(at("2025-01-02T09:15:00+05:30")), MarketPhase::Open);
        assert_eq!(market_phase(at("2025-01-02T15:30:00+05:30")), MarketPhase::Open);
        assert_eq!(market_phase(at("2025-01-02T15:30:01+05:30")), MarketPhase::Closed);
        assert_eq!(market_phase(at("2025-01-04T11:00:00+05:30")), MarketPhase::Weekend);
        assert_eq!(market_phase(at("2025-01-05T12:00:00+05:30")), MarketPhase::Weekend);
    }

    fn leg(index: &str, bucket: Bucket, side: OptionSide) -> LegRecord {
        LegRecord {
            timestamp: at("2025-01-02T10:00:00+05:30"),
            index: index.into(),
            bucket,
            side,
            expiry: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
            atm_strike: 51200,
            last_price: None,
            days_to_expiry: 28,
            average_price: None,
            volume: None,
            oi: None,
            oi_open: None,
            oi_change: None,
            ohlc_open: None,
            ohlc_high: None,
            ohlc_low: None,
            ohlc_close: None,
            net_change: None,
            net_change_percent: None,
            day_change: None,
            day_change_percent: None,
            iv: None,
        }
    }

    #[test]
    fn test_missing_buckets() {
        let snapshot = CycleSnapshot {
            legs: vec![
                leg("BANKNIFTY", Bucket::ThisMonth, OptionSide::Call),
                leg("BANKNIFTY", Bucket::ThisMonth, OptionSide::Put),
                leg("BANKNIFTY", Bucket::NextMonth, OptionSide::Call),
                leg("BANKNIFTY", Bucket::NextMonth, OptionSide::Put),
            ],
            ..Default::default()
        };

        let missing = missing_buckets(&snapshot);
        assert_eq!(missing.len(), 8);
        assert!(missing.contains(&("NIFTY", Bucket::ThisWeek)));
        assert!(missing.contains(&("SENSEX", Bucket::NextMonth)));
        assert!(!missing.iter().any(|(index, _)| *index == "BANKNIFTY"));
        assert_eq!(log_completeness(&snapshot), 8);
    }

    #[test]
    fn test_pipeline_tick_point() {
        let stats = TickStats {
            loop_duration: Duration::from_millis(1500),
            collect_duration: Duration::from_millis(1200),
            legs_written: 20,
            overview_written: 3,
        };
        let point = pipeline_tick_point("prod", &stats, at("2025-01-02T10:00:00+05:30"));

        assert_eq!(point.measurement, PIPELINE_TICK);
        assert_eq!(point.tags["env"], "prod");
        assert_eq!(point.fields["loop_duration_ms"], FieldValue::Float(1500.0));
        assert_eq!(point.fields["records_written_atm_legs"], FieldValue::Int(20));
    }
}
