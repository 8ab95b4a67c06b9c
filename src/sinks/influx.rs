//! InfluxDB v2 line-protocol writer and point mappings

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

use super::{Point, TimeSeriesWriter};
use crate::config::InfluxConfig;
use crate::models::{IndexOverview, LegRecord};

pub const ATM_OPTION_QUOTE: &str = "atm_option_quote";
pub const INDEX_OVERVIEW: &str = "index_overview";

pub struct InfluxWriter {
    client: Client,
    write_url: String,
    org: String,
    bucket: String,
    token: Option<String>,
}

impl InfluxWriter {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build InfluxDB HTTP client")?;

        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesWriter for InfluxWriter {
    async fn write(&self, point: &Point) -> Result<()> {
        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol());

        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = request.send().await.context("InfluxDB write request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("InfluxDB write returned {}: {}", status, body.trim()));
        }

        debug!(measurement = %point.measurement, "Wrote point");
        Ok(())
    }
}

fn timestamp_ns(ts: &DateTime<FixedOffset>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or_default()
}

/// `atm_option_quote` point for one leg; `None` when no field is available
pub fn atm_leg_point(leg: &LegRecord) -> Option<Point> {
    let point = Point::new(ATM_OPTION_QUOTE, timestamp_ns(&leg.timestamp))
        .tag("index", leg.index.as_str())
        .tag("option_type", leg.side.exchange_code())
        .tag("expiration", leg.expiry.to_string())
        .tag("strike", leg.atm_strike.to_string())
        .tag("bucket", leg.bucket.label())
        .float("last_price", leg.last_price)
        .float("average_price", leg.average_price)
        .float("ohlc_open", leg.ohlc_open)
        .float("ohlc_high", leg.ohlc_high)
        .float("ohlc_low", leg.ohlc_low)
        .float("ohlc_close", leg.ohlc_close)
        .float("net_change", leg.net_change)
        .float("net_change_percent", leg.net_change_percent)
        .float("day_change", leg.day_change)
        .float("day_change_percent", leg.day_change_percent)
        .float("iv", leg.iv)
        .int("volume", leg.volume)
        .int("oi", leg.oi)
        .int("oi_open", leg.oi_open)
        .int("oi_change", leg.oi_change)
        .int("days_to_expiry", Some(leg.days_to_expiry))
        .int("atm_strike_val", Some(leg.atm_strike));

    point.has_fields().then_some(point)
}

/// `index_overview` point carrying every bucket aggregate of one index
pub fn index_overview_point(
    index: &str,
    overview: &IndexOverview,
    timestamp: &DateTime<FixedOffset>,
) -> Option<Point> {
    let mut point = Point::new(INDEX_OVERVIEW, timestamp_ns(timestamp)).tag("index", index);

    for (bucket, agg) in overview {
        let b = bucket.label();
        point = point
            .float(format!("{b}_TP"), Some(agg.total_premium))
            .float(format!("{b}_OI_CALL"), agg.oi_call.map(|v| v as f64))
            .float(format!("{b}_OI_PUT"), agg.oi_put.map(|v| v as f64))
            .float(format!("pcr_{b}"), agg.pcr)
            .float(format!("{b}_atm_iv"), agg.atm_iv)
            .float(format!("{b}_iv_open"), agg.iv_open)
            .float(format!("{b}_iv_day_change"), agg.iv_day_change)
            .int(format!("{b}_days_to_expiry"), Some(agg.days_to_expiry));
    }

    point.has_fields().then_some(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bucket, OptionSide, OverviewAggregate};
    use crate::sinks::FieldValue;
    use chrono::NaiveDate;

    fn leg() -> LegRecord {
        LegRecord {
            timestamp: DateTime::parse_from_rfc3339("2025-01-02T09:30:00+05:30").unwrap(),
            index: "NIFTY".into(),
            bucket: Bucket::ThisWeek,
            side: OptionSide::Put,
            expiry: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            atm_strike: 24800,
            last_price: Some(95.25),
            days_to_expiry: 7,
            average_price: None,
            volume: Some(50000),
            oi: Some(1200),
            oi_open: Some(1200),
            oi_change: Some(0),
            ohlc_open: None,
            ohlc_high: None,
            ohlc_low: None,
            ohlc_close: None,
            net_change: None,
            net_change_percent: None,
            day_change: None,
            day_change_percent: None,
            iv: Some(13.5),
        }
    }

    #[test]
    fn test_atm_leg_point() {
        let point = atm_leg_point(&leg()).unwrap();
        assert_eq!(point.measurement, ATM_OPTION_QUOTE);
        assert_eq!(point.tags["option_type"], "PE");
        assert_eq!(point.tags["expiration"], "2025-01-09");
        assert_eq!(point.tags["strike"], "24800");
        assert_eq!(point.tags["bucket"], "this_week");
        assert_eq!(point.fields["last_price"], FieldValue::Float(95.25));
        assert_eq!(point.fields["oi"], FieldValue::Int(1200));
        assert_eq!(point.fields["atm_strike_val"], FieldValue::Int(24800));
        assert!(!point.fields.contains_key("net_change"));
        assert!(!point.fields.contains_key("average_price"));
        assert_eq!(
            point.timestamp_ns,
            leg().timestamp.timestamp_nanos_opt().unwrap()
        );
    }

    #[test]
    fn test_index_overview_point() {
        let mut overview = IndexOverview::new();
        overview.insert(
            Bucket::ThisWeek,
            OverviewAggregate {
                total_premium: 215.75,
                oi_call: Some(1000),
                oi_put: Some(1200),
                pcr: Some(1.2),
                atm_iv: None,
                iv_open: None,
                iv_day_change: None,
                days_to_expiry: 7,
            },
        );
        let ts = DateTime::parse_from_rfc3339("2025-01-02T09:30:00+05:30").unwrap();
        let point = index_overview_point("NIFTY", &overview, &ts).unwrap();

        assert_eq!(point.tags["index"], "NIFTY");
        assert_eq!(point.fields["this_week_TP"], FieldValue::Float(215.75));
        assert_eq!(point.fields["this_week_OI_CALL"], FieldValue::Float(1000.0));
        assert_eq!(point.fields["pcr_this_week"], FieldValue::Float(1.2));
        assert_eq!(point.fields["this_week_days_to_expiry"], FieldValue::Int(7));
        assert!(!point.fields.contains_key("this_week_atm_iv"));

        assert!(index_overview_point("NIFTY", &IndexOverview::new(), &ts).is_none());
    }

}
