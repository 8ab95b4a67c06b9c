use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Option side as the collector reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Call => "CALL",
            OptionSide::Put => "PUT",
        }
    }

    /// Exchange instrument-type code (`CE` / `PE`)
    pub fn exchange_code(&self) -> &'static str {
        match self {
            OptionSide::Call => "CE",
            OptionSide::Put => "PE",
        }
    }

    pub fn from_exchange_code(code: &str) -> Option<Self> {
        match code {
            "CE" => Some(OptionSide::Call),
            "PE" => Some(OptionSide::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named expiry grouping sampled every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    ThisWeek,
    NextWeek,
    ThisMonth,
    NextMonth,
}

impl Bucket {
    pub const WEEKLY_AND_MONTHLY: &'static [Bucket] = &[
        Bucket::ThisWeek,
        Bucket::NextWeek,
        Bucket::ThisMonth,
        Bucket::NextMonth,
    ];
    pub const MONTHLY_ONLY: &'static [Bucket] = &[Bucket::ThisMonth, Bucket::NextMonth];

    pub fn label(&self) -> &'static str {
        match self {
            Bucket::ThisWeek => "this_week",
            Bucket::NextWeek => "next_week",
            Bucket::ThisMonth => "this_month",
            Bucket::NextMonth => "next_month",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derivatives segment an instrument universe is downloaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// NSE futures & options
    Nfo,
    /// BSE futures & options
    Bfo,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nfo => "NFO",
            Exchange::Bfo => "BFO",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of an index underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub spot_symbol: &'static str,
    pub step: i64,
    pub universe: Exchange,
    pub buckets: &'static [Bucket],
}

impl IndexSpec {
    pub const NIFTY: IndexSpec = IndexSpec {
        name: "NIFTY",
        spot_symbol: "NSE:NIFTY 50",
        step: 50,
        universe: Exchange::Nfo,
        buckets: Bucket::WEEKLY_AND_MONTHLY,
    };
    pub const SENSEX: IndexSpec = IndexSpec {
        name: "SENSEX",
        spot_symbol: "BSE:SENSEX",
        step: 100,
        universe: Exchange::Bfo,
        buckets: Bucket::WEEKLY_AND_MONTHLY,
    };
    pub const BANKNIFTY: IndexSpec = IndexSpec {
        name: "BANKNIFTY",
        spot_symbol: "NSE:NIFTY BANK",
        step: 100,
        universe: Exchange::Nfo,
        buckets: Bucket::MONTHLY_ONLY,
    };

    /// Indices in the order every cycle visits them
    pub fn all() -> [IndexSpec; 3] {
        [Self::NIFTY, Self::SENSEX, Self::BANKNIFTY]
    }
}

/// One row of a broker instrument universe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub token: String,
    pub trading_symbol: String,
    /// Underlying name, e.g. "NIFTY"
    pub name: String,
    pub exchange: String,
    pub segment: String,
    pub strike: f64,
    /// Raw instrument type (`CE`, `PE`, `FUT`, `EQ`, ...)
    pub instrument_type: String,
    pub expiry: Option<NaiveDate>,
}

impl Instrument {
    pub fn is_option(&self) -> bool {
        self.segment.ends_with("-OPT")
    }

    pub fn side(&self) -> Option<OptionSide> {
        OptionSide::from_exchange_code(&self.instrument_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub close: Option<f64>,
}

/// Market quote for a single instrument.
///
/// Every field is optional: a field that is missing and a field carrying a
/// non-numeric value both decode to `None`. Open interest is only accepted as
/// an integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub volume: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub oi: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_ohlc")]
    pub ohlc: Ohlc,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()).filter(|v| v.is_finite()))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64()))
}

// Volume is reported as an integer but some feeds send whole floats.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
    }))
}

fn lenient_ohlc<'de, D>(deserializer: D) -> Result<Ohlc, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(v @ serde_json::Value::Object(_)) => serde_json::from_value(v).unwrap_or_default(),
        _ => Ohlc::default(),
    })
}

/// Call/put instrument tokens for one (index, strike, expiry)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractPair {
    pub call: String,
    pub put: String,
}

/// One side of the ATM straddle for one bucket in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub index: String,
    pub bucket: Bucket,
    pub side: OptionSide,
    pub expiry: NaiveDate,
    pub atm_strike: i64,
    pub last_price: Option<f64>,
    pub days_to_expiry: i64,
    pub average_price: Option<f64>,
    pub volume: Option<i64>,
    pub oi: Option<i64>,
    pub oi_open: Option<i64>,
    pub oi_change: Option<i64>,
    #[serde(rename = "ohlc.open")]
    pub ohlc_open: Option<f64>,
    #[serde(rename = "ohlc.high")]
    pub ohlc_high: Option<f64>,
    #[serde(rename = "ohlc.low")]
    pub ohlc_low: Option<f64>,
    #[serde(rename = "ohlc.close")]
    pub ohlc_close: Option<f64>,
    pub net_change: Option<f64>,
    pub net_change_percent: Option<f64>,
    pub day_change: Option<f64>,
    pub day_change_percent: Option<f64>,
    pub iv: Option<f64>,
}

/// Bucket-level straddle analytics derived from both legs of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewAggregate {
    /// Total premium: sum of the numeric leg last prices
    #[serde(rename = "TP")]
    pub total_premium: f64,
    #[serde(rename = "OI_CALL")]
    pub oi_call: Option<i64>,
    #[serde(rename = "OI_PUT")]
    pub oi_put: Option<i64>,
    #[serde(rename = "PCR")]
    pub pcr: Option<f64>,
    pub atm_iv: Option<f64>,
    pub iv_open: Option<f64>,
    pub iv_day_change: Option<f64>,
    pub days_to_expiry: i64,
}

pub type IndexOverview = BTreeMap<Bucket, OverviewAggregate>;

/// Everything a single collection cycle produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSnapshot {
    pub legs: Vec<LegRecord>,
    pub overview_aggregates: BTreeMap<String, IndexOverview>,
}

impl CycleSnapshot {
    /// Leg count per bucket for one index
    pub fn leg_counts(&self, index: &str) -> BTreeMap<Bucket, usize> {
        let mut counts = BTreeMap::new();
        for leg in self.legs.iter().filter(|leg| leg.index == index) {
            *counts.entry(leg.bucket).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_non_numeric_fields_are_unavailable() {
        let raw = r#"{
            "last_price": "n/a",
            "average_price": 101.5,
            "volume": 1200.0,
            "oi": 1500.5,
            "iv": null,
            "ohlc": {"open": 99, "high": "x", "close": 0}
        }"#;
        let quote: Quote = serde_json::from_str(raw).unwrap();

        assert_eq!(quote.last_price, None);
        assert_eq!(quote.average_price, Some(101.5));
        assert_eq!(quote.volume, Some(1200));
        assert_eq!(quote.oi, None);
        assert_eq!(quote.iv, None);
        assert_eq!(quote.ohlc.open, Some(99.0));
        assert_eq!(quote.ohlc.high, None);
        assert_eq!(quote.ohlc.low, None);
        assert_eq!(quote.ohlc.close, Some(0.0));
    }

    #[test]
    fn test_quote_missing_ohlc_block() {
        let quote: Quote = serde_json::from_str(r#"{"last_price": 10, "ohlc": "bad"}"#).unwrap();
        assert_eq!(quote.last_price, Some(10.0));
        assert_eq!(quote.ohlc, Ohlc::default());

        let empty: Quote = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Quote::default());
    }

    #[test]
    fn test_leg_record_uses_dotted_ohlc_keys() {
        let leg = LegRecord {
            timestamp: DateTime::parse_from_rfc3339("2025-01-02T09:30:00+05:30").unwrap(),
            index: "NIFTY".into(),
            bucket: Bucket::ThisWeek,
            side: OptionSide::Call,
            expiry: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            atm_strike: 24800,
            last_price: Some(120.5),
            days_to_expiry: 7,
            average_price: None,
            volume: None,
            oi: Some(1000),
            oi_open: Some(1000),
            oi_change: Some(0),
            ohlc_open: Some(110.0),
            ohlc_high: None,
            ohlc_low: None,
            ohlc_close: None,
            net_change: None,
            net_change_percent: None,
            day_change: Some(10.5),
            day_change_percent: None,
            iv: None,
        };
        let json = serde_json::to_value(&leg).unwrap();
        assert_eq!(json["ohlc.open"], 110.0);
        assert_eq!(json["bucket"], "this_week");
        assert_eq!(json["side"], "CALL");
        assert_eq!(json["expiry"], "2025-01-09");
        assert!(json["net_change"].is_null());
    }

    #[test]
    fn test_index_table() {
        let names: Vec<&str> = IndexSpec::all().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["NIFTY", "SENSEX", "BANKNIFTY"]);
        assert_eq!(IndexSpec::BANKNIFTY.buckets, Bucket::MONTHLY_ONLY);
        assert_eq!(IndexSpec::SENSEX.universe, Exchange::Bfo);
    }
}
