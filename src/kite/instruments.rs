//! Kite instrument dump (`GET /instruments/{exchange}`) decoding

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::Instrument;

/// Raw CSV row; unused columns (exchange_token, tick_size, ...) are skipped
#[derive(Debug, Deserialize)]
struct KiteInstrumentCsv {
    instrument_token: String,
    tradingsymbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    expiry: String,
    #[serde(default)]
    strike: Option<f64>,
    #[serde(default)]
    instrument_type: String,
    #[serde(default)]
    segment: String,
    #[serde(default)]
    exchange: String,
}

impl From<KiteInstrumentCsv> for Instrument {
    fn from(row: KiteInstrumentCsv) -> Self {
        Instrument {
            token: row.instrument_token,
            trading_symbol: row.tradingsymbol,
            name: row.name,
            exchange: row.exchange,
            segment: row.segment,
            strike: row.strike.unwrap_or(0.0),
            instrument_type: row.instrument_type,
            expiry: parse_expiry(&row.expiry),
        }
    }
}

/// Parse an ISO `YYYY-MM-DD` expiry; blank or malformed values yield `None`
pub fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Decode an instrument dump, skipping rows that fail to parse
pub fn parse_instruments_csv(data: &str) -> Vec<Instrument> {
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    let mut instruments = Vec::new();
    let mut error_count = 0usize;

    for result in reader.deserialize::<KiteInstrumentCsv>() {
        match result {
            Ok(row) => instruments.push(row.into()),
            Err(e) => {
                error_count += 1;
                if error_count <= 10 {
                    warn!(error = %e, "Failed to parse instrument CSV row");
                }
            }
        }
    }

    if error_count > 0 {
        warn!("Total instrument CSV parse errors: {}", error_count);
    }
    debug!("Parsed {} instruments from CSV", instruments.len());
    instruments
}
