//! Persistence targets for collected legs
//!
//! Two sinks: pretty-printed JSON snapshot files and a time-series store fed
//! with tagged points. [`SinkFanout`] writes every record to both and keeps
//! their failures apart.

pub mod fanout;
pub mod influx;
pub mod snapshot_file;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub use fanout::SinkFanout;
pub use influx::InfluxWriter;
pub use snapshot_file::SnapshotFileSink;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
}

/// One time-series sample: measurement + tags + typed fields at a ns timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp_ns: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a float field; unavailable and non-finite values are dropped
    pub fn float(mut self, key: impl Into<String>, value: Option<f64>) -> Self {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.fields.insert(key.into(), FieldValue::Float(v));
        }
        self
    }

    /// Adds an integer field; unavailable values are dropped
    pub fn int(mut self, key: impl Into<String>, value: Option<i64>) -> Self {
        if let Some(v) = value {
            self.fields.insert(key.into(), FieldValue::Int(v));
        }
        self
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Influx line protocol, tags and fields in key order
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| {
                let key = escape(key, &[',', '=', ' ']);
                match value {
                    FieldValue::Float(v) => format!("{key}={v}"),
                    FieldValue::Int(v) => format!("{key}={v}i"),
                }
            })
            .collect();

        let _ = write!(line, " {} {}", fields.join(","), self.timestamp_ns);
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
pub trait TimeSeriesWriter: Send + Sync {
    async fn write(&self, point: &Point) -> Result<()>;
}
