//! Writes each record to every configured sink
//!
//! Failures are logged here and go no further; one sink failing never stops
//! the other, and nothing is propagated to the collector.

use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use tracing::{debug, warn};

use super::influx::{atm_leg_point, index_overview_point};
use super::{Point, SnapshotFileSink, TimeSeriesWriter};
use crate::models::{IndexOverview, LegRecord};

pub struct SinkFanout {
    files: SnapshotFileSink,
    series: Option<Arc<dyn TimeSeriesWriter>>,
}

impl SinkFanout {
    pub fn new(files: SnapshotFileSink, series: Option<Arc<dyn TimeSeriesWriter>>) -> Self {
        Self { files, series }
    }

    pub fn has_time_series(&self) -> bool {
        self.series.is_some()
    }

    pub async fn persist(&self, leg: &LegRecord, cycle_stamp: &str) {
        match self.files.write(leg, cycle_stamp).await {
            Ok(path) => debug!(path = %path.display(), "Saved leg snapshot"),
            Err(e) => warn!(
                index = %leg.index,
                bucket = %leg.bucket,
                side = %leg.side,
                error = %e,
                "Snapshot file write failed"
            ),
        }

        if let Some(point) = atm_leg_point(leg) {
            self.write_point(&point).await;
        }
    }

    pub async fn persist_overview(
        &self,
        index: &str,
        overview: &IndexOverview,
        timestamp: &DateTime<FixedOffset>,
    ) {
        if let Some(point) = index_overview_point(index, overview, timestamp) {
            self.write_point(&point).await;
        }
    }

    /// Time-series only; a no-op without a configured writer
    pub async fn write_point(&self, point: &Point) {
        let Some(series) = &self.series else {
            return;
        };
        if let Err(e) = series.write(point).await {
            warn!(measurement = %point.measurement, error = %e, "Time-series write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bucket, OptionSide};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        points: Mutex<Vec<Point>>,
        fail: bool,
    }

    #[async_trait]
    impl TimeSeriesWriter for RecordingWriter {
        async fn write(&self, point: &Point) -> Result<()> {
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            self.points.lock().push(point.clone());
            Ok(())
        }
    }

    fn leg() -> LegRecord {
        LegRecord {
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

    #[tokio::test]
    async fn test_persist_writes_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(RecordingWriter::default());
        let fanout = SinkFanout::new(SnapshotFileSink::new(dir.path()), Some(writer.clone()));

        fanout.persist(&leg(), "20250102_093000").await;

        assert!(dir
            .path()
            .join("this_week/NIFTY_CALL_this_week_2025-01-09_20250102_093000.json")
            .exists());
        let points = writer.points.lock();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "atm_option_quote");
    }

    #[tokio::test]
    async fn test_file_failure_does_not_block_time_series() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();

        let writer = Arc::new(RecordingWriter::default());
        let fanout = SinkFanout::new(SnapshotFileSink::new(&blocker), Some(writer.clone()));

        fanout.persist(&leg(), "20250102_093000").await;
        assert_eq!(writer.points.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_time_series_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let fanout = SinkFanout::new(SnapshotFileSink::new(dir.path()), Some(writer));

        fanout.persist(&leg(), "20250102_093000").await;
        assert!(dir.path().join("this_week").is_dir());
    }

    #[tokio::test]
    async fn test_files_only_without_time_series() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = SinkFanout::new(SnapshotFileSink::new(dir.path()), None);
        assert!(!fanout.has_time_series());

        fanout.persist(&leg(), "20250102_093000").await;
        assert!(dir.path().join("this_week").is_dir());
    }
}
