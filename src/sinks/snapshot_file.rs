//! Raw JSON snapshot files, one per leg per cycle

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

use crate::models::LegRecord;

#[derive(Debug, Clone)]
pub struct SnapshotFileSink {
    root: PathBuf,
}

impl SnapshotFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{bucket}/{index}_{side}_{bucket}_{expiry}_{cycle_stamp}.json`
    pub fn path_for(&self, leg: &LegRecord, cycle_stamp: &str) -> PathBuf {
        let bucket = leg.bucket.label();
        self.root.join(bucket).join(format!(
            "{}_{}_{}_{}_{}.json",
            leg.index, leg.side, bucket, leg.expiry, cycle_stamp
        ))
    }

    pub async fn write(&self, leg: &LegRecord, cycle_stamp: &str) -> Result<PathBuf> {
        let path = self.path_for(leg, cycle_stamp);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(leg).context("Failed to serialize leg record")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
