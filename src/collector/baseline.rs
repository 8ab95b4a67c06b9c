//! Session-open baselines
//!
//! The first numeric value seen for a key in this process becomes its baseline
//! and never changes. Nothing is persisted; a restart starts a new session.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SessionBaselines {
    oi_open: HashMap<String, i64>,
    iv_open: HashMap<String, f64>,
    aggregate_iv_open: HashMap<String, f64>,
}

impl SessionBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_oi(&mut self, contract: &str, oi: Option<i64>) -> Option<i64> {
        first_wins(&mut self.oi_open, contract, oi)
    }

    pub fn observe_iv(&mut self, contract: &str, iv: Option<f64>) -> Option<f64> {
        first_wins(&mut self.iv_open, contract, iv)
    }

    /// Averaged straddle IV, keyed by [`aggregate_iv_key`]
    pub fn observe_aggregate_iv(&mut self, key: &str, iv: Option<f64>) -> Option<f64> {
        first_wins(&mut self.aggregate_iv_open, key, iv)
    }

    pub fn oi_open(&self, contract: &str) -> Option<i64> {
        self.oi_open.get(contract).copied()
    }

    pub fn iv_open(&self, contract: &str) -> Option<f64> {
        self.iv_open.get(contract).copied()
    }

    pub fn len(&self) -> usize {
        self.oi_open.len() + self.iv_open.len() + self.aggregate_iv_open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn first_wins<T: Copy>(map: &mut HashMap<String, T>, key: &str, value: Option<T>) -> Option<T> {
    if let Some(existing) = map.get(key) {
        return Some(*existing);
    }
    let value = value?;
    map.insert(key.to_string(), value);
    Some(value)
}

pub fn aggregate_iv_key(index: &str, bucket: &str) -> String {
    format!("{index}_{bucket}_iv_open")
}

/// `baseline − current`; positive means the value has fallen since the open
pub fn drift(baseline: Option<f64>, current: Option<f64>) -> Option<f64> {
    Some(baseline? - current?)
}

/// Open-interest drift; unavailable when the difference does not fit an `i64`
pub fn oi_drift(baseline: Option<i64>, current: Option<i64>) -> Option<i64> {
    baseline?.checked_sub(current?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_wins() {
        let mut baselines = SessionBaselines::new();
        assert_eq!(baselines.observe_oi("123", Some(1000)), Some(1000));
        assert_eq!(baselines.observe_oi("123", Some(1500)), Some(1000));
        assert_eq!(baselines.oi_open("123"), Some(1000));

        assert_eq!(baselines.observe_iv("123", Some(14.2)), Some(14.2));
        assert_eq!(baselines.observe_iv("123", Some(13.0)), Some(14.2));
    }

    #[test]
    fn test_unavailable_values_do_not_seed() {
        let mut baselines = SessionBaselines::new();
        assert_eq!(baselines.observe_oi("123", None), None);
        assert!(baselines.is_empty());

        assert_eq!(baselines.observe_oi("123", Some(900)), Some(900));
        // Later gaps return the stored baseline
        assert_eq!(baselines.observe_oi("123", None), Some(900));
    }

    #[test]
    fn test_aggregate_keys_are_separate() {
        let mut baselines = SessionBaselines::new();
        let key = aggregate_iv_key("NIFTY", "this_week");
        assert_eq!(key, "NIFTY_this_week_iv_open");

        assert_eq!(baselines.observe_aggregate_iv(&key, Some(12.5)), Some(12.5));
        assert_eq!(baselines.observe_aggregate_iv(&key, Some(11.0)), Some(12.5));
        assert_eq!(baselines.iv_open(&key), None);
        assert_eq!(baselines.len(), 1);
    }

    #[test]
    fn test_drift_sign() {
        assert_eq!(oi_drift(Some(1000), Some(1200)), Some(-200));
        assert_eq!(drift(Some(15.0), Some(12.0)), Some(3.0));
        assert_eq!(oi_drift(None, Some(1)), None);
        assert_eq!(drift(Some(1.0), None), None);
    }

    #[test]
    fn test_oi_drift_out_of_range() {
        assert_eq!(oi_drift(Some(i64::MIN), Some(1)), None);
        assert_eq!(oi_drift(Some(i64::MAX), Some(-1)), None);
        assert_eq!(oi_drift(Some(0), Some(i64::MAX)), Some(-i64::MAX));
    }
}
