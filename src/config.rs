use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::RetryPolicy;
use crate::kite::client::KITE_API_BASE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub kite_api_key: String,
    pub kite_access_token: Option<String>,
    /// Shell command printing a fresh access token
    pub kite_login_cmd: Option<String>,
    pub kite_api_base: String,
    pub raw_snapshot_dir: PathBuf,
    pub use_dynamic_expiries: bool,
    pub loop_interval: Duration,
    pub retry: RetryPolicy,
    pub influx: Option<InfluxConfig>,
    pub app_env: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let kite_api_key = std::env::var("KITE_API_KEY").context("KITE_API_KEY is not set")?;

        let kite_access_token = non_empty_var("KITE_ACCESS_TOKEN");
        let kite_login_cmd = non_empty_var("KITE_LOGIN_CMD");

        let kite_api_base =
            std::env::var("KITE_API_BASE").unwrap_or_else(|_| KITE_API_BASE.to_string());

        let raw_snapshot_dir: PathBuf = std::env::var("RAW_SNAPSHOT_DIR")
            .unwrap_or_else(|_| "data/raw_snapshots/options".to_string())
            .into();

        let use_dynamic_expiries = std::env::var("USE_DYNAMIC_EXPIRIES")
            .map(|v| parse_bool(&v).unwrap_or(true))
            .unwrap_or(true);

        let loop_interval_secs = std::env::var("LOOP_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let influx = match (non_empty_var("INFLUX_URL"), non_empty_var("INFLUX_BUCKET")) {
            (Some(url), Some(bucket)) => Some(InfluxConfig {
                url,
                org: std::env::var("INFLUX_ORG").unwrap_or_default(),
                bucket,
                token: non_empty_var("INFLUX_TOKEN"),
            }),
            _ => None,
        };

        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());

        Ok(Self {
            kite_api_key,
            kite_access_token,
            kite_login_cmd,
            kite_api_base,
            raw_snapshot_dir,
            use_dynamic_expiries,
            loop_interval: Duration::from_secs(loop_interval_secs),
            retry: RetryPolicy::from_env(),
            influx,
            app_env,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
