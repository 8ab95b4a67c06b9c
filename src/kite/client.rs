//! Kite Connect v3 REST client
//!
//! Only the two read endpoints the collector needs: full quotes and the
//! per-exchange instrument dump. Every non-success response is classified into
//! an [`UpstreamError`] so the resilient caller can decide how to recover.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::instruments::parse_instruments_csv;
use super::{AccessToken, MarketDataApi, UpstreamError};
use crate::models::{Exchange, Instrument, Quote};

pub const KITE_API_BASE: &str = "https://api.kite.trade";

/// Kite JSON envelope: `{"status": "success", "data": ...}` or an error body
#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Clone)]
pub struct KiteClient {
    client: Client,
    base_url: String,
    token: Arc<AccessToken>,
}

impl KiteClient {
    pub fn new(base_url: impl Into<String>, token: Arc<AccessToken>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert("X-Kite-Version", header::HeaderValue::from_static("3"));
                headers
            })
            .build()
            .context("Failed to build Kite HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, self.token.header_value())
            .query(query)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, retry_after.as_deref(), &body))
    }
}

#[async_trait]
impl MarketDataApi for KiteClient {
    async fn quote(&self, instruments: &[String]) -> Result<HashMap<String, Quote>, UpstreamError> {
        let query: Vec<(&str, &str)> = instruments.iter().map(|i| ("i", i.as_str())).collect();
        let response = self.get("/quote", &query).await?;
        let body = response.text().await?;
        decode_quote_envelope(&body)
    }

    async fn instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>, UpstreamError> {
        let path = format!("/instruments/{}", exchange.as_str());
        let response = self.get(&path, &[]).await?;
        let body = response.text().await?;
        let instruments = parse_instruments_csv(&body);
        debug!(exchange = %exchange, count = instruments.len(), "Loaded instrument universe");
        Ok(instruments)
    }
}

/// Decode a `/quote` body, classifying an in-band error envelope
pub fn decode_quote_envelope(body: &str) -> Result<HashMap<String, Quote>, UpstreamError> {
    let envelope: KiteEnvelope<HashMap<String, Quote>> = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Other(format!("Failed to parse quote response: {e}")))?;

    if envelope.status != "success" {
        return Err(classify_error_type(
            envelope.error_type.as_deref(),
            envelope.message.as_deref().unwrap_or_default(),
            None,
        ));
    }
    Ok(envelope.data.unwrap_or_default())
}

/// Map an HTTP failure onto the three-tier taxonomy
pub fn classify_failure(status: u16, retry_after: Option<&str>, body: &str) -> UpstreamError {
    let hint = retry_after.and_then(parse_retry_after);
    if status == 429 {
        return UpstreamError::RateLimited { retry_after: hint };
    }

    let (error_type, message) = match serde_json::from_str::<KiteEnvelope<serde_json::Value>>(body) {
        Ok(env) => (env.error_type, env.message.unwrap_or_default()),
        Err(_) => (None, body.trim().to_string()),
    };

    match classify_error_type(error_type.as_deref(), &message, hint) {
        UpstreamError::Other(msg) => UpstreamError::Other(format!("HTTP {status}: {msg}")),
        classified => classified,
    }
}

fn classify_error_type(error_type: Option<&str>, message: &str, hint: Option<Duration>) -> UpstreamError {
    if error_type == Some("TokenException") || message.contains("TokenException") {
        return UpstreamError::Auth(message.to_string());
    }
    if message.contains("Too many requests") {
        return UpstreamError::RateLimited { retry_after: hint };
    }
    UpstreamError::Other(message.to_string())
}

/// `Retry-After` in (possibly fractional) seconds; HTTP-date form is ignored.
/// Values too large for a `Duration` saturate; the caller caps the delay.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_with_hint() {
        let err = classify_failure(429, Some("1"), "");
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after: Some(Duration::from_secs(1))
            }
        );

        let err = classify_failure(429, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "");
        assert_eq!(err, UpstreamError::RateLimited { retry_after: None });
    }

    #[test]
    fn test_classify_token_exception() {
        let body = r#"{"status":"error","message":"Incorrect `api_key` or `access_token`.","error_type":"TokenException"}"#;
        assert!(matches!(classify_failure(403, None, body), UpstreamError::Auth(_)));
    }

    #[test]
    fn test_classify_too_many_requests_message() {
        let body = r#"{"status":"error","message":"Too many requests","error_type":"NetworkException"}"#;
        assert_eq!(
            classify_failure(503, None, body),
            UpstreamError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_classify_other() {
        let body = r#"{"status":"error","message":"Invalid instrument","error_type":"InputException"}"#;
        assert_eq!(
            classify_failure(400, None, body),
            UpstreamError::Other("HTTP 400: Invalid instrument".into())
        );
        assert_eq!(
            classify_failure(502, None, "Bad Gateway"),
            UpstreamError::Other("HTTP 502: Bad Gateway".into())
        );
    }

    #[test]
    fn test_decode_quote_envelope() {
        let body = r#"{"status":"success","data":{
            "NSE:NIFTY 50":{"last_price":24821.35,"ohlc":{"open":24700,"high":24900,"low":24650,"close":24750}},
            "12345":{"last_price":120.5,"oi":1000,"volume":50000}
        }}"#;
        let quotes = decode_quote_envelope(body).unwrap();
        assert_eq!(quotes["NSE:NIFTY 50"].last_price, Some(24821.35));
        assert_eq!(quotes["12345"].oi, Some(1000));

        let err_body = r#"{"status":"error","message":"Token expired","error_type":"TokenException"}"#;
        assert!(matches!(decode_quote_envelope(err_body), Err(UpstreamError::Auth(_))));

        assert!(matches!(decode_quote_envelope("<html>"), Err(UpstreamError::Other(_))));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("1e30"), Some(Duration::MAX));
    }

    #[test]
    fn test_classify_oversized_retry_after_hint() {
        assert_eq!(
            classify_failure(429, Some("1e30"), ""),
            UpstreamError::RateLimited {
                retry_after: Some(Duration::MAX)
            }
        );
    }
}
