//! Broker market-data collaborators
//!
//! The collector only talks to the broker through [`MarketDataApi`] and
//! [`TokenRefresher`]; `client` is the Kite Connect implementation.

pub mod auth;
pub mod client;
pub mod instruments;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Exchange, Instrument, Quote};

pub use auth::{CommandTokenRefresher, NoLoginCommand};
pub use client::KiteClient;

/// Classified upstream failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// Access token expired or invalid
    #[error("auth failure: {0}")]
    Auth(String),
    /// Explicit rate-limit signal, optionally with a server retry hint
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    /// Anything else, including transport and decode errors
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return UpstreamError::RateLimited { retry_after: None };
        }
        UpstreamError::Other(err.to_string())
    }
}

#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Full quotes keyed by the requested identifier
    async fn quote(&self, instruments: &[String]) -> Result<HashMap<String, Quote>, UpstreamError>;

    /// Entire instrument universe for one derivatives exchange
    async fn instruments(&self, exchange: Exchange) -> Result<Vec<Instrument>, UpstreamError>;
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Run the login handshake and return a fresh access token
    async fn refresh(&self) -> anyhow::Result<String>;
}

/// Shared credential slot read by the HTTP client and rewritten on refresh
#[derive(Debug)]
pub struct AccessToken {
    api_key: String,
    token: RwLock<String>,
}

impl AccessToken {
    pub fn new(api_key: String, token: String) -> Self {
        Self {
            api_key,
            token: RwLock::new(token),
        }
    }

    pub fn get(&self) -> String {
        self.token.read().clone()
    }

    pub fn set(&self, token: String) {
        *self.token.write() = token;
    }

    /// Kite `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("token {}:{}", self.api_key, self.token.read())
    }
}
