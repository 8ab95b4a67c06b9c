//! ATM option-chain collection pipeline
//!
//! `aggregator` drives one cycle; the other modules are the pieces it leans on:
//! - `caller`: failure classification, token refresh and backoff
//! - `expiry` / `contracts`: bucket → expiry date → concrete instruments
//! - `baseline`: first-seen-in-session OI/IV
//! - `derive`: pure analytics over quote fields

pub mod aggregator;
pub mod baseline;
pub mod caller;
pub mod contracts;
pub mod derive;
pub mod expiry;

use tracing::{info, warn};

use crate::kite::MarketDataApi;
use crate::models::{Exchange, Instrument};

pub use aggregator::SnapshotAggregator;
pub use baseline::SessionBaselines;
pub use caller::{ResilientCaller, RetryPolicy};
pub use expiry::ExpiryResolver;

/// Option universes loaded once per session
#[derive(Debug, Clone, Default)]
pub struct Universes {
    pub nfo: Vec<Instrument>,
    pub bfo: Vec<Instrument>,
}

impl Universes {
    pub fn new(nfo: Vec<Instrument>, bfo: Vec<Instrument>) -> Self {
        Self { nfo, bfo }
    }

    /// Download both universes; a universe that fails to load stays empty.
    pub async fn load(api: &dyn MarketDataApi, caller: &ResilientCaller) -> Self {
        let mut universes = Self::default();
        for exchange in [Exchange::Nfo, Exchange::Bfo] {
            let operation = format!("instruments/{exchange}");
            match caller.call(&operation, || api.instruments(exchange)).await {
                Some(instruments) => {
                    info!(exchange = %exchange, count = instruments.len(), "📚 Loaded instrument universe");
                    *universes.pool_mut(exchange) = instruments;
                }
                None => warn!(exchange = %exchange, "Instrument universe unavailable, continuing with empty pool"),
            }
        }
        universes
    }

    pub fn pool(&self, exchange: Exchange) -> &[Instrument] {
        match exchange {
            Exchange::Nfo => &self.nfo,
            Exchange::Bfo => &self.bfo,
        }
    }

    fn pool_mut(&mut self, exchange: Exchange) -> &mut Vec<Instrument> {
        match exchange {
            Exchange::Nfo => &mut self.nfo,
            Exchange::Bfo => &mut self.bfo,
        }
    }

    /// Both pools, NFO first
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.nfo.iter().chain(self.bfo.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.nfo.is_empty() && self.bfo.is_empty()
    }
}
