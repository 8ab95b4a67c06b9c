//! ATM Option Logger Library
//!
//! Polls Kite for at-the-money option quotes on NIFTY, SENSEX and BANKNIFTY,
//! derives straddle analytics and persists every leg to JSON snapshot files
//! and InfluxDB. The binary in `main.rs` only wires these modules together.

pub mod clock;
pub mod collector;
pub mod config;
pub mod kite;
pub mod models;
pub mod schedule;
pub mod sinks;
