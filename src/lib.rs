//! # Premium Gap Farmer
//!
//! Hedged BUSD/USDT perpetual pairs on Binance Futures, sized and reversed
//! from the premium gap between the two quote variants of the same asset.
//!
//! ## Architecture
//!
//! - `config`: Application configuration and per-instance strategy settings
//! - `exchange`: Binance futures REST client, premium feed client, mocks
//! - `strategy`: Decision loop, depth probing, pacing, instance registry
//! - `events`: Lifecycle events and webhook delivery
//! - `persistence`: Encrypted SQLite store of instance settings
//! - `server`: HTTP control surface
//! - `utils`: Decimal and funding-time helpers

pub mod config;
pub mod events;
pub mod exchange;
pub mod persistence;
pub mod server;
pub mod strategy;
pub mod utils;

pub use config::Config;
