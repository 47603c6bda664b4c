//! Exchange and market-signal integrations.
//!
//! ## Binance
//! Signed REST calls against USDⓈ-M futures for:
//! - Leverage setting
//! - Order book depth
//! - Open positions
//! - Batch market orders
//!
//! ## Premium feed
//! Read-only polling of the BUSD/USDT premium gap service.

mod client;
mod feed;
pub mod mock;
mod traits;
mod types;

pub use client::BinanceClient;
pub use feed::PremiumFeedClient;
pub use mock::{MockFuturesGateway, MockSignalSource};
pub use traits::{FuturesGateway, SignalSource};
pub use types::*;
