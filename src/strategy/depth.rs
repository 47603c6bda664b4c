//! Order book probing for both hedge legs.

use crate::exchange::{FuturesGateway, OrderBookDepth, QuoteVariant};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Levels requested per side; the deepest one is read.
pub const DEPTH_LIMIT: u32 = 5;

/// Bid/ask price and size of one contract.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthSnapshot {
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub ask: Decimal,
    pub ask_size: Decimal,
}

impl From<&OrderBookDepth> for DepthSnapshot {
    fn from(depth: &OrderBookDepth) -> Self {
        let (bid, bid_size) = depth.deepest_bid().unwrap_or_default();
        let (ask, ask_size) = depth.deepest_ask().unwrap_or_default();
        Self {
            bid,
            bid_size,
            ask,
            ask_size,
        }
    }
}

/// Depth of both legs, as probed in one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthQuotes {
    pub busd: DepthSnapshot,
    pub usdt: DepthSnapshot,
}

impl DepthQuotes {
    /// True when every side of both books is strictly larger than `quantity`
    /// and `quantity` is positive.
    pub fn covers(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO
            && [
                self.usdt.bid_size,
                self.busd.bid_size,
                self.usdt.ask_size,
                self.busd.ask_size,
            ]
            .iter()
            .all(|size| *size > quantity)
    }
}

/// Fetches depth for both contracts of a symbol, setting leverage alongside.
pub struct DepthProber {
    gateway: Arc<dyn FuturesGateway>,
    leverage: u32,
}

impl DepthProber {
    pub fn new(gateway: Arc<dyn FuturesGateway>, leverage: u32) -> Self {
        Self { gateway, leverage }
    }

    /// Issue all four calls at once and wait for every one of them.
    ///
    /// Leverage errors are ignored; a failed depth query reads as an empty book.
    pub async fn probe(&self, base: &str) -> DepthQuotes {
        let busd = QuoteVariant::Busd.contract(base);
        let usdt = QuoteVariant::Usdt.contract(base);

        let (busd_leverage, usdt_leverage, busd_depth, usdt_depth) = tokio::join!(
            self.gateway.set_leverage(&busd, self.leverage),
            self.gateway.set_leverage(&usdt, self.leverage),
            self.gateway.depth(&busd, DEPTH_LIMIT),
            self.gateway.depth(&usdt, DEPTH_LIMIT),
        );

        for (symbol, result) in [(&busd, busd_leverage), (&usdt, usdt_leverage)] {
            if let Err(e) = result {
                debug!(%symbol, "Leverage update failed: {}", e);
            }
        }

        DepthQuotes {
            busd: Self::snapshot(&busd, busd_depth),
            usdt: Self::snapshot(&usdt, usdt_depth),
        }
    }

    fn snapshot(symbol: &str, result: anyhow::Result<OrderBookDepth>) -> DepthSnapshot {
        match result {
            Ok(depth) => DepthSnapshot::from(&depth),
            Err(e) => {
                warn!(%symbol, "Depth query failed: {}", e);
                DepthSnapshot::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockFuturesGateway;
    use rust_decimal_macros::dec;

    fn quotes(sizes: [Decimal; 4]) -> DepthQuotes {
        DepthQuotes {
            busd: DepthSnapshot {
                bid_size: sizes[0],
                ask_size: sizes[1],
                ..Default::default()
            },
            usdt: DepthSnapshot {
                bid_size: sizes[2],
                ask_size: sizes[3],
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_covers_requires_all_sizes_strictly_larger() {
        assert!(quotes([dec!(2); 4]).covers(dec!(1)));
        assert!(!quotes([dec!(1); 4]).covers(dec!(1)));
        assert!(!quotes([dec!(5), dec!(5), dec!(0.5), dec!(5)]).covers(dec!(1)));
        assert!(!quotes([dec!(5); 4]).covers(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_probe_sets_leverage_and_reads_books() {
        let gateway = MockFuturesGateway::new();
        gateway
            .set_book("BTCBUSD", dec!(100), dec!(3), dec!(101), dec!(4))
            .await;
        gateway
            .set_book("BTCUSDT", dec!(99), dec!(5), dec!(100), dec!(6))
            .await;

        let prober = DepthProber::new(Arc::new(gateway.clone()), 7);
        let quotes = prober.probe("BTC").await;

        assert_eq!(quotes.busd.bid_size, dec!(3));
        assert_eq!(quotes.usdt.ask, dec!(100));

        let mut calls = gateway.leverage_calls().await;
        calls.sort();
        assert_eq!(
            calls,
            vec![("BTCBUSD".to_string(), 7), ("BTCUSDT".to_string(), 7)]
        );
    }

    #[tokio::test]
    async fn test_probe_failure_reads_as_empty_book() {
        let gateway = MockFuturesGateway::new();
        gateway.set_liquidity("BTC", dec!(10)).await;
        gateway.fail_symbol("BTCUSDT").await;

        let quotes = DepthProber::new(Arc::new(gateway), 5).probe("BTC").await;
        assert_eq!(quotes.busd.bid_size, dec!(10));
        assert_eq!(quotes.usdt, DepthSnapshot::default());
        assert!(!quotes.covers(dec!(1)));
    }
}
