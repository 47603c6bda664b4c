//! Startup reconciliation against live exchange positions.

use crate::exchange::{FuturesGateway, PositionRisk, QuoteVariant};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Hedged position found on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPosition {
    /// Smaller absolute size of the two legs
    pub quantity: Decimal,
    /// `true` when the BUSD leg is long
    pub direction: bool,
}

/// Queries both legs of a symbol and reports the hedged quantity.
pub struct PositionResolver {
    gateway: Arc<dyn FuturesGateway>,
}

impl PositionResolver {
    pub fn new(gateway: Arc<dyn FuturesGateway>) -> Self {
        Self { gateway }
    }

    /// `None` when either leg is flat, missing, or could not be queried.
    pub async fn resolve(&self, base: &str) -> Option<ResolvedPosition> {
        let busd = QuoteVariant::Busd.contract(base);
        let usdt = QuoteVariant::Usdt.contract(base);

        let (busd_risk, usdt_risk) = tokio::join!(
            self.gateway.position_risk(&busd),
            self.gateway.position_risk(&usdt),
        );

        let busd_amount = Self::net_amount(&busd, busd_risk)?;
        let usdt_amount = Self::net_amount(&usdt, usdt_risk)?;

        let quantity = busd_amount.abs().min(usdt_amount.abs());
        if quantity <= Decimal::ZERO {
            return None;
        }

        let resolved = ResolvedPosition {
            quantity,
            direction: busd_amount > Decimal::ZERO,
        };
        info!(
            symbol = %base,
            quantity = %resolved.quantity,
            busd_long = resolved.direction,
            "Resuming from existing position"
        );
        Some(resolved)
    }

    fn net_amount(symbol: &str, result: anyhow::Result<Vec<PositionRisk>>) -> Option<Decimal> {
        match result {
            Ok(entries) if entries.is_empty() => None,
            Ok(entries) => Some(entries.iter().map(|e| e.position_amt).sum()),
            Err(e) => {
                warn!(%symbol, "Position query failed, starting flat: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockFuturesGateway;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_resolves_smaller_leg() {
        let gateway = MockFuturesGateway::new();
        gateway.set_position("BTCBUSD", dec!(-1.5)).await;
        gateway.set_position("BTCUSDT", dec!(1.2)).await;

        let resolved = PositionResolver::new(Arc::new(gateway))
            .resolve("BTC")
            .await
            .unwrap();
        assert_eq!(resolved.quantity, dec!(1.2));
        assert!(!resolved.direction);
    }

    #[tokio::test]
    async fn test_missing_leg_resolves_to_none() {
        let gateway = MockFuturesGateway::new();
        gateway.set_position("BTCBUSD", dec!(2)).await;

        assert!(PositionResolver::new(Arc::new(gateway))
            .resolve("BTC")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_query_error_resolves_to_none() {
        let gateway = MockFuturesGateway::new();
        gateway.set_position("BTCBUSD", dec!(2)).await;
        gateway.set_position("BTCUSDT", dec!(-2)).await;
        gateway.fail_symbol("BTCUSDT").await;

        assert!(PositionResolver::new(Arc::new(gateway))
            .resolve("BTC")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_flat_legs_resolve_to_none() {
        let gateway = MockFuturesGateway::new();
        gateway.set_position("BTCBUSD", Decimal::ZERO).await;
        gateway.set_position("BTCUSDT", Decimal::ZERO).await;

        assert!(PositionResolver::new(Arc::new(gateway))
            .resolve("BTC")
            .await
            .is_none());
    }
}
