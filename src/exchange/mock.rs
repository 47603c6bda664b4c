//! In-memory exchange and feed for paper runs and tests.
//!
//! `MockFuturesGateway` fills every accepted batch immediately at the book,
//! tracking net position per contract so a run can be checked for hedge
//! neutrality afterwards.

use super::traits::{FuturesGateway, SignalSource};
use super::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Simulated exchange state.
#[derive(Debug, Default)]
pub struct MockGatewayState {
    pub books: HashMap<String, OrderBookDepth>,
    /// Net position per contract (positive = long)
    pub positions: HashMap<String, Decimal>,
    /// Contracts whose market data / position queries fail
    pub failing_symbols: HashSet<String>,
    /// Batch submissions fail at the transport level
    pub fail_orders: bool,
    /// Every batch received, accepted or not
    pub batches: Vec<Vec<BatchOrder>>,
    pub leverage_calls: Vec<(String, u32)>,
}

/// Mock futures gateway.
#[derive(Clone, Default)]
pub struct MockFuturesGateway {
    state: Arc<RwLock<MockGatewayState>>,
    order_id_counter: Arc<AtomicI64>,
}

impl MockFuturesGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-level book for a contract.
    pub async fn set_book(
        &self,
        symbol: &str,
        bid: Decimal,
        bid_size: Decimal,
        ask: Decimal,
        ask_size: Decimal,
    ) {
        self.state.write().await.books.insert(
            symbol.to_string(),
            OrderBookDepth {
                bids: vec![(bid, bid_size)],
                asks: vec![(ask, ask_size)],
            },
        );
    }

    /// Same top-of-book size on both sides of both contracts of `base`.
    pub async fn set_liquidity(&self, base: &str, size: Decimal) {
        for variant in QuoteVariant::ALL {
            self.set_book(
                &variant.contract(base),
                Decimal::ONE_HUNDRED,
                size,
                Decimal::ONE_HUNDRED + Decimal::ONE,
                size,
            )
            .await;
        }
    }

    pub async fn set_position(&self, symbol: &str, amount: Decimal) {
        self.state
            .write()
            .await
            .positions
            .insert(symbol.to_string(), amount);
    }

    pub async fn fail_symbol(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_symbols
            .insert(symbol.to_string());
    }

    pub async fn fail_orders(&self, fail: bool) {
        self.state.write().await.fail_orders = fail;
    }

    pub async fn position(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    pub async fn batches(&self) -> Vec<Vec<BatchOrder>> {
        self.state.read().await.batches.clone()
    }

    pub async fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state.read().await.leverage_calls.clone()
    }

    fn next_order_id(&self) -> i64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl FuturesGateway for MockFuturesGateway {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.state
            .write()
            .await
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn position_risk(&self, symbol: &str) -> Result<Vec<PositionRisk>> {
        let state = self.state.read().await;
        if state.failing_symbols.contains(symbol) {
            return Err(anyhow!("simulated position query failure for {}", symbol));
        }

        Ok(state
            .positions
            .get(symbol)
            .map(|amount| PositionRisk {
                symbol: symbol.to_string(),
                position_amt: *amount,
                position_side: Some("BOTH".to_string()),
            })
            .into_iter()
            .collect())
    }

    async fn depth(&self, symbol: &str, _limit: u32) -> Result<OrderBookDepth> {
        let state = self.state.read().await;
        if state.failing_symbols.contains(symbol) {
            return Err(anyhow!("simulated depth failure for {}", symbol));
        }

        Ok(state.books.get(symbol).cloned().unwrap_or_default())
    }

    async fn place_batch_orders(&self, orders: &[BatchOrder]) -> Result<Vec<BatchOrderResult>> {
        let mut state = self.state.write().await;
        state.batches.push(orders.to_vec());

        if state.fail_orders {
            return Err(anyhow!("simulated batch submission failure"));
        }

        let mut results = Vec::with_capacity(orders.len());
        for order in orders {
            let current = state.positions.get(&order.symbol).copied().unwrap_or_default();
            let signed = match order.side {
                OrderSide::Buy => order.quantity,
                OrderSide::Sell => -order.quantity,
            };

            // reduce-only must move the position toward zero without crossing it
            let reduces = current.is_sign_positive() != signed.is_sign_positive()
                && !current.is_zero()
                && order.quantity <= current.abs();
            if order.reduce_only && !reduces {
                results.push(BatchOrderResult::Rejected {
                    code: -2022,
                    msg: "ReduceOnly Order is rejected.".to_string(),
                });
                continue;
            }

            state
                .positions
                .insert(order.symbol.clone(), current + signed);

            debug!(
                symbol = %order.symbol,
                side = ?order.side,
                quantity = %order.quantity,
                "Mock order filled"
            );

            results.push(BatchOrderResult::Accepted {
                order_id: self.next_order_id(),
                symbol: order.symbol.clone(),
                status: "FILLED".to_string(),
            });
        }

        Ok(results)
    }
}

/// Scripted premium feed.
#[derive(Clone, Default)]
pub struct MockSignalSource {
    snapshots: Arc<RwLock<Option<Vec<PremiumSnapshot>>>>,
}

impl MockSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots returned from now on.
    pub async fn set(&self, snapshots: Vec<PremiumSnapshot>) {
        *self.snapshots.write().await = Some(snapshots);
    }

    /// Make every fetch fail until the next `set`.
    pub async fn fail(&self) {
        *self.snapshots.write().await = None;
    }
}

#[async_trait]
impl SignalSource for MockSignalSource {
    async fn snapshots(&self) -> Result<Vec<PremiumSnapshot>> {
        self.snapshots
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("simulated feed outage"))
    }
}
