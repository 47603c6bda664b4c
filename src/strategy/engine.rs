//! The per-instance strategy loop.
//!
//! Each tick polls the premium feed, gates on the mark-price gap, probes both
//! order books and, when everything lines up, submits one two-leg batch: one
//! market order on the BUSD contract and the opposite order on the USDT
//! contract, both of the same exact size.
//!
//! The engine builds a hedge up to `total`, unwinds it when the funding signal
//! flips (within the funding window and above the yield floor), and in
//! arbitrage mode alternates between opening on a mark-price divergence and
//! closing once the divergence inverts.

use super::depth::DepthProber;
use super::pacer::Pacer;
use super::resolver::PositionResolver;
use super::state::{RunState, Step};
use crate::config::{ConfigError, OrderFailurePolicy, StrategyConfig, StrategyDefaults};
use crate::events::{EventKind, EventPublisher, LifecycleEvent};
use crate::exchange::{
    BatchOrder, FuturesGateway, OrderSide, PremiumSnapshot, QuoteVariant, SignalSource,
};
use crate::utils::{annualized_yield, minutes_until, next_funding_settlement, progress_denominator};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Why an instance stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancelled by an operator or shutdown
    Cancelled,
    /// Reduce run unwound everything
    Completed,
}

/// Why a tick placed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FeedUnavailable,
    NotInFeed,
    /// Zero funding-rate gap
    NoSignal,
    GapAboveThreshold,
    GapBelowThreshold,
    ArbitragePinMismatch,
    /// Price and feed direction agree, nothing to arbitrage
    NoDivergence,
    /// Reducing without knowing which leg is long
    UnknownDirection,
    YieldBelowMinimum,
    OutsideFundingWindow,
    InsufficientLiquidity,
    /// Cycle already filled when the batch was due
    NothingRemaining,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Placed {
        /// `true` when the BUSD leg was bought
        busd_buy: bool,
        quantity: Decimal,
        reduce_only: bool,
        accepted: bool,
    },
    Skipped(SkipReason),
    Stopped(StopReason),
}

/// One running strategy instance.
pub struct StrategyEngine {
    id: String,
    config: StrategyConfig,
    configured_quantity: Decimal,
    failure_policy: OrderFailurePolicy,
    tick_interval: Duration,
    gateway: Arc<dyn FuturesGateway>,
    feed: Arc<dyn SignalSource>,
    publisher: Arc<dyn EventPublisher>,
    prober: DepthProber,
    cancel: CancellationToken,
    state: RunState,
}

impl StrategyEngine {
    /// Apply defaults, validate and derive the initial run state.
    pub fn new(
        id: impl Into<String>,
        config: StrategyConfig,
        defaults: &StrategyDefaults,
        gateway: Arc<dyn FuturesGateway>,
        feed: Arc<dyn SignalSource>,
        publisher: Arc<dyn EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let mut config = config.with_defaults(defaults);
        config.validate()?;

        if config.reduce {
            config.arbitrage = false;
        }
        if config.arbitrage {
            config.total = config.quantity;
            config.difference = defaults.arbitrage_gap_threshold;
        }

        let full_progress = progress_denominator(config.total, config.quantity);
        let state = RunState::new(config.total, config.quantity, full_progress, config.reduce);
        let prober = DepthProber::new(gateway.clone(), config.leverage);

        Ok(Self {
            id: id.into(),
            configured_quantity: config.quantity,
            failure_policy: defaults.failure_policy,
            tick_interval: defaults.tick_interval(),
            config,
            gateway,
            feed,
            publisher,
            prober,
            cancel,
            state,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Announce the instance and reconcile with live positions.
    pub async fn start(&mut self) {
        if self.config.arbitrage {
            info!(
                total = %self.config.total,
                difference = %self.config.difference,
                "Arbitrage mode: total reset to one clip"
            );
        }

        self.publish(EventKind::Created).await;

        if self.config.reduce {
            if self.config.bid_side.is_none() {
                warn!("Reduce mode without bid side, nothing will be placed");
            }
        } else if self.config.monitor && !self.config.arbitrage {
            let resolver = PositionResolver::new(self.gateway.clone());
            if let Some(position) = resolver.resolve(&self.config.symbol).await {
                self.state.resume(position, self.configured_quantity);
            }
        }

        info!(
            remaining = %self.state.remaining,
            progress = self.state.progress,
            max_progress = self.state.max_progress,
            direction = ?self.state.direction,
            "Strategy started"
        );
    }

    /// Run until cancelled or, in reduce mode, fully unwound.
    pub async fn run(mut self) -> StopReason {
        let span = info_span!(
            "strategy",
            id = %self.id,
            symbol = %self.config.symbol,
            key = %self.config.credentials().key_hint()
        );

        async move {
            self.start().await;
            let mut pacer = Pacer::new(self.tick_interval);

            loop {
                tokio::select! {
                    _ = pacer.tick() => {}
                    _ = self.cancel.cancelled() => {}
                }

                match self.tick().await {
                    TickOutcome::Stopped(reason) => {
                        info!(?reason, "Strategy stopped");
                        return reason;
                    }
                    TickOutcome::Skipped(reason) => debug!(?reason, "Tick skipped"),
                    TickOutcome::Placed { .. } => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// One pass of the decision loop. Pacing is the caller's job.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Stopped(StopReason::Cancelled);
        }

        let total = self.config.total;
        self.state.remaining = self.state.remaining.max(Decimal::ZERO);

        if self.state.remaining <= Decimal::ZERO && self.state.reduce && !self.config.arbitrage {
            return TickOutcome::Stopped(StopReason::Completed);
        }

        if self.config.arbitrage && self.state.remaining <= Decimal::ZERO {
            if self.state.arbitrage_triggered {
                info!("Arbitrage cycle closed, waiting for next divergence");
                self.state.reset_arbitrage_cycle(total);
            } else {
                info!("Arbitrage position open, waiting to close");
                self.state.begin_holding(total);
            }
        }

        self.state.close_cycle(total);
        let quantity = self.state.clip(self.configured_quantity);

        let snapshots = match self.feed.snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!("Premium feed unavailable: {:#}", e);
                return TickOutcome::Skipped(SkipReason::FeedUnavailable);
            }
        };
        let Some(snapshot) = snapshots.into_iter().find(|s| s.symbol == self.config.symbol) else {
            return TickOutcome::Skipped(SkipReason::NotInFeed);
        };

        let gap = snapshot.mark_price_gap;
        let price_direction = snapshot.price_direction();
        debug!(
            mark_price_gap = %gap,
            funding_rate_gap = %snapshot.funding_rate_gap,
            feed_direction = snapshot.direction,
            price_direction,
            "Signal"
        );

        if self.config.arbitrage {
            if gap < self.config.difference {
                return TickOutcome::Skipped(SkipReason::GapBelowThreshold);
            }
        } else {
            if !self.state.reduce && snapshot.funding_rate_gap.is_zero() {
                return TickOutcome::Skipped(SkipReason::NoSignal);
            }
            if gap > self.config.difference {
                return TickOutcome::Skipped(SkipReason::GapAboveThreshold);
            }
        }

        if let Some(pin) = self.state.arbitrage_pin {
            let opening = !self.state.arbitrage_triggered;
            if (opening && pin != price_direction) || (!opening && pin == price_direction) {
                return TickOutcome::Skipped(SkipReason::ArbitragePinMismatch);
            }
        }

        // Arbitrage trades against the mark-price direction while it diverges
        // from the feed.
        let (signal, new_pin) = match (self.config.arbitrage, self.state.arbitrage_pin) {
            (false, _) => (snapshot.direction, None),
            (true, Some(pin)) => (!pin, None),
            (true, None) => {
                if price_direction == snapshot.direction {
                    return TickOutcome::Skipped(SkipReason::NoDivergence);
                }
                (!price_direction, Some(price_direction))
            }
        };

        let reversing = self.state.direction.is_some_and(|d| d != signal);
        let reduce = self.state.reduce;

        let busd_buy = if reduce {
            let side = self
                .config
                .bid_side
                .map(|variant| variant == QuoteVariant::Busd)
                .or(self.state.direction.map(|d| !d));
            match side {
                Some(side) => side,
                None => return TickOutcome::Skipped(SkipReason::UnknownDirection),
            }
        } else {
            signal
        };

        let commit_reversal = reversing && !reduce;
        if commit_reversal {
            if let Some(reason) = self.reversal_blocked(&snapshot) {
                return TickOutcome::Skipped(reason);
            }
        }

        let quotes = self.prober.probe(&self.config.symbol).await;
        if !quotes.covers(quantity) {
            debug!(%quantity, ?quotes, "Not enough depth");
            return TickOutcome::Skipped(SkipReason::InsufficientLiquidity);
        }

        if let Some(pin) = new_pin {
            info!(pin, "Arbitrage direction pinned");
            self.state.arbitrage_pin = Some(pin);
        }
        if reversing {
            self.state.reverse_mode = true;
        }

        let filled = self.state.progress;
        self.state.progress += 1;

        if !reduce {
            match self.state.direction {
                None => self.state.direction = Some(signal),
                Some(_) if commit_reversal => {
                    let step = if self.state.remaining >= total {
                        Step::Forward
                    } else {
                        Step::Backward
                    };
                    info!(
                        busd_long = signal,
                        ?step,
                        max_progress = self.state.full_progress.min(filled),
                        "Direction changed, unwinding"
                    );
                    self.state.commit_reversal(signal, step, quantity, filled);
                    self.publish(EventKind::Reversed).await;
                }
                Some(_) => {}
            }
        }
        self.state.quantity = quantity;

        if self.state.remaining <= Decimal::ZERO {
            debug!("Nothing remaining, order not placed");
            return TickOutcome::Skipped(SkipReason::NothingRemaining);
        }

        let reduce_only = reduce || self.state.reverse_mode;
        let orders = hedge_orders(&self.config.symbol, busd_buy, quantity, reduce_only);

        info!(
            busd_bid = %quotes.busd.bid,
            busd_ask = %quotes.busd.ask,
            usdt_bid = %quotes.usdt.bid,
            usdt_ask = %quotes.usdt.ask,
            busd_buy,
            %quantity,
            reduce_only,
            remaining = %self.state.remaining,
            "Placing hedge orders"
        );
        self.publish(EventKind::Placed(quotes)).await;

        let accepted = self.submit(&orders).await;
        if accepted || self.failure_policy == OrderFailurePolicy::Consume {
            self.state.book_fill(quantity);
        } else if !self.state.reverse_mode {
            self.state.progress = filled;
        }

        info!(
            remaining = %self.state.remaining,
            progress = self.state.progress,
            max_progress = self.state.max_progress,
            "Progress"
        );

        TickOutcome::Placed {
            busd_buy,
            quantity,
            reduce_only,
            accepted,
        }
    }

    /// Yield floor and funding window checks for a reversal.
    fn reversal_blocked(&self, snapshot: &PremiumSnapshot) -> Option<SkipReason> {
        let estimate = annualized_yield(snapshot.funding_rate_gap, self.config.leverage);
        if estimate < self.config.threshold {
            debug!(%estimate, threshold = %self.config.threshold, "Reversal yield too low");
            return Some(SkipReason::YieldBelowMinimum);
        }

        if self.config.before > 0 {
            let now = Utc::now();
            let next = snapshot
                .next_funding_time()
                .unwrap_or_else(|| next_funding_settlement(now));
            let minutes = minutes_until(now, next);
            if minutes >= i64::from(self.config.before) {
                debug!(minutes, before = self.config.before, "Outside funding window");
                return Some(SkipReason::OutsideFundingWindow);
            }
        }

        None
    }

    async fn submit(&self, orders: &[BatchOrder]) -> bool {
        match self.gateway.place_batch_orders(orders).await {
            Ok(results) => {
                let rejected: Vec<_> = results.iter().filter(|r| r.is_rejected()).collect();
                if rejected.is_empty() && results.len() == orders.len() {
                    true
                } else {
                    warn!(?rejected, legs = results.len(), "Batch order not fully accepted");
                    false
                }
            }
            Err(e) => {
                error!("Batch order failed: {:#}", e);
                false
            }
        }
    }

    async fn publish(&self, kind: EventKind) {
        let event = LifecycleEvent::new(&self.id, kind, &self.config);
        self.publisher.publish(&event).await;
    }
}

/// BUSD leg on `busd_buy`'s side, USDT leg opposite.
fn hedge_orders(base: &str, busd_buy: bool, quantity: Decimal, reduce_only: bool) -> Vec<BatchOrder> {
    let busd_side = if busd_buy { OrderSide::Buy } else { OrderSide::Sell };
    vec![
        BatchOrder::market(QuoteVariant::Busd.contract(base), busd_side, quantity, reduce_only),
        BatchOrder::market(
            QuoteVariant::Usdt.contract(base),
            busd_side.opposite(),
            quantity,
            reduce_only,
        ),
    ]
}
