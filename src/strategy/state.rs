//! Mutable decision state of one strategy instance.

use super::resolver::ResolvedPosition;
use crate::utils::whole_clips;
use rust_decimal::Decimal;

/// Sign applied when a fill is booked against the remaining quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Building exposure: fills consume `remaining`
    Forward,
    /// Unwinding after a reversal: fills give `remaining` back
    Backward,
}

impl Step {
    pub fn signed(self, quantity: Decimal) -> Decimal {
        match self {
            Step::Forward => quantity,
            Step::Backward => -quantity,
        }
    }
}

/// Run state owned by a single engine. Never shared, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    /// Quantity still to fill in the current cycle
    pub remaining: Decimal,
    /// Clip used by the latest order
    pub quantity: Decimal,
    pub progress: u32,
    pub max_progress: u32,
    /// Clips per full cycle
    pub full_progress: u32,
    /// `true` when the BUSD leg is long; `None` until the first accepted signal
    pub direction: Option<bool>,
    /// Unwinding a position whose direction no longer matches the signal
    pub reverse_mode: bool,
    /// Mark-price direction pinned for the current arbitrage cycle
    pub arbitrage_pin: Option<bool>,
    /// Arbitrage cycle is in its closing half
    pub arbitrage_triggered: bool,
    /// Orders only reduce exposure
    pub reduce: bool,
    pub step: Step,
}

impl RunState {
    pub fn new(total: Decimal, quantity: Decimal, full_progress: u32, reduce: bool) -> Self {
        Self {
            remaining: total,
            quantity,
            progress: 0,
            max_progress: full_progress,
            full_progress,
            direction: None,
            reverse_mode: false,
            arbitrage_pin: None,
            arbitrage_triggered: false,
            reduce,
            step: Step::Forward,
        }
    }

    /// Seed from a hedge already open on the exchange.
    ///
    /// The open clips are taken off the bar, floored at zero.
    pub fn resume(&mut self, position: ResolvedPosition, clip: Decimal) {
        self.direction = Some(position.direction);
        self.remaining = (self.remaining - position.quantity).max(Decimal::ZERO);
        self.progress = self
            .full_progress
            .saturating_sub(whole_clips(position.quantity, clip));
    }

    /// Start the closing half of an arbitrage cycle.
    pub fn begin_holding(&mut self, total: Decimal) {
        self.reduce = true;
        self.remaining = total;
        self.arbitrage_triggered = true;
    }

    /// Closing half filled: wait for the next divergence.
    pub fn reset_arbitrage_cycle(&mut self, total: Decimal) {
        self.reduce = false;
        self.arbitrage_triggered = false;
        self.arbitrage_pin = None;
        self.direction = None;
        self.reverse_mode = false;
        self.step = Step::Forward;
        self.remaining = total;
    }

    /// Bookkeeping once nothing of the cycle is filled.
    ///
    /// A reversal keeps its shortened bar running until it has placed
    /// `max_progress` clips, then the full bar is restored.
    pub fn close_cycle(&mut self, total: Decimal) {
        if self.remaining < total {
            return;
        }
        self.remaining = total;

        if !self.reverse_mode {
            self.progress = 0;
        }
        if self.progress >= self.max_progress {
            self.reverse_mode = false;
            self.step = Step::Forward;
            self.max_progress = self.full_progress;
        }
    }

    /// This tick's order size: the configured clip, bounded by what is left.
    pub fn clip(&self, configured: Decimal) -> Decimal {
        configured.min(self.remaining).max(Decimal::ZERO)
    }

    /// Flip to a new direction and unwind what was built.
    pub fn commit_reversal(&mut self, direction: bool, step: Step, quantity: Decimal, filled: u32) {
        self.direction = Some(direction);
        self.step = step;
        self.quantity = quantity;
        self.max_progress = self.full_progress.min(filled);
        self.progress = 0;
    }

    pub fn book_fill(&mut self, quantity: Decimal) {
        self.remaining -= self.step.signed(quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state() -> RunState {
        RunState::new(dec!(3), dec!(1), 3, false)
    }

    #[test]
    fn test_resume_offsets_remaining_and_progress() {
        let mut state = state();
        state.resume(
            ResolvedPosition {
                quantity: dec!(2.5),
                direction: true,
            },
            dec!(1),
        );
        assert_eq!(state.remaining, dec!(0.5));
        assert_eq!(state.progress, 1);
        assert_eq!(state.direction, Some(true));

        let mut state = RunState::new(dec!(3), dec!(1), 3, false);
        state.resume(
            ResolvedPosition {
                quantity: dec!(5),
                direction: false,
            },
            dec!(1),
        );
        assert!(state.remaining.is_zero());
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn test_close_cycle_only_at_boundary() {
        let mut state = state();
        state.remaining = dec!(2);
        state.progress = 1;
        state.close_cycle(dec!(3));
        assert_eq!(state.progress, 1);

        state.remaining = dec!(3.5);
        state.close_cycle(dec!(3));
        assert_eq!(state.remaining, dec!(3));
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn test_close_cycle_keeps_reversal_bar_until_done() {
        let mut state = state();
        state.reverse_mode = true;
        state.step = Step::Backward;
        state.max_progress = 2;
        state.progress = 1;
        state.close_cycle(dec!(3));
        assert!(state.reverse_mode);
        assert_eq!(state.step, Step::Backward);
        assert_eq!(state.progress, 1);

        state.progress = 2;
        state.close_cycle(dec!(3));
        assert!(!state.reverse_mode);
        assert_eq!(state.step, Step::Forward);
        assert_eq!(state.max_progress, 3);
        assert_eq!(state.progress, 2);

        // Next boundary starts a fresh bar.
        state.close_cycle(dec!(3));
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn test_clip_bounded_by_remaining() {
        let mut state = RunState::new(dec!(1), dec!(0.3), 4, false);
        assert_eq!(state.clip(dec!(0.3)), dec!(0.3));

        state.remaining = dec!(0.1);
        assert_eq!(state.clip(dec!(0.3)), dec!(0.1));

        state.remaining = Decimal::ZERO;
        assert!(state.clip(dec!(0.3)).is_zero());
    }

    #[test]
    fn test_book_fill_follows_step() {
        let mut state = state();
        state.book_fill(dec!(1));
        assert_eq!(state.remaining, dec!(2));

        state.step = Step::Backward;
        state.book_fill(dec!(1));
        assert_eq!(state.remaining, dec!(3));
    }

    #[test]
    fn test_arbitrage_cycle_transitions() {
        let mut state = RunState::new(dec!(1), dec!(1), 1, false);
        state.arbitrage_pin = Some(true);
        state.direction = Some(false);
        state.remaining = Decimal::ZERO;

        state.begin_holding(dec!(1));
        assert!(state.reduce && state.arbitrage_triggered);
        assert_eq!(state.arbitrage_pin, Some(true));

        state.remaining = Decimal::ZERO;
        state.reset_arbitrage_cycle(dec!(1));
        assert!(!state.reduce && !state.arbitrage_triggered);
        assert_eq!(state.arbitrage_pin, None);
        assert_eq!(state.direction, None);
        assert_eq!(state.remaining, dec!(1));
    }
}
