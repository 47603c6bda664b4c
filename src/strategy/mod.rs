//! Hedging strategy implementation.
//!
//! Contains the core logic for:
//! - The per-instance decision loop and its run state
//! - Depth probing and startup position reconciliation
//! - Loop pacing
//! - Instance spawning and per-instance cancellation

mod depth;
mod engine;
mod launcher;
mod pacer;
mod registry;
mod resolver;
mod state;

pub use depth::{DepthProber, DepthQuotes, DepthSnapshot, DEPTH_LIMIT};
pub use engine::{SkipReason, StopReason, StrategyEngine, TickOutcome};
pub use launcher::{GatewayFactory, Launcher};
pub use pacer::Pacer;
pub use registry::{InstanceInfo, InstanceRegistry};
pub use resolver::{PositionResolver, ResolvedPosition};
pub use state::{RunState, Step};
