//! Core runtime: draining a provider stream, cancelling it, and the
//! orchestrator that turns one user message into one persisted turn.

pub mod accumulator;
pub mod cancel;
pub mod turn;

pub use accumulator::{accumulate, DeltaSink, StreamAccumulator};
pub use cancel::CancelToken;
pub use turn::{Orchestrator, Persistence, TurnInput, TurnOutcome};
