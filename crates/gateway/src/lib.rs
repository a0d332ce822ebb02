//! convtrace gateway: stream accumulation, turn orchestration, runtime
//! bootstrap, telemetry setup, and the demo entry point.

pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod telemetry;
