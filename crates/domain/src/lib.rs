//! Shared types for convtrace: the error taxonomy, streamed fragments,
//! per-turn trace collection, turn records, and the configuration schema.

pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod stream;
pub mod trace;
pub mod turn;

pub use error::{Error, Result};
