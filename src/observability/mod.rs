//! Observability module providing structured logging.
//!
//! Log output goes through `tracing-subscriber` with a configurable format
//! (pretty, compact, JSON) and `RUST_LOG`-style filtering.

mod tracing_init;

pub use tracing_init::*;
