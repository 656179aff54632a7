mod billing_cycle;
mod langsmith_client;
mod metrics_source;
mod retry;
mod usage;

pub use billing_cycle::{CycleError, compute_window, rolling_window};
pub use langsmith_client::LangSmithClient;
pub use metrics_source::{MetricsSource, SourceError};
pub use usage::{UsageError, UsageService};
