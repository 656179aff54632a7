use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::UsageRecord;

/// Errors from a usage metrics backend.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("LangSmith request timed out")]
    Timeout,

    #[error("LangSmith API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("LangSmith API key is not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for SourceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Request(error)
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// A backend that can list the usage records logged for a project.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Usage records for runs of `project` started between `start` and `end`.
    ///
    /// An unknown project yields an empty list.
    async fn list_usage(
        &self,
        project: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SourceResult<Vec<UsageRecord>>;
}
