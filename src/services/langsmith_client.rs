//! LangSmith REST API client.
//!
//! Resolves a project (LangSmith "session") by name, then queries its runs for
//! a time range and extracts each run's `usage_metadata`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{
    metrics_source::{MetricsSource, SourceError, SourceResult},
    retry::with_retry,
};
use crate::{
    config::{LangSmithConfig, RetryConfig},
    models::UsageRecord,
};

const API_KEY_HEADER: &str = "x-api-key";

/// HTTP requests behind one usage query: the project lookup, then the runs query.
const REQUESTS_PER_QUERY: u32 = 2;

/// Floor for the per-attempt timeout.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct Session {
    id: String,
}

#[derive(Debug, Serialize)]
struct RunQuery<'a> {
    session: [&'a str; 1],
    start_time: String,
    end_time: String,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    #[serde(default)]
    runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
struct Run {
    #[serde(default)]
    usage_metadata: Option<UsageRecord>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Client for the LangSmith HTTP API.
///
/// Includes automatic retry with exponential backoff for transient failures.
#[derive(Clone)]
pub struct LangSmithClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    max_runs: u32,
    retry_config: RetryConfig,
}

impl LangSmithClient {
    /// Build a client from configuration.
    ///
    /// A missing API key is not an error here; queries fail with
    /// [`SourceError::NotConfigured`] instead, so the server can still start
    /// and answer health and config requests.
    pub fn from_config(config: &LangSmithConfig) -> SourceResult<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout(config))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        let mut base_url = config.endpoint.clone();
        if base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            http_client,
            base_url,
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            max_runs: config.max_runs,
            retry_config: config.retry.clone(),
        })
    }

    fn api_key(&self) -> SourceResult<&str> {
        self.api_key.as_deref().ok_or(SourceError::NotConfigured)
    }

    /// Look up a project's id by name. `None` if no project has that name.
    pub async fn resolve_project(&self, project: &str) -> SourceResult<Option<String>> {
        let api_key = self.api_key()?;
        let url = format!("{}/api/v1/sessions", self.base_url);
        let params = [("name", project)];

        let response = with_retry(&self.retry_config, "resolve_project", || {
            self.http_client
                .get(&url)
                .header(API_KEY_HEADER, api_key)
                .query(&params)
                .send()
        })
        .await?;

        let sessions: Vec<Session> = check_status(response).await?.json().await.map_err(|e| {
            SourceError::InvalidResponse(format!("failed to decode sessions: {e}"))
        })?;

        Ok(sessions.into_iter().next().map(|s| s.id))
    }

    /// Query runs of a project by id, returning their usage metadata.
    pub async fn query_runs(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SourceResult<Vec<UsageRecord>> {
        let api_key = self.api_key()?;
        let url = format!("{}/api/v1/runs/query", self.base_url);
        let body = RunQuery {
            session: [project_id],
            start_time: start.to_rfc3339_opts(SecondsFormat::Micros, true),
            end_time: end.to_rfc3339_opts(SecondsFormat::Micros, true),
            limit: self.max_runs,
        };

        let response = with_retry(&self.retry_config, "query_runs", || {
            self.http_client
                .post(&url)
                .header(API_KEY_HEADER, api_key)
                .json(&body)
                .send()
        })
        .await?;

        let page: RunQueryResponse = check_status(response).await?.json().await.map_err(|e| {
            SourceError::InvalidResponse(format!("failed to decode runs: {e}"))
        })?;

        Ok(page
            .runs
            .into_iter()
            .map(|run| run.usage_metadata.unwrap_or_default())
            .collect())
    }
}

#[async_trait]
impl MetricsSource for LangSmithClient {
    async fn list_usage(
        &self,
        project: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SourceResult<Vec<UsageRecord>> {
        let Some(project_id) = self.resolve_project(project).await? else {
            tracing::debug!(project, "LangSmith project not found, reporting no usage");
            return Ok(Vec::new());
        };

        let records = self.query_runs(&project_id, start, end).await?;
        tracing::debug!(
            project,
            %start,
            %end,
            runs = records.len(),
            "Fetched LangSmith runs"
        );
        Ok(records)
    }
}

/// Timeout for a single HTTP attempt.
///
/// `timeout_secs` bounds a whole usage query, so it is split across every
/// attempt the query may make. A timed-out attempt then still leaves room for
/// its retry.
fn request_timeout(config: &LangSmithConfig) -> Duration {
    let attempts = if config.retry.enabled {
        config.retry.max_retries.saturating_add(1)
    } else {
        1
    };
    let per_attempt = config.timeout() / attempts.saturating_mul(REQUESTS_PER_QUERY);
    per_attempt.max(MIN_REQUEST_TIMEOUT).min(config.timeout())
}

/// Turn a non-success response into [`SourceError::Api`], keeping the
/// upstream `detail` message when present.
async fn check_status(response: Response) -> SourceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if text.is_empty() => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
        Err(_) => text,
    };

    Err(SourceError::Api {
        status: status.as_u16(),
        message,
    })
}
