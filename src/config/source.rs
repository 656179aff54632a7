use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for the LangSmith API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LangSmithConfig {
    /// API key sent as `x-api-key`. Usually supplied via `LANGSMITH_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL of the LangSmith API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Upper bound in seconds for a single usage query, retries included.
    /// Each HTTP attempt gets an equal share of it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum number of runs fetched per query. Results are not paginated.
    #[serde(default = "default_max_runs")]
    pub max_runs: u32,

    /// Number of per-day queries issued concurrently by the daily breakdown.
    /// 1 keeps the queries strictly sequential.
    #[serde(default = "default_daily_concurrency")]
    pub daily_concurrency: usize,

    /// Retry behavior for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LangSmithConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_runs: default_max_runs(),
            daily_concurrency: default_daily_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl LangSmithConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| format!("langsmith.endpoint '{}' is not a valid URL: {e}", self.endpoint))?;
        if self.timeout_secs == 0 {
            return Err("langsmith.timeout_secs must be greater than 0".into());
        }
        if self.max_runs == 0 {
            return Err("langsmith.max_runs must be greater than 0".into());
        }
        if self.daily_concurrency == 0 {
            return Err("langsmith.daily_concurrency must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err("langsmith.retry.jitter must be between 0.0 and 1.0".into());
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "https://api.smith.langchain.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_runs() -> u32 {
    100
}

fn default_daily_concurrency() -> usize {
    1
}

/// Retry configuration for LangSmith requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether retries are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of retry attempts (not including the initial request).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (percentage, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Status codes that should trigger a retry.
    /// Default: 429 (rate limit), 500, 502, 503, 504 (server errors).
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Retries turned off; every request is attempted exactly once.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.enabled && self.retryable_status_codes.contains(&status)
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        Duration::from_millis(final_delay as u64)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
