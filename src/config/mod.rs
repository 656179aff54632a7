//! Configuration module for the usage API.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. The LangSmith credentials
//! can additionally be supplied through `LANGSMITH_API_KEY` and
//! `LANGSMITH_ENDPOINT`, which take precedence over the file.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 5000
//!
//! [langsmith]
//! api_key = "${LANGSMITH_API_KEY}"
//!
//! [clients.client1]
//! project = "bot_sejasua"
//! name = "Cliente SejaSua"
//! cycle_day = 5
//! ```

mod clients;
mod observability;
mod server;
mod source;

use std::path::Path;

pub use clients::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use source::*;

/// Environment variable holding the LangSmith API key.
pub const API_KEY_ENV: &str = "LANGSMITH_API_KEY";

/// Environment variable holding the LangSmith API endpoint.
pub const ENDPOINT_ENV: &str = "LANGSMITH_ENDPOINT";

/// Root configuration.
///
/// Every section is optional. Loaded once at startup and shared read-only
/// for the lifetime of the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection settings for the LangSmith metrics source.
    #[serde(default)]
    pub langsmith: LangSmithConfig,

    /// Client accounts keyed by client id.
    #[serde(default)]
    pub clients: ClientRegistry,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    ///
    /// `LANGSMITH_API_KEY` / `LANGSMITH_ENDPOINT` from the process environment
    /// are applied before validation.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let mut config: AppConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Overlay credentials from the process environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            self.langsmith.api_key = Some(key);
        }
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV)
            && !endpoint.trim().is_empty()
        {
            self.langsmith.endpoint = endpoint;
        }
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.langsmith.validate().map_err(ConfigError::Validation)?;
        self.clients.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Default configuration used when no config file is present.
pub fn default_config_toml() -> &'static str {
    r#"# cyclemeter configuration

[server]
host = "0.0.0.0"
port = 5000
dashboard_url = "http://localhost:3000"

[server.cors]
allowed_origins = ["*"]

[langsmith]
endpoint = "https://api.smith.langchain.com"
timeout_secs = 30

# Day of month on which each client's billing cycle starts.
[clients.client1]
project = "bot_sejasua"
name = "Cliente SejaSua"
cycle_day = 5

[clients.client2]
project = "bot_model"
name = "Cliente Model"
cycle_day = 10

[observability.logging]
level = "info"
format = "compact"
"#
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex");
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_source_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset([API_KEY_ENV, ENDPOINT_ENV], f)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = without_source_env(|| AppConfig::from_str("").unwrap());

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.langsmith.endpoint, "https://api.smith.langchain.com");
        assert!(config.langsmith.api_key.is_none());
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_default_config_parses() {
        let config = without_source_env(|| AppConfig::from_str(default_config_toml()).unwrap());

        assert_eq!(config.clients.len(), 2);
        let client = config.clients.get("client1").unwrap();
        assert_eq!(client.project, "bot_sejasua");
        assert_eq!(client.cycle_day, 5);
        assert_eq!(config.clients.get("client2").unwrap().cycle_day, 10);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        temp_env::with_vars(
            [
                (API_KEY_ENV, Some("lsv2-from-env")),
                (ENDPOINT_ENV, Some("http://localhost:1984")),
            ],
            || {
                let config = AppConfig::from_str(
                    r#"
                    [langsmith]
                    api_key = "from-file"
                    endpoint = "https://api.smith.langchain.com"
                "#,
                )
                .unwrap();

                assert_eq!(config.langsmith.api_key.as_deref(), Some("lsv2-from-env"));
                assert_eq!(config.langsmith.endpoint, "http://localhost:1984");
            },
        );
    }

    #[test]
    fn test_blank_env_key_is_ignored() {
        temp_env::with_vars([(API_KEY_ENV, Some("  ")), (ENDPOINT_ENV, None)], || {
            let config = AppConfig::from_str(
                r#"
                [langsmith]
                api_key = "from-file"
            "#,
            )
            .unwrap();

            assert_eq!(config.langsmith.api_key.as_deref(), Some("from-file"));
        });
    }

    #[test]
    fn test_invalid_client_rejected() {
        let err = without_source_env(|| {
            AppConfig::from_str(
                r#"
                [clients.broken]
                project = "bot"
                name = "Broken"
                cycle_day = 32
            "#,
            )
            .unwrap_err()
        });

        let msg = err.to_string();
        assert!(msg.contains("broken"), "should name the client: {msg}");
        assert!(msg.contains("cycle_day"), "should name the field: {msg}");
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result = without_source_env(|| AppConfig::from_str("[database]\nurl = \"x\"\n"));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"
            [server]
            port = 5050

            [clients.acme]
            project = "acme_bot"
            name = "Acme"
            cycle_day = 1
        "#,
        )
        .unwrap();

        let config = without_source_env(|| AppConfig::from_file(file.path()).unwrap());
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.clients.get("acme").unwrap().cycle_day, 1);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, p) if p == path));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_LANGSMITH_KEY", Some("lsv2-secret"), || {
            let result = expand_env_vars("api_key = \"${TEST_LANGSMITH_KEY}\"").unwrap();
            assert_eq!(result, "api_key = \"lsv2-secret\"");
        });
    }

    #[test]
    fn test_missing_env_var_errors() {
        temp_env::with_var_unset("CYCLEMETER_MISSING_VAR", || {
            let err = expand_env_vars("key = \"${CYCLEMETER_MISSING_VAR}\"").unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "CYCLEMETER_MISSING_VAR"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# api_key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# api_key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
