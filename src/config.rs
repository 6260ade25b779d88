//! Environment-driven stack configuration.
//!
//! Every setting has a default, so an empty environment describes the
//! reference deployment. A `.env` file in the working directory is honoured.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::MAX_FUNCTION_TIMEOUT_SECS;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be used.
    #[error("Invalid value for environment variable {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong with the value.
        reason: String,
    },
}

/// Settings the stack is declared from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Stack and template name.
    pub stack_name: String,
    /// Name of the secret holding the model-provider API key.
    pub openai_secret_name: String,
    /// Name of the secret holding the vector-index API key.
    pub pinecone_secret_name: String,
    /// Directory packaged as code for both functions.
    pub asset_dir: PathBuf,
    /// Runtime identifier of both functions.
    pub runtime: String,
    /// Execution timeout of both functions.
    pub function_timeout_secs: u64,
    /// REST API display name.
    pub api_name: String,
    /// Deployment stage of the REST API.
    pub api_stage: String,
    /// Explicit bucket name; generated when absent.
    pub bucket_name: Option<String>,
    /// Directory synthesis output is written to.
    pub output_dir: PathBuf,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "LlmProjectStack".to_string(),
            openai_secret_name: "openai-api-key-secret".to_string(),
            pinecone_secret_name: "pinecone-api-key-secret".to_string(),
            asset_dir: PathBuf::from("lambda"),
            runtime: "python3.9".to_string(),
            function_timeout_secs: 60,
            api_name: "LLM Service".to_string(),
            api_stage: "prod".to_string(),
            bucket_name: None,
            output_dir: PathBuf::from("cdk.out"),
        }
    }
}

impl StackConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let load_env_optional = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let function_timeout_secs = match load_env_optional("FUNCTION_TIMEOUT_SECS") {
            Some(value) => parse_timeout(&value)?,
            None => defaults.function_timeout_secs,
        };

        let api_stage = load_env_optional("API_STAGE").unwrap_or(defaults.api_stage);
        if !api_stage
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid(
                "API_STAGE",
                "only letters, digits and underscores are allowed",
            ));
        }

        Ok(Self {
            stack_name: load_env_optional("STACK_NAME").unwrap_or(defaults.stack_name),
            openai_secret_name: load_env_optional("OPENAI_SECRET_NAME")
                .unwrap_or(defaults.openai_secret_name),
            pinecone_secret_name: load_env_optional("PINECONE_SECRET_NAME")
                .unwrap_or(defaults.pinecone_secret_name),
            asset_dir: load_env_optional("LAMBDA_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_dir),
            runtime: load_env_optional("LAMBDA_RUNTIME").unwrap_or(defaults.runtime),
            function_timeout_secs,
            api_name: load_env_optional("API_NAME").unwrap_or(defaults.api_name),
            api_stage,
            bucket_name: load_env_optional("BUCKET_NAME"),
            output_dir: load_env_optional("DOCSTACK_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        })
    }
}

fn parse_timeout(value: &str) -> Result<u64, ConfigError> {
    let seconds: u64 = value
        .parse()
        .map_err(|_| invalid("FUNCTION_TIMEOUT_SECS", "expected a whole number of seconds"))?;
    if seconds == 0 || seconds > MAX_FUNCTION_TIMEOUT_SECS {
        return Err(invalid(
            "FUNCTION_TIMEOUT_SECS",
            format!("must be between 1 and {MAX_FUNCTION_TIMEOUT_SECS}"),
        ));
    }
    Ok(seconds)
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Load `.env` (if present) and then the configuration from the environment.
pub fn load_config() -> Result<StackConfig, ConfigError> {
    dotenvy::dotenv().ok();
    let config = StackConfig::from_env()?;
    tracing::debug!(
        stack = %config.stack_name,
        asset_dir = %config.asset_dir.display(),
        runtime = %config.runtime,
        timeout_secs = config.function_timeout_secs,
        bucket_name = ?config.bucket_name,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = StackConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StackConfig::default());
        assert_eq!(config.stack_name, "LlmProjectStack");
        assert_eq!(config.function_timeout_secs, 60);
    }

    #[test]
    fn overrides_are_applied_and_blank_values_ignored() {
        let config = StackConfig::from_lookup(lookup(&[
            ("STACK_NAME", "DocsStaging"),
            ("PINECONE_SECRET_NAME", "staging/pinecone"),
            ("LAMBDA_ASSET_DIR", "functions/src"),
            ("FUNCTION_TIMEOUT_SECS", " 300 "),
            ("BUCKET_NAME", "   "),
            ("API_NAME", ""),
        ]))
        .unwrap();

        assert_eq!(config.stack_name, "DocsStaging");
        assert_eq!(config.pinecone_secret_name, "staging/pinecone");
        assert_eq!(config.asset_dir, PathBuf::from("functions/src"));
        assert_eq!(config.function_timeout_secs, 300);
        assert_eq!(config.bucket_name, None);
        assert_eq!(config.api_name, "LLM Service");
    }

    #[test]
    fn rejects_unusable_timeouts() {
        for bad in ["sixty", "0", "901", "-5"] {
            let err = StackConfig::from_lookup(lookup(&[("FUNCTION_TIMEOUT_SECS", bad)]))
                .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue { key, .. } if key == "FUNCTION_TIMEOUT_SECS"),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn rejects_stage_names_with_separators() {
        assert!(StackConfig::from_lookup(lookup(&[("API_STAGE", "prod/v2")])).is_err());
        assert!(StackConfig::from_lookup(lookup(&[("API_STAGE", "prod_v2")])).is_ok());
    }
}
