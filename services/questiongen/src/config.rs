//! services/questiongen/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use questiongen_core::settings::{
    GenerationSettings, DEFAULT_EXISTING_QUESTIONS_LIMIT, DEFAULT_IDENTIFIER_PREFIX,
    DEFAULT_IDENTIFIER_TAG, DEFAULT_MAX_TRIES,
};
use tracing::Level;

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which generation backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// A managed AI broker that wraps model access with quota handling.
    AiManager,
    OpenAi,
    Azure,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ai_manager" | "aimanager" | "broker" => Some(ProviderKind::AiManager),
            "openai" => Some(ProviderKind::OpenAi),
            "azure" => Some(ProviderKind::Azure),
            _ => None,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub provider: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Model name for OpenAI, deployment id for Azure. Unused by the broker.
    pub model: String,
    pub azure_api_version: String,
    pub http_timeout: Duration,
    pub pdftoppm_path: PathBuf,
    pub generation: GenerationSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // --- Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Provider Settings ---
        let provider_str = var("QUESTIONGEN_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let provider = ProviderKind::parse(&provider_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "QUESTIONGEN_PROVIDER".to_string(),
                format!("'{}' is not one of ai_manager, openai, azure", provider_str),
            )
        })?;

        let api_key = var("QUESTIONGEN_API_KEY");
        let endpoint = match (provider, var("QUESTIONGEN_ENDPOINT")) {
            (_, Some(endpoint)) => endpoint.trim_end_matches('/').to_string(),
            (ProviderKind::OpenAi, None) => DEFAULT_OPENAI_ENDPOINT.to_string(),
            (_, None) => return Err(ConfigError::MissingVar("QUESTIONGEN_ENDPOINT".to_string())),
        };
        if provider != ProviderKind::AiManager && api_key.is_none() {
            return Err(ConfigError::MissingVar("QUESTIONGEN_API_KEY".to_string()));
        }

        let model = var("QUESTIONGEN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let azure_api_version = var("QUESTIONGEN_AZURE_API_VERSION")
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
        let http_timeout = Duration::from_secs(parse_number(
            "QUESTIONGEN_HTTP_TIMEOUT_SECS",
            var("QUESTIONGEN_HTTP_TIMEOUT_SECS"),
            120u64,
        )?);
        let pdftoppm_path = var("QUESTIONGEN_PDFTOPPM")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pdftoppm"));

        // --- Generation Settings ---
        let max_tries = parse_number(
            "QUESTIONGEN_MAX_TRIES",
            var("QUESTIONGEN_MAX_TRIES"),
            DEFAULT_MAX_TRIES,
        )?;
        if max_tries == 0 {
            return Err(ConfigError::InvalidValue(
                "QUESTIONGEN_MAX_TRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let existing_questions_limit = parse_number(
            "QUESTIONGEN_EXISTING_QUESTIONS_LIMIT",
            var("QUESTIONGEN_EXISTING_QUESTIONS_LIMIT"),
            DEFAULT_EXISTING_QUESTIONS_LIMIT,
        )?;

        // An explicitly empty identifier turns it off.
        let identifier = |key: &str, default: &str| match lookup(key) {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(value),
            None => Some(default.to_string()),
        };

        let generation = GenerationSettings {
            max_tries,
            identifier_prefix: identifier("QUESTIONGEN_AI_IDENTIFIER", DEFAULT_IDENTIFIER_PREFIX),
            identifier_tag: identifier("QUESTIONGEN_AI_IDENTIFIER_TAG", DEFAULT_IDENTIFIER_TAG),
            existing_questions_limit,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            provider,
            endpoint,
            api_key,
            model,
            azure_api_version,
            http_timeout,
            pdftoppm_path,
            generation,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("'{}' is not a number", raw))
        }),
        None => Ok(default),
    }
}
