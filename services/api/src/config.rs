//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use quiz_core::ANONYMOUS_DAILY_LIMIT;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// When absent the rate-limit ledger is kept in memory.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub quiz_model: String,
    pub ocr_model: String,
    pub default_language: String,
    pub anonymous_daily_limit: u32,
    pub cors_origin: String,
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
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Storage Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- LLM Settings ---
        let openai_api_key = lookup("OPENAI_API_KEY");
        let openai_api_base = lookup("OPENAI_API_BASE");
        let quiz_model = lookup("QUIZ_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let ocr_model = lookup("OCR_MODEL").unwrap_or_else(|| "gpt-4o".to_string());

        // --- Quiz Settings ---
        let default_language = lookup("DEFAULT_LANGUAGE").unwrap_or_else(|| "en".to_string());
        let anonymous_daily_limit = match lookup("ANONYMOUS_DAILY_LIMIT") {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(
                    "ANONYMOUS_DAILY_LIMIT".to_string(),
                    format!("'{}' is not a non-negative integer", raw),
                )
            })?,
            None => ANONYMOUS_DAILY_LIMIT,
        };
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            openai_api_base,
            quiz_model,
            ocr_model,
            default_language,
            anonymous_daily_limit,
            cors_origin,
        })
    }
}
