use narra_core::coordinator::MarkPolicy;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where participant progress is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressBackend {
    JsonFile(String),
    Postgres(String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub chat_model: String,
    pub progress_backend: ProgressBackend,
    pub transcript_api_url: Option<String>,
    pub audio_track_timeout: Duration,
    pub mark_policy: MarkPolicy,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-10-01".to_string());
        let realtime_voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let store = std::env::var("PROGRESS_STORE").unwrap_or_else(|_| "user_data.json".to_string());
        let progress_backend =
            if store.starts_with("postgres://") || store.starts_with("postgresql://") {
                ProgressBackend::Postgres(store)
            } else {
                ProgressBackend::JsonFile(store)
            };

        let transcript_api_url = std::env::var("TRANSCRIPT_API_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let timeout_str =
            std::env::var("AUDIO_TRACK_TIMEOUT_SECS").unwrap_or_else(|_| "10".to_string());
        let audio_track_timeout = timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("AUDIO_TRACK_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        let policy_str = std::env::var("MARK_POLICY").unwrap_or_else(|_| "presented".to_string());
        let mark_policy = match policy_str.to_lowercase().as_str() {
            "presented" => MarkPolicy::Presented,
            "session" | "whole_session" => MarkPolicy::WholeSession,
            other => {
                return Err(ConfigError::InvalidValue(
                    "MARK_POLICY".to_string(),
                    format!("'{}' is not one of 'presented', 'session'", other),
                ));
            }
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_model,
            realtime_voice,
            chat_model,
            progress_backend,
            transcript_api_url,
            audio_track_timeout,
            mark_policy,
            log_level,
        })
    }
}
