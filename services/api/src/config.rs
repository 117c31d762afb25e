use secrecy::SecretString;
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

/// Where the calling API credential comes from.
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// `CALLING_API_KEY` was set directly.
    Env(SecretString),
    /// Fetched once at startup from the secret broker at this URL.
    Broker(String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub calling_api_base_url: String,
    pub credential: CredentialSource,
    pub realtime_url: String,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
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

        let calling_api_base_url = std::env::var("CALLING_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.retellai.com".to_string());

        let credential = match (
            non_empty_var("CALLING_API_KEY"),
            non_empty_var("SECRET_BROKER_URL"),
        ) {
            (Some(key), _) => CredentialSource::Env(SecretString::from(key)),
            (None, Some(url)) => CredentialSource::Broker(url),
            (None, None) => {
                return Err(ConfigError::MissingVar(
                    "CALLING_API_KEY or SECRET_BROKER_URL must be set".to_string(),
                ));
            }
        };

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| "wss://api.retellai.com/web-call".to_string());

        let poll_interval = positive_secs("POLL_INTERVAL_SECS", 5)?;
        let connect_timeout = positive_secs("CONNECT_TIMEOUT_SECS", 15)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            calling_api_base_url,
            credential,
            realtime_url,
            poll_interval,
            connect_timeout,
            log_level,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn positive_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(Duration::from_secs(default));
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        )),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}
