//! Runtime configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// HS256 secret shared with the auth provider
    pub jwt_secret: String,
    /// Form generation is disabled when unset
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub welcome_bonus_credits: i64,
    pub generation_timeout: Duration,
    pub idempotency_window: Duration,
    pub generation_rate_limit: u32,
    pub generation_rate_window: Duration,
    /// Zero disables the periodic balance sweep
    pub reconcile_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://formcredit.db?mode=rwc".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: String::new(),
            anthropic_api_key: None,
            anthropic_model: None,
            welcome_bonus_credits: 100,
            generation_timeout: Duration::from_secs(60),
            idempotency_window: Duration::from_secs(600),
            generation_rate_limit: 10,
            generation_rate_window: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(3600),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            jwt_secret,
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_model: get("ANTHROPIC_MODEL"),
            welcome_bonus_credits: parse_or(
                get("WELCOME_BONUS_CREDITS"),
                "WELCOME_BONUS_CREDITS",
                defaults.welcome_bonus_credits,
            )?,
            generation_timeout: Duration::from_secs(parse_or(
                get("GENERATION_TIMEOUT_SECS"),
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            idempotency_window: Duration::from_secs(parse_or(
                get("IDEMPOTENCY_WINDOW_SECS"),
                "IDEMPOTENCY_WINDOW_SECS",
                defaults.idempotency_window.as_secs(),
            )?),
            generation_rate_limit: parse_or(
                get("GENERATION_RATE_LIMIT"),
                "GENERATION_RATE_LIMIT",
                defaults.generation_rate_limit,
            )?,
            generation_rate_window: Duration::from_secs(parse_or(
                get("GENERATION_RATE_WINDOW_SECS"),
                "GENERATION_RATE_WINDOW_SECS",
                defaults.generation_rate_window.as_secs(),
            )?),
            reconcile_interval: Duration::from_secs(parse_or(
                get("RECONCILE_INTERVAL_SECS"),
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )?),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
