//! Application configuration

use std::env;
use std::time::Duration;

/// Canned bot reply used when `BOT_REPLY_TEXT` is unset
pub const DEFAULT_BOT_REPLY: &str =
    "Thank you for your message. An agent will be with you shortly.";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allow_origin: String,
    /// Honor `cf-connecting-ip` / `x-real-ip` / `x-forwarded-for`. Only
    /// enable behind a proxy that overwrites them.
    pub trust_proxy_headers: bool,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub visitor_token_expiry_days: i64,

    // Realtime
    pub ws_connect_window_secs: u64,
    pub ws_connect_max_attempts: u32,
    pub delivery_delay_ms: u64,
    pub max_message_length: usize,

    // Tenancy
    pub tenant_cache_ttl_secs: u64,

    // Bot
    pub bot_reply_text: String,
}

impl Config {
    /// Configuration with every optional setting at its default
    pub fn with_defaults(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            cors_allow_origin: "*".to_string(),
            trust_proxy_headers: false,
            database_url: database_url.into(),
            database_max_connections: 10,
            jwt_secret: jwt_secret.into(),
            jwt_expiry_hours: 24,
            visitor_token_expiry_days: 180,
            ws_connect_window_secs: 60,
            ws_connect_max_attempts: 5,
            delivery_delay_ms: 1000,
            max_message_length: 5000,
            tenant_cache_ttl_secs: 300,
            bot_reply_text: DEFAULT_BOT_REPLY.to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::WeakSecret(
                "JWT_SECRET must be at least 32 characters",
            ));
        }

        let defaults = Self::with_defaults(database_url, jwt_secret);

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            cors_allow_origin: env::var("CORS_ALLOW_ORIGIN").unwrap_or(defaults.cors_allow_origin),
            trust_proxy_headers: parse_or("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,

            // Database
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,

            // Authentication
            jwt_expiry_hours: parse_or("JWT_EXPIRY_HOURS", defaults.jwt_expiry_hours)?,
            visitor_token_expiry_days: parse_or(
                "VISITOR_TOKEN_EXPIRY_DAYS",
                defaults.visitor_token_expiry_days,
            )?,

            // Realtime
            ws_connect_window_secs: parse_or(
                "WS_CONNECT_WINDOW_SECS",
                defaults.ws_connect_window_secs,
            )?,
            ws_connect_max_attempts: parse_or(
                "WS_CONNECT_MAX_ATTEMPTS",
                defaults.ws_connect_max_attempts,
            )?,
            delivery_delay_ms: parse_or("DELIVERY_DELAY_MS", defaults.delivery_delay_ms)?,
            max_message_length: parse_or("MAX_MESSAGE_LENGTH", defaults.max_message_length)?,

            // Tenancy
            tenant_cache_ttl_secs: parse_or(
                "TENANT_CACHE_TTL_SECS",
                defaults.tenant_cache_ttl_secs,
            )?,

            // Bot
            bot_reply_text: env::var("BOT_REPLY_TEXT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.bot_reply_text),

            ..defaults
        })
    }

    pub fn connect_window(&self) -> Duration {
        Duration::from_secs(self.ws_connect_window_secs)
    }

    pub fn delivery_delay(&self) -> Duration {
        Duration::from_millis(self.delivery_delay_ms)
    }

    pub fn tenant_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tenant_cache_ttl_secs)
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    fn cleanup_config() {
        for name in [
            "DATABASE_URL",
            "JWT_SECRET",
            "WS_CONNECT_MAX_ATTEMPTS",
            "DELIVERY_DELAY_MS",
            "BOT_REPLY_TEXT",
            "TRUST_PROXY_HEADERS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.ws_connect_window_secs, 60);
        assert_eq!(config.ws_connect_max_attempts, 5);
        assert_eq!(config.bot_reply_text, DEFAULT_BOT_REPLY);
        assert!(!config.trust_proxy_headers);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_and_weak_secret() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        env::set_var("JWT_SECRET", "short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        setup_minimal_config();
        env::set_var("WS_CONNECT_MAX_ATTEMPTS", "many");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("WS_CONNECT_MAX_ATTEMPTS"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        setup_minimal_config();
        env::set_var("DELIVERY_DELAY_MS", "250");
        env::set_var("BOT_REPLY_TEXT", "Hi there!");
        env::set_var("TRUST_PROXY_HEADERS", "true");

        let config = Config::from_env().unwrap();
        assert!(config.trust_proxy_headers);
        assert_eq!(config.delivery_delay(), Duration::from_millis(250));
        assert_eq!(config.bot_reply_text, "Hi there!");

        cleanup_config();
    }
}
