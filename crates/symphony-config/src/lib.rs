//! # Symphony Config
//!
//! Environment-variable configuration for the server process. Every
//! recognized key has a default; malformed values are hard errors so a
//! typo never silently changes behavior.

use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Server settings sourced from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP bind host (`HOST`).
    pub host: String,
    /// HTTP bind port (`PORT`).
    pub port: u16,
    /// Storage backend credentials (`SUPABASE_URL` / `SUPABASE_KEY`);
    /// recognized for durable backends, unused by the in-memory stores.
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    /// Enables the scheduler and health loops (`AUTONOMIC_ENABLED`).
    pub autonomic_enabled: bool,
    /// Scheduler tick interval in seconds
    /// (`AUTONOMIC_HEARTBEAT_INTERVAL`).
    pub autonomic_heartbeat_interval: u64,
    /// Health sweep interval in seconds (`AUTONOMIC_HEALTH_INTERVAL`).
    pub autonomic_health_interval: u64,
    /// Optional notification transport token (`TELEGRAM_BOT_TOKEN`).
    pub telegram_bot_token: Option<String>,
    /// Tool credentials (`CLAUDE_API_KEY` / `TAVILY_API_KEY`).
    pub claude_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    /// Research loop budget (`RESEARCH_MAX_ITERATIONS`).
    pub research_max_iterations: u32,
    /// Termination thresholds (`CONFIDENCE_THRESHOLD` /
    /// `CONFIDENCE_DELTA_THRESHOLD`).
    pub confidence_threshold: f64,
    pub confidence_delta_threshold: f64,
    /// Default spawn depth budget (`MAX_SPAWN_DEPTH`).
    pub max_spawn_depth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            supabase_url: None,
            supabase_key: None,
            autonomic_enabled: false,
            autonomic_heartbeat_interval: 60,
            autonomic_health_interval: 300,
            telegram_bot_token: None,
            claude_api_key: None,
            tavily_api_key: None,
            research_max_iterations: 5,
            confidence_threshold: 0.85,
            confidence_delta_threshold: 0.02,
            max_spawn_depth: 3,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        Ok(Self {
            host: optional("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port)?,
            supabase_url: optional("SUPABASE_URL"),
            supabase_key: optional("SUPABASE_KEY"),
            autonomic_enabled: boolean("AUTONOMIC_ENABLED", defaults.autonomic_enabled)?,
            autonomic_heartbeat_interval: parsed(
                "AUTONOMIC_HEARTBEAT_INTERVAL",
                defaults.autonomic_heartbeat_interval,
            )?,
            autonomic_health_interval: parsed(
                "AUTONOMIC_HEALTH_INTERVAL",
                defaults.autonomic_health_interval,
            )?,
            telegram_bot_token: optional("TELEGRAM_BOT_TOKEN"),
            claude_api_key: optional("CLAUDE_API_KEY"),
            tavily_api_key: optional("TAVILY_API_KEY"),
            research_max_iterations: parsed(
                "RESEARCH_MAX_ITERATIONS",
                defaults.research_max_iterations,
            )?,
            confidence_threshold: parsed("CONFIDENCE_THRESHOLD", defaults.confidence_threshold)?,
            confidence_delta_threshold: parsed(
                "CONFIDENCE_DELTA_THRESHOLD",
                defaults.confidence_delta_threshold,
            )?,
            max_spawn_depth: parsed("MAX_SPAWN_DEPTH", defaults.max_spawn_depth)?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            reason: format!("expected a {}", std::any::type_name::<T>()),
        }),
        None => Ok(default),
    }
}

fn boolean(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_env() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8000);
        assert!(!settings.autonomic_enabled);
        assert_eq!(settings.autonomic_heartbeat_interval, 60);
        assert_eq!(settings.research_max_iterations, 5);
    }

    #[test]
    fn test_boolean_parsing() {
        std::env::set_var("SYMPHONY_TEST_BOOL", "yes");
        assert!(boolean("SYMPHONY_TEST_BOOL", false).unwrap());
        std::env::set_var("SYMPHONY_TEST_BOOL", "off");
        assert!(!boolean("SYMPHONY_TEST_BOOL", true).unwrap());
        std::env::set_var("SYMPHONY_TEST_BOOL", "sometimes");
        assert!(boolean("SYMPHONY_TEST_BOOL", true).is_err());
        std::env::remove_var("SYMPHONY_TEST_BOOL");
    }

    #[test]
    fn test_invalid_numbers_are_hard_errors() {
        std::env::set_var("SYMPHONY_TEST_PORT", "not-a-port");
        let err = parsed::<u16>("SYMPHONY_TEST_PORT", 8000).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        std::env::remove_var("SYMPHONY_TEST_PORT");
    }
}
