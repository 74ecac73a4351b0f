//! Server configuration module.
//!
//! Parses configuration from environment variables for the EventDesk server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8000 | HTTP server port |
//! | `DATABASE_URL` | No | `sqlite://eventdesk.db` | SQLite database URL |
//! | `EVENTDESK_DB_MAX_CONNECTIONS` | No | 5 | Connection pool size |
//! | `EVENTDESK_BCRYPT_COST` | No | 12 | bcrypt work factor (4-31) |
//! | `EVENTDESK_MAIL_FROM` | No | `mail@example.com` | Sender address for notifications |
//! | `EVENTDESK_MAIL_API_URL` | Yes* | - | Base URL of the mail API |
//! | `EVENTDESK_MAIL_API_KEY` | No | - | Bearer key for the mail API |
//! | `EVENTDESK_NOTIFY_ON_REGISTRATION` | No | false | Email users when they register for an event |
//! | `EVENTDESK_UNIQUE_REGISTRATIONS` | No | false | Reject repeat registrations for the same event |
//! | `EVENTDESK_EVENT_MUTATION_POLICY` | No | `any-authenticated` | Or `organizer-only` |
//!
//! *Only required if `EVENTDESK_NOTIFY_ON_REGISTRATION=true`

use std::env;

use thiserror::Error;
use tracing::warn;

use crate::policy::EventMutationPolicy;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8000;

/// Default database location.
const DEFAULT_DATABASE_URL: &str = "sqlite://eventdesk.db";

/// Default connection pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default sender for outgoing mail.
pub const DEFAULT_MAIL_FROM: &str = "mail@example.com";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// sqlx connection URL for the SQLite store.
    pub database_url: String,

    /// Maximum number of pooled database connections.
    pub max_connections: u32,

    /// bcrypt cost used when hashing new passwords.
    pub bcrypt_cost: u32,

    /// Sender address used for all outgoing mail.
    pub mail_from: String,

    /// Base URL of the HTTP mail API.
    pub mail_api_url: Option<String>,

    /// Bearer key presented to the mail API.
    pub mail_api_key: Option<String>,

    /// When true, a confirmation email is sent after each event registration.
    pub notify_on_registration: bool,

    /// When true, a user may register for a given event only once.
    pub unique_registrations: bool,

    /// Who may update or delete an event.
    pub event_mutation_policy: EventMutationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            mail_api_url: None,
            mail_api_key: None,
            notify_on_registration: false,
            unique_registrations: false,
            event_mutation_policy: EventMutationPolicy::default(),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A numeric variable does not parse or is out of range
    /// - `EVENTDESK_EVENT_MUTATION_POLICY` names an unknown policy
    /// - Registration notifications are enabled without a mail API URL
    ///
    /// # Example
    ///
    /// ```no_run
    /// use eventdesk_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let max_connections =
            parse_u32_env("EVENTDESK_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let bcrypt_cost = parse_u32_env("EVENTDESK_BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        let mail_from =
            env::var("EVENTDESK_MAIL_FROM").unwrap_or_else(|_| DEFAULT_MAIL_FROM.to_string());
        let mail_api_url = env::var("EVENTDESK_MAIL_API_URL")
            .ok()
            .filter(|v| !v.is_empty());
        let mail_api_key = env::var("EVENTDESK_MAIL_API_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        let notify_on_registration = parse_bool_env("EVENTDESK_NOTIFY_ON_REGISTRATION");
        let unique_registrations = parse_bool_env("EVENTDESK_UNIQUE_REGISTRATIONS");
        let event_mutation_policy = parse_policy()?;

        let config = Self {
            port,
            database_url,
            max_connections,
            bcrypt_cost,
            mail_from,
            mail_api_url,
            mail_api_key,
            notify_on_registration,
            unique_registrations,
            event_mutation_policy,
        };

        config.validate()?;

        if config.mail_api_url.is_some() && !config.notify_on_registration {
            warn!(
                "EVENTDESK_MAIL_API_URL is set but EVENTDESK_NOTIFY_ON_REGISTRATION is not; \
                 no registration emails will be sent"
            );
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidFormat {
                var: "EVENTDESK_DB_MAX_CONNECTIONS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidFormat {
                var: "EVENTDESK_BCRYPT_COST".to_string(),
                message: format!("must be between 4 and 31, got {}", self.bcrypt_cost),
            });
        }

        if self.mail_from.trim().is_empty() {
            return Err(ConfigError::InvalidFormat {
                var: "EVENTDESK_MAIL_FROM".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        if self.notify_on_registration && self.mail_api_url.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "EVENTDESK_MAIL_API_URL".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse an unsigned integer environment variable, falling back to `default`.
fn parse_u32_env(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("expected a non-negative integer, got '{value}'"),
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the EVENTDESK_EVENT_MUTATION_POLICY environment variable.
fn parse_policy() -> Result<EventMutationPolicy, ConfigError> {
    match env::var("EVENTDESK_EVENT_MUTATION_POLICY") {
        Ok(value) if !value.is_empty() => {
            value
                .parse()
                .map_err(|message: String| ConfigError::InvalidFormat {
                    var: "EVENTDESK_EVENT_MUTATION_POLICY".to_string(),
                    message,
                })
        }
        _ => Ok(EventMutationPolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] = &[
        "PORT",
        "DATABASE_URL",
        "EVENTDESK_DB_MAX_CONNECTIONS",
        "EVENTDESK_BCRYPT_COST",
        "EVENTDESK_MAIL_FROM",
        "EVENTDESK_MAIL_API_URL",
        "EVENTDESK_MAIL_API_KEY",
        "EVENTDESK_NOTIFY_ON_REGISTRATION",
        "EVENTDESK_UNIQUE_REGISTRATIONS",
        "EVENTDESK_EVENT_MUTATION_POLICY",
    ];

    /// Helper to temporarily set environment variables for testing.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Starts from a clean slate with every EventDesk variable removed.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.iter().rev() {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        let _guard = EnvGuard::clean();

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.mail_from, DEFAULT_MAIL_FROM);
        assert!(config.mail_api_url.is_none());
        assert!(!config.notify_on_registration);
        assert!(!config.unique_registrations);
        assert_eq!(
            config.event_mutation_policy,
            EventMutationPolicy::AnyAuthenticated
        );
    }

    #[test]
    #[serial]
    fn test_config_with_all_values() {
        let mut guard = EnvGuard::clean();
        guard.set("PORT", "9090");
        guard.set("DATABASE_URL", "sqlite::memory:");
        guard.set("EVENTDESK_DB_MAX_CONNECTIONS", "1");
        guard.set("EVENTDESK_BCRYPT_COST", "4");
        guard.set("EVENTDESK_MAIL_FROM", "events@example.org");
        guard.set("EVENTDESK_MAIL_API_URL", "https://mail.example.org");
        guard.set("EVENTDESK_MAIL_API_KEY", "mail-key");
        guard.set("EVENTDESK_NOTIFY_ON_REGISTRATION", "TRUE");
        guard.set("EVENTDESK_UNIQUE_REGISTRATIONS", "true");
        guard.set("EVENTDESK_EVENT_MUTATION_POLICY", "organizer-only");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.port, 9090);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.bcrypt_cost, 4);
        assert_eq!(config.mail_from, "events@example.org");
        assert_eq!(
            config.mail_api_url,
            Some("https://mail.example.org".to_string())
        );
        assert_eq!(config.mail_api_key, Some("mail-key".to_string()));
        assert!(config.notify_on_registration);
        assert!(config.unique_registrations);
        assert_eq!(
            config.event_mutation_policy,
            EventMutationPolicy::OrganizerOnly
        );
    }

    #[test]
    #[serial]
    fn test_config_notify_without_mail_url_fails() {
        let mut guard = EnvGuard::clean();
        guard.set("EVENTDESK_NOTIFY_ON_REGISTRATION", "true");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingEnvVar(ref v) if v == "EVENTDESK_MAIL_API_URL")
        );
    }

    #[test]
    #[serial]
    fn test_config_rejects_unknown_policy() {
        let mut guard = EnvGuard::clean();
        guard.set("EVENTDESK_EVENT_MUTATION_POLICY", "admins-only");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "EVENTDESK_EVENT_MUTATION_POLICY")
        );
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_connections() {
        let mut guard = EnvGuard::clean();
        guard.set("EVENTDESK_DB_MAX_CONNECTIONS", "0");

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_rejects_bcrypt_cost_out_of_range() {
        let mut guard = EnvGuard::clean();
        guard.set("EVENTDESK_BCRYPT_COST", "3");
        assert!(Config::from_env().is_err());

        guard.set("EVENTDESK_BCRYPT_COST", "32");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_parse_u32_env_invalid() {
        let mut guard = EnvGuard::clean();
        guard.set("EVENTDESK_BCRYPT_COST", "twelve");

        let result = parse_u32_env("EVENTDESK_BCRYPT_COST", 12);
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    #[serial]
    fn test_parse_bool_env_variants() {
        let mut guard = EnvGuard::clean();
        guard.set("TEST_BOOL", "True");
        assert!(parse_bool_env("TEST_BOOL"));

        guard.set("TEST_BOOL", "yes");
        assert!(!parse_bool_env("TEST_BOOL"));

        guard.remove("TEST_BOOL");
        assert!(!parse_bool_env("TEST_BOOL"));
    }

    #[test]
    #[serial]
    fn test_parse_port_invalid() {
        let mut guard = EnvGuard::clean();
        guard.set("PORT", "not-a-number");

        let result = parse_port();
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidPort(_)));
    }

    #[test]
    #[serial]
    fn test_parse_port_out_of_range() {
        let mut guard = EnvGuard::clean();
        guard.set("PORT", "99999");

        assert!(parse_port().is_err());
    }
}
