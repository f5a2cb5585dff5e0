use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::swap::service::SwapConfig;
use crate::swap::sweep::SweepConfig;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub swap: SwapSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let reference_currency =
            env::var("SWAP_REFERENCE_CURRENCY").unwrap_or_else(|_| "NZD".to_string());
        let contact_recipients = env::var("SWAP_CONTACT_RECIPIENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let unapproved_match_hours = optional_i64("SWAP_UNAPPROVED_MATCH_HOURS")?;
        let delete_after_feedback_days = optional_i64("SWAP_DELETE_AFTER_FEEDBACK_DAYS")?;
        let admin_session = env::var("SWAP_ADMIN_SESSION").ok().filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            swap: SwapSettings {
                reference_currency,
                contact_recipients,
                unapproved_match_hours,
                delete_after_feedback_days,
                admin_session,
            },
        })
    }
}

fn optional_i64(var: &'static str) -> Result<Option<i64>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidDuration { var }),
        Err(_) => Ok(None),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Engine-level knobs sourced from the environment.
#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub reference_currency: String,
    pub contact_recipients: Vec<String>,
    /// Hours before an unapproved match is dissolved; unset disables the pass.
    pub unapproved_match_hours: Option<i64>,
    /// Days after the feedback request before a match is purged; unset keeps it.
    pub delete_after_feedback_days: Option<i64>,
    /// Pre-shared operator session secret; unset disables the admin surface.
    pub admin_session: Option<String>,
}

impl SwapSettings {
    pub fn engine_config(&self) -> SwapConfig {
        SwapConfig {
            reference_currency: self.reference_currency.clone(),
            contact_recipients: self.contact_recipients.clone(),
            automation_mode: false,
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            unapproved_match_after: self.unapproved_match_hours.map(chrono::Duration::hours),
            delete_after_feedback: self.delete_after_feedback_days.map(chrono::Duration::days),
            ..SweepConfig::default()
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidDuration { var: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidDuration { var } => {
                write!(f, "{var} must be a whole number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidDuration { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("SWAP_REFERENCE_CURRENCY");
        env::remove_var("SWAP_CONTACT_RECIPIENTS");
        env::remove_var("SWAP_UNAPPROVED_MATCH_HOURS");
        env::remove_var("SWAP_DELETE_AFTER_FEEDBACK_DAYS");
        env::remove_var("SWAP_ADMIN_SESSION");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.swap.reference_currency, "NZD");
        assert!(config.swap.contact_recipients.is_empty());
        assert!(config.swap.unapproved_match_hours.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn parses_swap_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SWAP_REFERENCE_CURRENCY", "EUR");
        env::set_var("SWAP_CONTACT_RECIPIENTS", "a@example.org, b@example.org,");
        env::set_var("SWAP_UNAPPROVED_MATCH_HOURS", "72");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.swap.reference_currency, "EUR");
        assert_eq!(
            config.swap.contact_recipients,
            vec!["a@example.org".to_string(), "b@example.org".to_string()]
        );
        let sweep = config.swap.sweep_config();
        assert_eq!(sweep.unapproved_match_after, Some(chrono::Duration::hours(72)));
        assert!(sweep.delete_after_feedback.is_none());
    }

    #[test]
    fn rejects_non_numeric_durations() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SWAP_UNAPPROVED_MATCH_HOURS", "soon");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
