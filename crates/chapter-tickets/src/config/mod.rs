use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

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
    pub authorization: AuthorizationConfig,
    pub storage: StorageConfig,
    pub roster: RosterConfig,
}

const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 2_000;

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

        let raw_offset = env::var("SCHEDULE_UTC_OFFSET").unwrap_or_else(|_| "+00:00".to_string());
        let schedule_offset = raw_offset
            .trim()
            .parse::<FixedOffset>()
            .map_err(|_| ConfigError::InvalidScheduleOffset { value: raw_offset })?;

        let commit_timeout = match env::var("COMMIT_TIMEOUT_MS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(millis) if millis > 0 => Duration::from_millis(millis),
                _ => return Err(ConfigError::InvalidCommitTimeout { value: raw }),
            },
            Err(_) => Duration::from_millis(DEFAULT_COMMIT_TIMEOUT_MS),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            authorization: AuthorizationConfig {
                schedule_offset,
                commit_timeout,
            },
            storage: StorageConfig {
                requests_path: optional_path("REQUESTS_PATH"),
            },
            roster: RosterConfig {
                matches_csv: optional_path("ROSTER_MATCHES_CSV"),
                members_csv: optional_path("ROSTER_MEMBERS_CSV"),
            },
        })
    }
}

fn optional_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
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

/// Window arithmetic and commit bounds for chapter submissions.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Offset in which match window dates and times are written.
    pub schedule_offset: FixedOffset,
    pub commit_timeout: Duration,
}

/// Where persisted requests live. `None` keeps them in memory only.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub requests_path: Option<PathBuf>,
}

/// Optional CSV seeds for the match and member directories.
#[derive(Debug, Clone, Default)]
pub struct RosterConfig {
    pub matches_csv: Option<PathBuf>,
    pub members_csv: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidScheduleOffset { value: String },
    InvalidCommitTimeout { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidScheduleOffset { value } => write!(
                f,
                "SCHEDULE_UTC_OFFSET must look like +01:00 or -03:00 (found '{}')",
                value
            ),
            ConfigError::InvalidCommitTimeout { value } => write!(
                f,
                "COMMIT_TIMEOUT_MS must be a positive number of milliseconds (found '{}')",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidScheduleOffset { .. }
            | ConfigError::InvalidCommitTimeout { .. } => None,
        }
    }
}
