use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::Duration;

const DEVELOPMENT_SECRET: &str = "dossier-flow-development-secret-change-me";
const MIN_SECRET_BYTES: usize = 32;
const DEFAULT_MAIL_FROM: &str = "Dossiers OPCO <no-reply@dossiers.local>";

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

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub uploads: UploadConfig,
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

        let database = DatabaseConfig {
            path: env::var("DATABASE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };

        let auth = AuthConfig::from_env(environment)?;

        let mail = MailConfig {
            from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| DEFAULT_MAIL_FROM.to_string()),
        };

        let uploads = UploadConfig {
            max_bytes: parse_number("UPLOAD_MAX_BYTES", UploadConfig::DEFAULT_MAX_BYTES)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database,
            auth,
            mail,
            uploads,
        })
    }

    /// In-memory development settings, independent of the environment.
    pub fn development() -> Self {
        Self {
            environment: AppEnvironment::Development,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            database: DatabaseConfig::default(),
            auth: AuthConfig::development(),
            mail: MailConfig {
                from: DEFAULT_MAIL_FROM.to_string(),
            },
            uploads: UploadConfig::default(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { key }),
        },
        Err(_) => Ok(default),
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

/// Location of the SQLite database. `None` keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// Session signing and cookie settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    pub session_ttl: Duration,
    pub refresh_ttl: Duration,
    pub cookie_secure: bool,
}

impl AuthConfig {
    fn from_env(environment: AppEnvironment) -> Result<Self, ConfigError> {
        let session_secret = match env::var("SESSION_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment.is_production() => {
                return Err(ConfigError::MissingSessionSecret)
            }
            Err(_) => DEVELOPMENT_SECRET.to_string(),
        };
        if session_secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSessionSecret);
        }

        let session_minutes: i64 = parse_number("SESSION_TTL_MINUTES", 15)?;
        let refresh_days: i64 = parse_number("REFRESH_TTL_DAYS", 30)?;
        if session_minutes <= 0 || refresh_days <= 0 {
            return Err(ConfigError::InvalidTtl);
        }

        Ok(Self {
            session_secret,
            session_ttl: Duration::minutes(session_minutes),
            refresh_ttl: Duration::days(refresh_days),
            cookie_secure: parse_flag("COOKIE_SECURE", environment.is_production())?,
        })
    }

    /// Configuration suitable for unit tests and local demos.
    pub fn development() -> Self {
        Self {
            session_secret: DEVELOPMENT_SECRET.to_string(),
            session_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            cookie_secure: false,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_secret", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

/// Outbound e-mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
}

/// Document upload limits.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl UploadConfig {
    pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
    InvalidFlag { key: &'static str },
    InvalidTtl,
    MissingSessionSecret,
    WeakSessionSecret,
    MissingDatabasePath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => write!(f, "{key} must be a positive number"),
            ConfigError::InvalidFlag { key } => write!(f, "{key} must be true or false"),
            ConfigError::InvalidTtl => {
                write!(f, "SESSION_TTL_MINUTES and REFRESH_TTL_DAYS must be positive")
            }
            ConfigError::MissingSessionSecret => {
                write!(f, "SESSION_SECRET is required in production")
            }
            ConfigError::WeakSessionSecret => write!(
                f,
                "SESSION_SECRET must be at least {MIN_SECRET_BYTES} bytes long"
            ),
            ConfigError::MissingDatabasePath => {
                write!(f, "DATABASE_PATH is required for this command")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
