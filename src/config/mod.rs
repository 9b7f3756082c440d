use std::env;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;

use crate::workflows::weeding::WeedingConfig;

/// Distinguishes runtime behavior for different stages of the batch job.
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
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub weeding: WeedingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let storage = StorageConfig {
            ledger_path: path_var("WEED_LEDGER_PATH", "discards.db"),
            pending_path: path_var("WEED_PENDING_PATH", "discards.pending"),
            lock_path: path_var("WEED_LOCK_PATH", "discards.lock"),
        };

        let catalog = CatalogConfig {
            command: env::var("WEED_CATALOG_CMD").ok().filter(|v| !v.trim().is_empty()),
            timeout_secs: parse_var("WEED_CATALOG_TIMEOUT_SECS", 300u64, |raw, source| {
                ConfigError::InvalidTimeout {
                    value: raw,
                    source,
                }
            })?,
        };

        let defaults = WeedingConfig::default();
        let weeding = WeedingConfig {
            item_quota: parse_var("WEED_ITEM_QUOTA", defaults.item_quota, |raw, source| {
                ConfigError::InvalidQuota { value: raw, source }
            })?,
            quota_fudge_factor: fudge_var("WEED_QUOTA_FUDGE", defaults.quota_fudge_factor)?,
            card_marker: env::var("WEED_CARD_MARKER").unwrap_or(defaults.card_marker),
            staging_location: env::var("WEED_STAGING_LOCATION").unwrap_or(defaults.staging_location),
            non_viable_locations: list_var("WEED_NON_VIABLE_LOCATIONS")
                .map(|values| values.into_iter().collect())
                .unwrap_or(defaults.non_viable_locations),
            reset_denylist: list_var("WEED_RESET_DENYLIST").unwrap_or(defaults.reset_denylist),
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            storage,
            catalog,
            weeding,
        })
    }
}

/// Paths to the ledger and the run-scoped scratch artifacts.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub ledger_path: PathBuf,
    pub pending_path: PathBuf,
    pub lock_path: PathBuf,
}

/// How to reach the site's catalog query toolchain.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub command: Option<String>,
    pub timeout_secs: u64,
}

impl CatalogConfig {
    /// The configured query command, or an error when a command is required.
    pub fn require_command(&self) -> Result<&str, ConfigError> {
        self.command
            .as_deref()
            .ok_or(ConfigError::MissingCatalogCommand)
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

fn path_var(name: &str, default: &str) -> PathBuf {
    env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn list_var(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    Some(
        raw.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
    )
}

fn parse_var<T, F>(name: &str, default: T, build_err: F) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = ParseIntError>,
    F: FnOnce(String, ParseIntError) -> ConfigError,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|source| build_err(raw, source)),
        Err(_) => Ok(default),
    }
}

fn fudge_var(name: &str, default: f32) -> Result<f32, ConfigError> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<f32>()
                .map_err(|source| ConfigError::InvalidFudge {
                    value: raw.clone(),
                    source,
                })?;
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::FudgeOutOfRange { value });
            }
            Ok(value)
        }
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidQuota { value: String, source: ParseIntError },
    InvalidTimeout { value: String, source: ParseIntError },
    InvalidFudge { value: String, source: ParseFloatError },
    FudgeOutOfRange { value: f32 },
    MissingCatalogCommand,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidQuota { value, .. } => {
                write!(f, "WEED_ITEM_QUOTA must be a whole number, got '{value}'")
            }
            ConfigError::InvalidTimeout { value, .. } => {
                write!(f, "WEED_CATALOG_TIMEOUT_SECS must be a whole number, got '{value}'")
            }
            ConfigError::InvalidFudge { value, .. } => {
                write!(f, "WEED_QUOTA_FUDGE must be a decimal fraction, got '{value}'")
            }
            ConfigError::FudgeOutOfRange { value } => {
                write!(f, "WEED_QUOTA_FUDGE must be a non-negative finite fraction, got {value}")
            }
            ConfigError::MissingCatalogCommand => {
                write!(f, "WEED_CATALOG_CMD must point at the catalog query toolchain")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidQuota { source, .. } => Some(source),
            ConfigError::InvalidTimeout { source, .. } => Some(source),
            ConfigError::InvalidFudge { source, .. } => Some(source),
            ConfigError::FudgeOutOfRange { .. } => None,
            ConfigError::MissingCatalogCommand => None,
        }
    }
}
