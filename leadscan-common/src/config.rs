//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (applied by the binary on top of the loaded config)
//! 2. Environment variable (`LEADSCAN_*`)
//! 3. TOML config file
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "LEADSCAN_ROOT_FOLDER";
/// Environment variable overriding the listen host
pub const ENV_HOST: &str = "LEADSCAN_HOST";
/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "LEADSCAN_PORT";
/// Environment variable overriding the per-stage deadline
pub const ENV_STAGE_TIMEOUT_SECS: &str = "LEADSCAN_STAGE_TIMEOUT_SECS";
/// Environment variable overriding the watchdog staleness cutoff
pub const ENV_STALE_AFTER_SECS: &str = "LEADSCAN_STALE_AFTER_SECS";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "LEADSCAN_LOG_LEVEL";

const DATABASE_FILE_NAME: &str = "leadscan.db";

/// Complete service configuration as read from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Folder holding the database and other service state
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

/// SQLite settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database file; defaults to `<root_folder>/leadscan.db`
    pub path: Option<PathBuf>,
    /// Upper bound on retrying a write that hit lock contention
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: 5000,
        }
    }
}

/// Scan pipeline supervision settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Deadline for a single stage invocation
    pub stage_timeout_secs: u64,
    /// How often the watchdog looks for wedged jobs
    pub watchdog_interval_secs: u64,
    /// A non-terminal job not updated for this long is force-failed
    pub stale_after_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 60,
            watchdog_interval_secs: 15,
            stale_after_secs: 300,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from TOML, then apply environment overrides.
    ///
    /// An explicit `path` must exist and parse. Without one, the platform
    /// config file is used when present; a missing file is not an error and
    /// yields compiled defaults. Logs nothing, since it runs before the
    /// subscriber is installed; report `config_source` afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::config_source(path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// File `load` reads for `path`, or `None` when it uses compiled defaults
    pub fn config_source(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        }
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Apply `LEADSCAN_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var(ENV_ROOT_FOLDER) {
            self.root_folder = Some(PathBuf::from(root));
        }
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = env_parse(ENV_PORT)? {
            self.server.port = port;
        }
        if let Some(secs) = env_parse(ENV_STAGE_TIMEOUT_SECS)? {
            self.scan.stage_timeout_secs = secs;
        }
        if let Some(secs) = env_parse(ENV_STALE_AFTER_SECS)? {
            self.scan.stale_after_secs = secs;
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scan.stage_timeout_secs == 0 {
            return Err(Error::Config("scan.stage_timeout_secs must be > 0".to_string()));
        }
        if self.scan.watchdog_interval_secs == 0 {
            return Err(Error::Config("scan.watchdog_interval_secs must be > 0".to_string()));
        }
        if self.scan.stale_after_secs <= self.scan.stage_timeout_secs {
            return Err(Error::Config(
                "scan.stale_after_secs must exceed scan.stage_timeout_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Root folder from config, falling back to the OS default
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
    }

    /// Database file location
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.root_folder().join(DATABASE_FILE_NAME))
    }

    /// Create the root folder if it is missing
    pub fn ensure_root_folder(&self) -> Result<PathBuf> {
        let root = self.root_folder();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
            info!("Created root folder: {}", root.display());
        }
        Ok(root)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Platform config file: `<config_dir>/leadscan/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("leadscan").join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("leadscan"))
        .unwrap_or_else(|| PathBuf::from("./leadscan_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5780);
        assert_eq!(config.scan.stage_timeout_secs, 60);
    }

    #[test]
    fn database_path_follows_root_folder() {
        let config = ServiceConfig {
            root_folder: Some(PathBuf::from("/srv/leadscan")),
            ..Default::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/srv/leadscan/leadscan.db"));
    }

    #[test]
    fn stale_cutoff_must_exceed_stage_timeout() {
        let mut config = ServiceConfig::default();
        config.scan.stale_after_secs = config.scan.stage_timeout_secs;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
