//! Configuration loading and resolution
//!
//! Every setting follows the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: a warning is logged and the
//! compiled defaults are used. A config file that exists but does not
//! parse is a configuration error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "CERTTRACK_CONFIG";
/// Environment variable overriding the database path
pub const ENV_DATABASE: &str = "CERTTRACK_DATABASE";
/// Environment variable overriding the curriculum definition path
pub const ENV_CURRICULUM: &str = "CERTTRACK_CURRICULUM";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_folder: PathBuf,
    pub write_timeout_ms: u64,
    pub idempotency_window_secs: u64,
    pub event_bus_capacity: usize,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            data_folder: default_data_folder(),
            write_timeout_ms: 5000,
            idempotency_window_secs: 600,
            event_bus_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

/// Contents of a `config.toml` file; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub curriculum_path: Option<PathBuf>,
    pub write_timeout_ms: Option<u64>,
    pub idempotency_window_secs: Option<u64>,
    pub event_bus_capacity: Option<usize>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse a config file. I/O errors and parse errors are both reported.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }
}

/// Fully resolved engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub curriculum_path: PathBuf,
    pub write_timeout_ms: u64,
    pub idempotency_window_secs: u64,
    pub event_bus_capacity: usize,
    pub log_level: String,
}

impl EngineConfig {
    pub fn write_timeout(&self) -> Duration {
        crate::time::millis_to_duration(self.write_timeout_ms)
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_secs(self.idempotency_window_secs)
    }
}

/// Resolves an [`EngineConfig`] from CLI arguments, environment and config file
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    pub cli_config_file: Option<PathBuf>,
    pub cli_database: Option<PathBuf>,
    pub cli_curriculum: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.cli_config_file = path;
        self
    }

    pub fn with_database(mut self, path: Option<PathBuf>) -> Self {
        self.cli_database = path;
        self
    }

    pub fn with_curriculum(mut self, path: Option<PathBuf>) -> Self {
        self.cli_curriculum = path;
        self
    }

    /// Resolve using the process environment
    pub fn resolve(&self) -> Result<EngineConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using the supplied environment lookup
    pub fn resolve_with<F>(&self, env: F) -> Result<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CompiledDefaults::for_current_platform();
        let file = self.load_toml(&env)?;

        let database_path = self
            .cli_database
            .clone()
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or_else(|| file.database_path.clone())
            .unwrap_or_else(|| defaults.data_folder.join("certtrack.db"));

        let curriculum_path = self
            .cli_curriculum
            .clone()
            .or_else(|| env(ENV_CURRICULUM).map(PathBuf::from))
            .or_else(|| file.curriculum_path.clone())
            .unwrap_or_else(|| defaults.data_folder.join("curriculum.toml"));

        let config = EngineConfig {
            database_path,
            curriculum_path,
            write_timeout_ms: file.write_timeout_ms.unwrap_or(defaults.write_timeout_ms),
            idempotency_window_secs: file
                .idempotency_window_secs
                .unwrap_or(defaults.idempotency_window_secs),
            event_bus_capacity: file.event_bus_capacity.unwrap_or(defaults.event_bus_capacity),
            log_level: file.log_level.unwrap_or(defaults.log_level),
        };

        validate(&config)?;
        Ok(config)
    }

    fn load_toml<F>(&self, env: &F) -> Result<TomlConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = self
            .cli_config_file
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => match find_config_file() {
                Some(path) => path,
                None => {
                    debug!("No config file found, using compiled defaults");
                    return Ok(TomlConfig::default());
                }
            },
        };

        match TomlConfig::from_file(&path) {
            Ok(config) => {
                debug!("Loaded config file: {}", path.display());
                Ok(config)
            }
            Err(Error::Io(e)) => {
                warn!("Config file {} not readable ({}), using defaults", path.display(), e);
                Ok(TomlConfig::default())
            }
            Err(e) => Err(e),
        }
    }
}

fn validate(config: &EngineConfig) -> Result<()> {
    if config.write_timeout_ms == 0 {
        return Err(Error::Config("write_timeout_ms must be greater than zero".to_string()));
    }
    if config.event_bus_capacity == 0 {
        return Err(Error::Config("event_bus_capacity must be greater than zero".to_string()));
    }
    Ok(())
}

/// Look for a config file in the per-user then system-wide location
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("certtrack").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/certtrack/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default data folder path
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/certtrack (or /var/lib/certtrack for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("certtrack"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/certtrack"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("certtrack"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/certtrack"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("certtrack"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\certtrack"))
    } else {
        PathBuf::from("./certtrack_data")
    }
}
