//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use fleetdir_core::{DEFAULT_TEST_HOST, HttpSettings, LockSettings, TokenTtl};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Program and leading arguments used to run the fleet tool.
    pub command: Vec<String>,

    /// Lifetime requested for cached tokens.
    pub token_ttl: TokenTtl,

    pub lock_timeout_ms: u64,
    pub lock_retry_ms: u64,

    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Directory host whose devices use the test minion prefix.
    pub test_host: String,

    /// Logging level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        let lock = LockSettings::default();
        let http = HttpSettings::default();

        Self {
            command: vec!["sudo".to_string(), "salt".to_string()],
            token_ttl: TokenTtl::default(),
            lock_timeout_ms: lock.timeout.as_millis() as u64,
            lock_retry_ms: lock.retry_interval.as_millis() as u64,
            connect_timeout_secs: http.connect_timeout.as_secs(),
            request_timeout_secs: http.request_timeout.as_secs(),
            test_host: DEFAULT_TEST_HOST.to_string(),
            log_level: "warn".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            retry_interval: Duration::from_millis(self.lock_retry_ms.max(1)),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..HttpSettings::default()
        }
    }
}

/// Load configuration from `path`, or the default location, falling back to defaults.
///
/// An explicitly given path must exist.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let (config_path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let mut config = if required || config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    anyhow::ensure!(
        !config.command.is_empty(),
        "`command` in {:?} must name a program",
        config_path
    );

    config.config_path = config_path;
    Ok(config)
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("org", "fleetdir", "fleetdir")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("fleetdir.toml"))
}
