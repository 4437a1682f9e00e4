//! Service configuration, loaded from `tillscan.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the preferred listen port.
pub const PORT_ENV: &str = "TILLSCAN_PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Settings for the scan ingestion service. Every field has a default, so
/// an empty (or absent) config file is a fully working configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First port tried by the allocator.
    #[serde(default = "default_preferred_port")]
    pub preferred_port: u16,
    /// How many consecutive ports to probe before giving up.
    #[serde(default = "default_port_attempts")]
    pub max_port_attempts: u16,
    /// Skip credential provisioning and serve plain HTTP.
    #[serde(default)]
    pub force_plaintext: bool,
    /// Client-side resubmission window for a repeated code, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Where cached transport credentials live. Defaults to the per-user
    /// data directory.
    #[serde(default)]
    pub credential_dir: Option<PathBuf>,
    /// External tool invoked by the primary credential strategy.
    #[serde(default = "default_tls_tool")]
    pub tls_tool: String,
}

const fn default_preferred_port() -> u16 {
    8080
}

const fn default_port_attempts() -> u16 {
    10
}

const fn default_cooldown_secs() -> u64 {
    5
}

fn default_tls_tool() -> String {
    "openssl".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preferred_port: default_preferred_port(),
            max_port_attempts: default_port_attempts(),
            force_plaintext: false,
            cooldown_secs: default_cooldown_secs(),
            credential_dir: None,
            tls_tool: default_tls_tool(),
        }
    }
}

impl ScanConfig {
    /// Reads and parses `path`, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Applies `TILLSCAN_PORT` when set to a valid port number.
    pub fn apply_env(&mut self) {
        self.apply_port_override(std::env::var(PORT_ENV).ok().as_deref());
    }

    fn apply_port_override(&mut self, value: Option<&str>) {
        if let Some(raw) = value
            && let Ok(port) = raw.trim().parse()
        {
            self.preferred_port = port;
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Resolved credential directory, falling back to the per-user data dir.
    pub fn credential_dir(&self) -> PathBuf {
        self.credential_dir
            .clone()
            .unwrap_or_else(default_credential_dir)
    }
}

fn default_credential_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "tillscan", "tillscan")
        .map(|dirs| dirs.data_local_dir().join("certs"))
        .unwrap_or_else(|| PathBuf::from(".tillscan/certs"))
}
