//! Configuration for the script-backed token provider.
//!
//! The provider reads a small, typed configuration resolved once at
//! construction. It can be loaded from a TOML file at
//! `~/.potshim/config.toml` or supplied directly by the host.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default wall-clock timeout for `--version` probes, in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Default wall-clock timeout for token generation, in seconds.
///
/// Materially larger than the probe timeout: generation performs network I/O.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Provider configuration.
///
/// Every field has a defined default; an absent config file is equivalent to
/// `ProviderConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Explicit path to the generation script. Must end in the variant's
    /// exact basename; a mismatch makes the variant unavailable.
    pub script_path: Option<PathBuf>,

    /// Override for the server installation directory. When unset it is
    /// derived from `script_path`'s grandparent, or a home-directory default.
    pub server_home: Option<PathBuf>,

    /// Explicit path to the script-runtime executable, or a directory
    /// containing it. Skips the PATH search.
    pub runtime_path: Option<PathBuf>,

    /// Prefer the Node.js variant over Deno when both are available.
    pub prefer_node: bool,

    /// Override for the `--version` probe timeout, in seconds. Each variant
    /// carries its own default.
    pub probe_timeout_secs: Option<u64>,

    /// Override for the token-generation timeout, in seconds.
    pub exec_timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            script_path: None,
            server_home: None,
            runtime_path: None,
            prefer_node: false,
            probe_timeout_secs: None,
            exec_timeout_secs: None,
        }
    }
}

impl ProviderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist
    /// or fails to parse.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Load the global config file, or defaults when it is absent or the
    /// home directory cannot be determined.
    pub fn load_global() -> Self {
        match global_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }

        let contents =
            toml::to_string_pretty(self).with_context(|| "failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config: {}", path.display()))?;

        Ok(())
    }
}

/// Path to the global config file (`~/.potshim/config.toml`).
pub fn global_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".potshim").join("config.toml"))
}
