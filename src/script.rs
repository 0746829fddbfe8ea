//! Script and directory resolution.
//!
//! Resolves the on-disk location of the generation script, the server
//! installation directory, and the script cache directory. Paths are
//! expanded for environment variables and `~`, then made absolute. A wrong
//! basename or a missing file is "unavailable", not a fatal error.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ProviderConfig;
use crate::registry::RuntimeVariant;

/// Relative path from the user's home to the default server installation.
const DEFAULT_SERVER_HOME: &[&str] = &["bgutil-ytdlp-pot-provider", "server"];

/// Subdirectory under the platform cache dir used by the script.
const CACHE_SUBDIR: &str = "bgutil-ytdlp-pot-provider";

/// Paths resolved once per provider instance and stable for its lifetime.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Resolved runtime executable, `None` when the runtime is not installed.
    pub runtime_path: Option<PathBuf>,
    /// Absolute path to the generation script (existence not implied).
    pub script_path: PathBuf,
    /// Server installation directory.
    pub server_home: PathBuf,
    /// Cache directory granted to the script.
    pub script_cache_dir: PathBuf,
}

impl ResolvedPaths {
    /// Resolve all paths for a variant from configuration and environment.
    ///
    /// Returns `None` when an explicit script path has the wrong basename
    /// for this variant.
    pub fn resolve(variant: &RuntimeVariant, config: &ProviderConfig) -> Option<ResolvedPaths> {
        let script_path = locate_script(variant, config)?;
        let server_home = server_home(config);
        let script_cache_dir = script_cache_dir(&server_home);
        let runtime_path =
            crate::runtime::resolve_runtime(variant, config.runtime_path.as_deref());

        Some(ResolvedPaths {
            runtime_path,
            script_path,
            server_home,
            script_cache_dir,
        })
    }
}

/// Resolve the script path for a variant.
///
/// Priority: explicit `script_path` config (basename-validated), else the
/// server home joined with the variant's fixed relative subpath.
pub fn locate_script(variant: &RuntimeVariant, config: &ProviderConfig) -> Option<PathBuf> {
    if let Some(raw) = &config.script_path {
        let path = absolutize(&expand_path(raw));
        if path.file_name() != Some(OsStr::new(variant.script_basename)) {
            tracing::warn!(
                "Configured script path has a wrong base name, expected {}: {}",
                variant.script_basename,
                path.display()
            );
            return None;
        }
        return Some(path);
    }

    let mut path = server_home(config);
    for component in variant.script_subpath {
        path.push(component);
    }
    Some(path)
}

/// Resolve the server installation directory.
///
/// Priority: explicit `server_home` config, else the grandparent of an
/// explicit script path, else `~/bgutil-ytdlp-pot-provider/server`.
pub fn server_home(config: &ProviderConfig) -> PathBuf {
    if let Some(home) = &config.server_home {
        return absolutize(&expand_path(home));
    }

    if let Some(script) = &config.script_path {
        let script = absolutize(&expand_path(script));
        if let Some(grandparent) = script.parent().and_then(Path::parent) {
            return grandparent.to_path_buf();
        }
    }

    let default = home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_SERVER_HOME.iter().collect::<PathBuf>());
    tracing::debug!("No script path configured, defaulting to {}", default.display());
    default
}

/// Cache directory granted to the script: the platform cache directory,
/// falling back to the server home when no cache directory exists.
pub fn script_cache_dir(server_home: &Path) -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.cache_dir().join(CACHE_SUBDIR))
        .unwrap_or_else(|| server_home.to_path_buf())
}

/// Expand `~`, `$VAR`, `${VAR}`, and `%VAR%` in a user-supplied path.
pub fn expand_path(path: &Path) -> PathBuf {
    static VAR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)|%([A-Za-z_][A-Za-z0-9_]*)%")
            .expect("valid expansion pattern")
    });

    let raw = path.to_string_lossy();
    let expanded = VAR.replace_all(&raw, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    if let Some(rest) = expanded.strip_prefix("~") {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = home_dir() {
                return home.join(rest.trim_start_matches(['/', '\\']));
            }
        }
    }

    PathBuf::from(expanded.as_ref())
}

/// Make a path absolute relative to the current directory.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_default()
            .join(path)
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf())
}
