//! Runtime variant descriptors and preference ranking.
//!
//! Each supported script-runtime is a row in a data table rather than a
//! subclass: adding a runtime means registering another [`RuntimeVariant`].
//! The registry is an explicit object populated by builder calls at startup;
//! nothing registers itself as a side effect.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::config::{ProviderConfig, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_PROBE_TIMEOUT_SECS};
use crate::script::ResolvedPaths;
use crate::version::VersionTuple;

/// One concrete (runtime kind, script) pairing with its version requirements
/// and invocation conventions. Created once at startup; never mutated.
#[derive(Clone)]
pub struct RuntimeVariant {
    /// Registry key, e.g. `node`.
    pub name: &'static str,
    /// Human-readable runtime name for diagnostics, e.g. `Node.js`.
    pub display_name: &'static str,
    /// Executable identifier searched for on the system.
    pub executable_id: &'static str,
    /// Pattern applied to `--version` output; capture group 1 is the version.
    pub version_pattern: Regex,
    /// Minimum runtime version.
    pub min_version: VersionTuple,
    /// Minimum script version, when the script reports one worth gating on.
    pub min_script_version: Option<VersionTuple>,
    /// Exact basename the script file must have.
    pub script_basename: &'static str,
    /// Relative subpath from the server home to the script.
    pub script_subpath: &'static [&'static str],
    /// Wall-clock budget for `--version` probes.
    pub probe_timeout: Duration,
    /// Wall-clock budget for token generation, which performs network I/O.
    pub exec_timeout: Duration,
    runtime_args: fn(&ResolvedPaths) -> Vec<OsString>,
    preference: fn(&ProviderConfig) -> i32,
}

impl RuntimeVariant {
    /// Runtime-level arguments inserted before the script path.
    pub fn runtime_args(&self, paths: &ResolvedPaths) -> Vec<OsString> {
        (self.runtime_args)(paths)
    }

    /// Preference weight under the given configuration; higher wins.
    pub fn preference(&self, config: &ProviderConfig) -> i32 {
        (self.preference)(config)
    }
}

impl fmt::Debug for RuntimeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeVariant")
            .field("name", &self.name)
            .field("executable_id", &self.executable_id)
            .field("min_version", &self.min_version)
            .field("script_basename", &self.script_basename)
            .finish_non_exhaustive()
    }
}

/// Registry of runtime variants, in registration order.
#[derive(Debug, Default, Clone)]
pub struct VariantRegistry {
    variants: Vec<Arc<RuntimeVariant>>,
}

impl VariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        VariantRegistry::default()
    }

    /// Register a variant, preserving registration order.
    pub fn register(mut self, variant: RuntimeVariant) -> Self {
        self.variants.push(Arc::new(variant));
        self
    }

    /// The built-in table: Node.js and Deno.
    pub fn builtin() -> Self {
        VariantRegistry::new()
            .register(node_variant())
            .register(deno_variant())
    }

    /// All registered variants in registration order.
    pub fn variants(&self) -> &[Arc<RuntimeVariant>] {
        &self.variants
    }

    /// Look up a variant by name.
    pub fn get(&self, name: &str) -> Option<Arc<RuntimeVariant>> {
        self.variants.iter().find(|v| v.name == name).cloned()
    }

    /// Variants ordered by descending preference weight, ties broken by
    /// registration order.
    pub fn ranked(&self, config: &ProviderConfig) -> Vec<Arc<RuntimeVariant>> {
        let mut ranked = self.variants.clone();
        // sort_by is stable, so equal weights keep registration order.
        ranked.sort_by_key(|v| std::cmp::Reverse(v.preference(config)));
        ranked
    }
}

fn node_variant() -> RuntimeVariant {
    RuntimeVariant {
        name: "node",
        display_name: "Node.js",
        executable_id: "node",
        version_pattern: Regex::new(r"^v(\S+)").expect("valid node version pattern"),
        min_version: VersionTuple::from([20, 0, 0]),
        min_script_version: None,
        script_basename: "generate_once.js",
        script_subpath: &["build", "generate_once.js"],
        probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        runtime_args: |_| Vec::new(),
        preference: |config| if config.prefer_node { 10 } else { 1 },
    }
}

fn deno_variant() -> RuntimeVariant {
    RuntimeVariant {
        name: "deno",
        display_name: "Deno",
        executable_id: "deno",
        version_pattern: Regex::new(r"^deno (\S+)").expect("valid deno version pattern"),
        min_version: VersionTuple::from([2, 0, 0]),
        min_script_version: None,
        script_basename: "generate_once.ts",
        script_subpath: &["src", "generate_once.ts"],
        probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        runtime_args: deno_runtime_args,
        preference: |config| if config.prefer_node { 1 } else { 10 },
    }
}

/// Deno sandbox flags: explicit allow-lists scoped to the server home and
/// the script cache directory. Never a blanket `-A` grant.
fn deno_runtime_args(paths: &ResolvedPaths) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("--unstable-sloppy-imports"),
        OsString::from("--allow-env"),
        OsString::from("--allow-net"),
    ];

    let mut ffi = OsString::from("--allow-ffi=");
    ffi.push(paths.server_home.as_os_str());
    args.push(ffi);

    let mut read = OsString::from("--allow-read=");
    read.push(paths.script_cache_dir.as_os_str());
    read.push(",");
    read.push(paths.server_home.as_os_str());
    args.push(read);

    let mut write = OsString::from("--allow-write=");
    write.push(paths.script_cache_dir.as_os_str());
    args.push(write);

    args
}
