//! Script-runtime discovery and version gating.
//!
//! Locates the runtime executable (explicit override, npm prefix directory,
//! Windows extension scan, PATH lookup) and gates it behind a `--version`
//! probe against the variant's minimum version. A missing or too-old
//! runtime is a normal outcome, reported through tracing, never an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use crate::invoke::{InvocationOutcome, ProcessBuilder};
use crate::registry::RuntimeVariant;
use crate::script::{absolutize, expand_path};
use crate::version::VersionTuple;

/// Resolve the runtime executable for a variant.
///
/// Priority:
/// 1. explicit override (a directory gets the platform-qualified basename
///    appended, a file path is used as-is),
/// 2. the npm global prefix directory (`npm_config_prefix`),
/// 3. on Windows, a scan of the current executable's directory, the working
///    directory, and PATH entries against `PATHEXT`-style extensions,
/// 4. a PATH lookup.
///
/// Returns `None` when no step finds the executable, so callers can report
/// "runtime not installed" distinctly from a later spawn failure.
pub fn resolve_runtime(variant: &RuntimeVariant, override_path: Option<&Path>) -> Option<PathBuf> {
    let exec_id = variant.executable_id;

    if let Some(raw) = override_path {
        let path = absolutize(&expand_path(raw));
        let resolved = if path.is_dir() {
            path.join(qualified_basename(exec_id))
        } else {
            path
        };
        tracing::debug!(
            "Using configured {} executable: {}",
            variant.display_name,
            resolved.display()
        );
        return Some(resolved);
    }

    if let Some(found) = find_in_npm_prefix(exec_id) {
        return Some(found);
    }

    #[cfg(windows)]
    if let Some(found) = scan_candidate_dirs(exec_id) {
        return Some(found);
    }

    match which::which(exec_id) {
        Ok(path) => Some(path),
        Err(_) => {
            tracing::debug!("{} executable not found on PATH", variant.display_name);
            None
        }
    }
}

/// Check the npm global prefix for the executable.
fn find_in_npm_prefix(exec_id: &str) -> Option<PathBuf> {
    let prefix = std::env::var_os("npm_config_prefix")?;
    let dir = if cfg!(windows) {
        PathBuf::from(&prefix)
    } else {
        PathBuf::from(&prefix).join("bin")
    };
    let candidate = dir.join(qualified_basename(exec_id));
    if candidate.is_file() {
        tracing::debug!("Found {} in npm prefix: {}", exec_id, candidate.display());
        return Some(candidate);
    }
    None
}

/// Scan candidate directories for `exec_id` with executable extensions,
/// deduplicating directories by canonicalized, case-normalized form.
#[cfg(windows)]
fn scan_candidate_dirs(exec_id: &str) -> Option<PathBuf> {
    use std::collections::HashSet;

    let extensions = executable_extensions();

    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(parent) = std::env::current_exe().ok().and_then(|p| {
        p.parent().map(Path::to_path_buf)
    }) {
        dirs.push(parent);
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }

    let mut seen = HashSet::new();
    for dir in dirs {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.clone());
        if !seen.insert(canonical.to_string_lossy().to_lowercase()) {
            continue;
        }
        for ext in &extensions {
            let candidate = dir.join(format!("{exec_id}{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Executable extensions from `PATHEXT`, or the fixed fallback list.
#[cfg(windows)]
fn executable_extensions() -> Vec<String> {
    match std::env::var("PATHEXT") {
        Ok(pathext) if !pathext.trim().is_empty() => pathext
            .split(';')
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect(),
        _ => [".COM", ".EXE", ".BAT", ".CMD"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

fn qualified_basename(exec_id: &str) -> String {
    if cfg!(windows) {
        format!("{exec_id}.exe")
    } else {
        exec_id.to_string()
    }
}

/// Extract a version tuple from probe output using a variant's pattern.
pub fn extract_version(pattern: &Regex, output: &str) -> Option<VersionTuple> {
    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| VersionTuple::parse(m.as_str()))
}

/// Probe a runtime executable with `--version` and gate it against the
/// variant's minimum version.
///
/// Timeout, spawn failure, nonzero exit, pattern mismatch, or a version
/// below the minimum all yield `None` with a diagnostic.
pub fn probe_runtime(
    variant: &RuntimeVariant,
    runtime: &Path,
    timeout: Duration,
) -> Option<VersionTuple> {
    let builder = ProcessBuilder::new(runtime, timeout).arg("--version");
    let outcome = match builder.run() {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(
                "Failed to check {} version: {}",
                variant.display_name,
                e
            );
            return None;
        }
    };

    let combined = outcome.combined_output();
    let version = match extract_version(&variant.version_pattern, &combined) {
        Some(version) if outcome.success() => version,
        _ => {
            tracing::warn!(
                "Failed to check {} version. {} returned {:?} exit status. \
                 Process stdout: {}; stderr: {}",
                variant.display_name,
                variant.display_name,
                outcome.exit_code,
                outcome.stdout.trim(),
                outcome.stderr.trim()
            );
            return None;
        }
    };

    check_minimum(variant.display_name, &version, &variant.min_version).then_some(version)
}

/// Apply the minimum-version gate, logging the outcome.
pub fn check_minimum(name: &str, version: &VersionTuple, min: &VersionTuple) -> bool {
    if version.meets_minimum(min) {
        tracing::trace!("{} version: {}", name, version);
        true
    } else {
        tracing::warn!(
            "{} version too low (got {}, but at least {} is required)",
            name,
            version,
            min
        );
        false
    }
}

/// Gate the script itself using the outcome of a probe invocation.
///
/// A nonzero exit fails the gate. The trailing non-blank stdout line is the
/// script's reported version; it is compared against the variant's minimum
/// script version when one is set.
pub fn script_version_ok(variant: &RuntimeVariant, outcome: &InvocationOutcome) -> bool {
    if !outcome.success() {
        tracing::warn!(
            "Failed to check script version. Script returned {:?} exit status. \
             Script stdout: {}; Script stderr: {}",
            outcome.exit_code,
            outcome.stdout.trim(),
            outcome.stderr.trim()
        );
        return false;
    }

    let reported = outcome
        .stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();

    match &variant.min_script_version {
        Some(min) => check_minimum("script", &VersionTuple::parse(reported), min),
        None => {
            tracing::debug!("script version: {}", reported);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VariantRegistry;

    fn node_variant() -> std::sync::Arc<RuntimeVariant> {
        VariantRegistry::builtin().get("node").unwrap()
    }

    fn deno_variant() -> std::sync::Arc<RuntimeVariant> {
        VariantRegistry::builtin().get("deno").unwrap()
    }

    #[test]
    fn test_extract_version_node_pattern() {
        let variant = node_variant();
        let version = extract_version(&variant.version_pattern, "v20.5.1\n").unwrap();
        assert_eq!(version.components(), &[20, 5, 1]);
    }

    #[test]
    fn test_extract_version_deno_pattern() {
        let variant = deno_variant();
        let output = "deno 2.1.4 (stable, release, x86_64-unknown-linux-gnu)\nv8 13.0\n";
        let version = extract_version(&variant.version_pattern, output).unwrap();
        assert_eq!(version.components(), &[2, 1, 0]);
    }

    #[test]
    fn test_extract_version_no_match() {
        let variant = node_variant();
        assert!(extract_version(&variant.version_pattern, "usage: node [options]").is_none());
    }

    #[test]
    fn test_check_minimum() {
        assert!(check_minimum(
            "Node.js",
            &VersionTuple::parse("20.5.1"),
            &VersionTuple::from([20, 0, 0])
        ));
        assert!(!check_minimum(
            "Node.js",
            &VersionTuple::parse("v18.2.0"),
            &VersionTuple::from([20, 0, 0])
        ));
    }

    #[test]
    fn test_resolver_override_file_used_as_is() {
        let variant = node_variant();
        let resolved =
            resolve_runtime(&variant, Some(Path::new("/usr/local/bin/node"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/usr/local/bin/node"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolver_override_directory_appends_basename() {
        let tmp = tempfile::TempDir::new().unwrap();
        let variant = node_variant();
        let resolved = resolve_runtime(&variant, Some(tmp.path())).unwrap();
        assert_eq!(resolved, tmp.path().join("node"));
    }

    #[test]
    fn test_resolver_returns_none_when_executable_absent() {
        let mut variant = (*node_variant()).clone();
        variant.executable_id = "potshim-no-such-runtime";
        assert!(resolve_runtime(&variant, None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolver_finds_executable_on_path() {
        let mut variant = (*node_variant()).clone();
        variant.executable_id = "sh";
        let resolved = resolve_runtime(&variant, None).unwrap();
        assert!(resolved.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolver_checks_npm_prefix_before_path() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let exe = bin.join("potshim-npm-runtime");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut variant = (*node_variant()).clone();
        variant.executable_id = "potshim-npm-runtime";

        std::env::set_var("npm_config_prefix", tmp.path());
        let resolved = resolve_runtime(&variant, None);
        std::env::remove_var("npm_config_prefix");
        assert_eq!(resolved, Some(exe));

        // With the variable unset the prefix step is skipped and the
        // executable is not found anywhere else.
        assert!(resolve_runtime(&variant, None).is_none());
    }

    #[cfg(unix)]
    mod probe {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_runtime(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_probe_passes_at_minimum() {
            let tmp = tempfile::TempDir::new().unwrap();
            let runtime = fake_runtime(tmp.path(), "node", "echo 'v20.5.1'");
            let version =
                probe_runtime(&node_variant(), &runtime, Duration::from_secs(5)).unwrap();
            assert_eq!(version.components(), &[20, 5, 1]);
        }

        #[test]
        fn test_probe_rejects_below_minimum() {
            let tmp = tempfile::TempDir::new().unwrap();
            let runtime = fake_runtime(tmp.path(), "node", "echo 'v18.2.0'");
            assert!(probe_runtime(&node_variant(), &runtime, Duration::from_secs(5)).is_none());
        }

        #[test]
        fn test_probe_rejects_nonzero_exit() {
            let tmp = tempfile::TempDir::new().unwrap();
            let runtime = fake_runtime(tmp.path(), "node", "echo 'v20.5.1'; exit 1");
            assert!(probe_runtime(&node_variant(), &runtime, Duration::from_secs(5)).is_none());
        }

        #[test]
        fn test_probe_rejects_malformed_output() {
            let tmp = tempfile::TempDir::new().unwrap();
            let runtime = fake_runtime(tmp.path(), "node", "echo 'not a version'");
            assert!(probe_runtime(&node_variant(), &runtime, Duration::from_secs(5)).is_none());
        }

        #[test]
        fn test_probe_missing_executable() {
            let variant = node_variant();
            assert!(probe_runtime(
                &variant,
                Path::new("/nonexistent/bin/node"),
                Duration::from_secs(5)
            )
            .is_none());
        }

        #[test]
        fn test_probe_timeout_is_unavailable() {
            let tmp = tempfile::TempDir::new().unwrap();
            let runtime = fake_runtime(tmp.path(), "node", "sleep 30");
            assert!(probe_runtime(
                &node_variant(),
                &runtime,
                Duration::from_millis(200)
            )
            .is_none());
        }
    }

    #[test]
    fn test_script_gate_accepts_zero_exit() {
        let variant = node_variant();
        let outcome = InvocationOutcome {
            exit_code: Some(0),
            stdout: "1.2.0\n".to_string(),
            stderr: String::new(),
        };
        assert!(script_version_ok(&variant, &outcome));
    }

    #[test]
    fn test_script_gate_enforces_minimum_when_set() {
        let mut variant = (*node_variant()).clone();
        variant.min_script_version = Some(VersionTuple::from([1, 0, 0]));

        let below = InvocationOutcome {
            exit_code: Some(0),
            stdout: "0.9.0\n".to_string(),
            stderr: String::new(),
        };
        assert!(!script_version_ok(&variant, &below));

        let at_minimum = InvocationOutcome {
            exit_code: Some(0),
            stdout: "1.2.0\n".to_string(),
            stderr: String::new(),
        };
        assert!(script_version_ok(&variant, &at_minimum));
    }

    #[test]
    fn test_script_gate_rejects_nonzero_exit() {
        let variant = node_variant();
        let outcome = InvocationOutcome {
            exit_code: Some(1),
            stdout: "1.2.0\n".to_string(),
            stderr: "boom".to_string(),
        };
        assert!(!script_version_ok(&variant, &outcome));
    }
}
