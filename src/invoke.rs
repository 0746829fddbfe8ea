//! Child-process execution for runtime probes and token generation.
//!
//! Every spawn carries a mandatory wall-clock timeout. On timeout the child
//! is killed and reaped; no exit path leaks a process, and partial output
//! from a timed-out child is never trusted.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::ProviderError;
use crate::provider::TokenRequest;
use crate::registry::RuntimeVariant;
use crate::script::ResolvedPaths;

/// Poll interval while waiting on a child process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of one child-process invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
}

impl InvocationOutcome {
    /// Whether the child exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr concatenated, for version-pattern matching.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Builder for a timed child-process invocation.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ProcessBuilder {
    /// Create a new builder for the given program.
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_os_string()));
        self
    }

    /// Display the command for log messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Spawn the child and wait for it under the timeout.
    ///
    /// Stdout and stderr are drained on background threads so a chatty child
    /// cannot deadlock on a full pipe. Exceeding the timeout kills the child,
    /// reaps it, and returns [`ProviderError::InvocationTimeout`].
    pub fn run(&self) -> Result<InvocationOutcome, ProviderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProviderError::SpawnFailure {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout_reader = child.stdout.take().map(spawn_drain);
        let stderr_reader = child.stderr.take().map(spawn_drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProviderError::SpawnFailure {
                        program: self.program.display().to_string(),
                        source,
                    });
                }
            }

            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                // Unblock the drain threads before dropping them.
                drain_to_string(stdout_reader);
                drain_to_string(stderr_reader);
                // Round sub-second budgets up so the message never claims
                // a zero-second timeout.
                return Err(ProviderError::InvocationTimeout {
                    seconds: self.timeout.as_secs() + u64::from(self.timeout.subsec_nanos() > 0),
                });
            }

            std::thread::sleep(WAIT_POLL_INTERVAL);
        };

        Ok(InvocationOutcome {
            exit_code: status.code(),
            stdout: drain_to_string(stdout_reader),
            stderr: drain_to_string(stderr_reader),
        })
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn drain_to_string(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    match handle.and_then(|h| h.join().ok()) {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => String::new(),
    }
}

/// Build the probe argv: runtime flags, script path, `--version`.
pub fn build_probe_args(variant: &RuntimeVariant, paths: &ResolvedPaths) -> Vec<OsString> {
    let mut argv = variant.runtime_args(paths);
    argv.push(paths.script_path.clone().into_os_string());
    argv.push(OsString::from("--version"));
    argv
}

/// Build the execution argv: runtime flags, script path, then the
/// request-derived script flags in their contract order.
pub fn build_execute_args(
    variant: &RuntimeVariant,
    paths: &ResolvedPaths,
    request: &TokenRequest,
) -> Vec<OsString> {
    let mut argv = variant.runtime_args(paths);
    argv.push(paths.script_path.clone().into_os_string());

    if let Some(proxy) = &request.proxy {
        argv.push(OsString::from("-p"));
        argv.push(OsString::from(proxy.as_str()));
    }
    argv.push(OsString::from("-c"));
    argv.push(OsString::from(request.content_binding.as_str()));
    if request.bypass_cache {
        argv.push(OsString::from("--bypass-cache"));
    }
    if let Some(addr) = &request.source_address {
        argv.push(OsString::from("--source-address"));
        argv.push(OsString::from(addr.as_str()));
    }
    if !request.verify_tls {
        argv.push(OsString::from("--disable-tls-verification"));
    }

    argv
}

/// Run the script in probe mode (`--version`).
pub fn invoke_probe(
    runtime: &Path,
    variant: &RuntimeVariant,
    paths: &ResolvedPaths,
    timeout: Duration,
) -> Result<InvocationOutcome, ProviderError> {
    let builder = ProcessBuilder::new(runtime, timeout).args(build_probe_args(variant, paths));
    tracing::debug!("Probing script version: {}", builder.display_command());
    builder.run()
}

/// Run the script in execution mode to generate a token.
pub fn invoke_execute(
    runtime: &Path,
    variant: &RuntimeVariant,
    paths: &ResolvedPaths,
    request: &TokenRequest,
    timeout: Duration,
) -> Result<InvocationOutcome, ProviderError> {
    let builder =
        ProcessBuilder::new(runtime, timeout).args(build_execute_args(variant, paths, request));
    tracing::debug!("Executing token generation: {}", builder.display_command());
    builder.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VariantRegistry;

    fn fake_paths(script: &str) -> ResolvedPaths {
        ResolvedPaths {
            runtime_path: Some(PathBuf::from("/usr/bin/node")),
            script_path: PathBuf::from(script),
            server_home: PathBuf::from("/home/u/server"),
            script_cache_dir: PathBuf::from("/home/u/.cache/potshim"),
        }
    }

    fn node_variant() -> std::sync::Arc<RuntimeVariant> {
        VariantRegistry::builtin().get("node").unwrap()
    }

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_execute_args_full_request() {
        let request = TokenRequest {
            proxy: Some("p1".to_string()),
            content_binding: "cb".to_string(),
            bypass_cache: true,
            source_address: Some("1.2.3.4".to_string()),
            verify_tls: false,
            ..TokenRequest::new("cb")
        };
        let paths = fake_paths("/home/u/server/build/generate_once.js");
        let args = args_as_strings(&build_execute_args(&node_variant(), &paths, &request));

        assert_eq!(
            args,
            vec![
                "/home/u/server/build/generate_once.js",
                "-p",
                "p1",
                "-c",
                "cb",
                "--bypass-cache",
                "--source-address",
                "1.2.3.4",
                "--disable-tls-verification",
            ]
        );
    }

    #[test]
    fn test_execute_args_default_request() {
        let request = TokenRequest::new("cb");
        let paths = fake_paths("/home/u/server/build/generate_once.js");
        let args = args_as_strings(&build_execute_args(&node_variant(), &paths, &request));

        assert_eq!(args, vec!["/home/u/server/build/generate_once.js", "-c", "cb"]);
    }

    #[test]
    fn test_probe_args_end_with_version_flag() {
        let paths = fake_paths("/home/u/server/build/generate_once.js");
        let args = args_as_strings(&build_probe_args(&node_variant(), &paths));
        assert_eq!(
            args,
            vec!["/home/u/server/build/generate_once.js", "--version"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_output() {
        let outcome = ProcessBuilder::new("/bin/sh", Duration::from_secs(5))
            .args(["-c", "echo out; echo err >&2"])
            .run()
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_nonzero_exit() {
        let outcome = ProcessBuilder::new("/bin/sh", Duration::from_secs(5))
            .args(["-c", "echo partial; exit 3"])
            .run()
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "partial");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_kills_on_timeout() {
        let start = Instant::now();
        let err = ProcessBuilder::new("/bin/sh", Duration::from_millis(200))
            .args(["-c", "sleep 30"])
            .run()
            .unwrap_err();

        // A sub-second budget reports as one second, never zero.
        assert!(matches!(err, ProviderError::InvocationTimeout { seconds: 1 }));
        // The child must be killed promptly, not awaited to completion.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_spawn_failure() {
        let err = ProcessBuilder::new("/nonexistent/runtime/bin", Duration::from_secs(1))
            .run()
            .unwrap_err();
        assert!(matches!(err, ProviderError::SpawnFailure { .. }));
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("node", Duration::from_secs(1))
            .args(["script.js", "-c", "cb"]);
        assert_eq!(pb.display_command(), "node script.js -c cb");
    }
}
