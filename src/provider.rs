//! The script-backed token provider.
//!
//! Ties discovery, gating, invocation, and parsing together. Availability
//! failures are absorbed into `false` with a diagnostic so the host can try
//! another variant; generation failures surface as [`ProviderError`] with
//! the nested cause preserved.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::cache::AvailabilityCache;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::registry::{RuntimeVariant, VariantRegistry};
use crate::response::{self, TokenResponse};
use crate::script::ResolvedPaths;
use crate::{invoke, runtime};

/// The kind of request a token is generated for. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenContext {
    #[default]
    Gvs,
    Player,
    Subs,
}

impl fmt::Display for TokenContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenContext::Gvs => write!(f, "gvs"),
            TokenContext::Player => write!(f, "player"),
            TokenContext::Subs => write!(f, "subs"),
        }
    }
}

/// A token generation request. Owned by the caller; read-only here.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Proxy URL forwarded to the script via `-p`.
    pub proxy: Option<String>,
    /// Content binding forwarded via `-c`; always present.
    pub content_binding: String,
    /// Skip the script's own response cache (`--bypass-cache`).
    pub bypass_cache: bool,
    /// Source address forwarded via `--source-address`.
    pub source_address: Option<String>,
    /// When false, `--disable-tls-verification` is passed.
    pub verify_tls: bool,
    /// Request context, for logging.
    pub context: TokenContext,
    /// Client name the token is generated for, for logging.
    pub client_name: String,
}

impl TokenRequest {
    /// A request with the given content binding and all defaults
    /// (TLS verification on, no proxy, no cache bypass).
    pub fn new(content_binding: impl Into<String>) -> Self {
        TokenRequest {
            proxy: None,
            content_binding: content_binding.into(),
            bypass_cache: false,
            source_address: None,
            verify_tls: true,
            context: TokenContext::default(),
            client_name: "web".to_string(),
        }
    }
}

/// A provider bound to one runtime variant.
///
/// Paths are resolved lazily on first use and stay fixed for the instance's
/// lifetime; the availability check runs at most once per resolved script
/// path per process.
pub struct ScriptTokenProvider {
    variant: Arc<RuntimeVariant>,
    config: ProviderConfig,
    cache: Arc<AvailabilityCache>,
    paths: OnceLock<Option<ResolvedPaths>>,
}

impl ScriptTokenProvider {
    /// Create a provider with its own availability cache.
    pub fn new(variant: Arc<RuntimeVariant>, config: ProviderConfig) -> Self {
        Self::with_cache(variant, config, Arc::new(AvailabilityCache::new()))
    }

    /// Create a provider sharing an availability cache with others.
    pub fn with_cache(
        variant: Arc<RuntimeVariant>,
        config: ProviderConfig,
        cache: Arc<AvailabilityCache>,
    ) -> Self {
        ScriptTokenProvider {
            variant,
            config,
            cache,
            paths: OnceLock::new(),
        }
    }

    /// The variant's registry name.
    pub fn name(&self) -> &str {
        self.variant.name
    }

    /// The underlying variant descriptor.
    pub fn variant(&self) -> &RuntimeVariant {
        &self.variant
    }

    /// Preference weight under this provider's configuration.
    pub fn preference(&self) -> i32 {
        self.variant.preference(&self.config)
    }

    /// Effective probe timeout: config override, else the variant default.
    fn probe_timeout(&self) -> Duration {
        self.config
            .probe_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.variant.probe_timeout)
    }

    /// Effective execution timeout: config override, else the variant default.
    fn exec_timeout(&self) -> Duration {
        self.config
            .exec_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.variant.exec_timeout)
    }

    /// Paths resolved for this instance, or `None` when an explicit script
    /// path had the wrong basename. Computed once, then stable.
    pub fn resolved_paths(&self) -> Option<&ResolvedPaths> {
        self.paths
            .get_or_init(|| ResolvedPaths::resolve(&self.variant, &self.config))
            .as_ref()
    }

    /// Whether this variant can currently be used.
    ///
    /// The first call for a given resolved script path performs the full
    /// check (file checks plus two version probes); subsequent calls are
    /// memoized for the process lifetime.
    pub fn is_available(&self) -> bool {
        let Some(paths) = self.resolved_paths() else {
            return false;
        };
        self.cache
            .get_or_compute(&paths.script_path, || self.check_availability(paths))
    }

    fn check_availability(&self, paths: &ResolvedPaths) -> bool {
        if !paths.script_path.is_file() {
            tracing::debug!("Script path doesn't exist: {}", paths.script_path.display());
            return false;
        }

        let Some(runtime_path) = paths.runtime_path.as_ref() else {
            tracing::warn!(
                "{} executable not found. Please ensure {} is installed and available in PATH.",
                self.variant.display_name,
                self.variant.display_name
            );
            return false;
        };

        if runtime::probe_runtime(&self.variant, runtime_path, self.probe_timeout()).is_none() {
            return false;
        }

        match invoke::invoke_probe(runtime_path, &self.variant, paths, self.probe_timeout()) {
            Ok(outcome) => runtime::script_version_ok(&self.variant, &outcome),
            Err(e) => {
                tracing::warn!("Failed to check script version: {}", e);
                false
            }
        }
    }

    /// Generate a token by executing the script.
    ///
    /// Does not retry; a timeout or nonzero exit is terminal for this call.
    pub fn request_token(&self, request: &TokenRequest) -> Result<TokenResponse, ProviderError> {
        let paths = self.resolved_paths().ok_or(ProviderError::Unavailable)?;
        let runtime_path = paths
            .runtime_path
            .as_ref()
            .ok_or(ProviderError::Unavailable)?;

        tracing::info!(
            "Generating a {} PO token for {} client via {} script",
            request.context,
            request.client_name,
            self.variant.display_name
        );

        let outcome = invoke::invoke_execute(
            runtime_path,
            &self.variant,
            paths,
            request,
            self.exec_timeout(),
        )?;

        let diagnostics = response::diagnostic_lines(&outcome.stdout);
        if !diagnostics.is_empty() {
            tracing::trace!("script stdout:\n{}", diagnostics.join("\n"));
        }
        let stderr = outcome.stderr.trim();
        if !stderr.is_empty() {
            tracing::trace!("script stderr:\n{}", stderr);
        }

        if !outcome.success() {
            return Err(ProviderError::NonZeroExit {
                code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }

        response::parse(&outcome.stdout)
    }
}

impl fmt::Debug for ScriptTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTokenProvider")
            .field("variant", &self.variant.name)
            .finish_non_exhaustive()
    }
}

/// Build one provider per registered variant, ordered by descending
/// preference weight, all sharing a single availability cache.
///
/// Selecting the first available provider from this list is the host's
/// decision; this crate only supplies the ordering.
pub fn ranked_providers(
    registry: &VariantRegistry,
    config: &ProviderConfig,
) -> Vec<ScriptTokenProvider> {
    let cache = Arc::new(AvailabilityCache::new());
    registry
        .ranked(config)
        .into_iter()
        .map(|variant| {
            ScriptTokenProvider::with_cache(variant, config.clone(), Arc::clone(&cache))
        })
        .collect()
}
