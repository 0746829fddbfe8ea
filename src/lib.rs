//! Potshim - a PO token provider backed by an external generation script.
//!
//! This crate locates a script-runtime (Node.js or Deno), gates it behind
//! minimum-version probes, invokes the token-generation script as a child
//! process under strict timeouts, and parses the JSON payload off the end
//! of its stdout. Availability checks are expensive, so they are memoized
//! per resolved script path with single-flight semantics.
//!
//! ```no_run
//! use potshim::{ranked_providers, ProviderConfig, TokenRequest, VariantRegistry};
//!
//! let registry = VariantRegistry::builtin();
//! let config = ProviderConfig::default();
//!
//! for provider in ranked_providers(&registry, &config) {
//!     if provider.is_available() {
//!         let response = provider.request_token(&TokenRequest::new("content-binding"))?;
//!         println!("{}", response.token);
//!         break;
//!     }
//! }
//! # Ok::<(), potshim::ProviderError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod invoke;
pub mod provider;
pub mod registry;
pub mod response;
pub mod runtime;
pub mod script;
pub mod version;

pub use cache::AvailabilityCache;
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use invoke::InvocationOutcome;
pub use provider::{ranked_providers, ScriptTokenProvider, TokenContext, TokenRequest};
pub use registry::{RuntimeVariant, VariantRegistry};
pub use response::TokenResponse;
pub use script::ResolvedPaths;
pub use version::VersionTuple;
