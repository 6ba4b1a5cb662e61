//! Stratus Auth - identity chain resolution and credential caching.
//!
//! Given a named identity, resolves the root-first chain of steps needed to
//! reach it, reuses every cached credential that is still valid,
//! authenticates the rest through pluggable capabilities and materializes
//! the result as files, an in-process context and environment variables.
//!
//! - Chains are derived per request and never stored on the manager
//! - Concurrent requests for the same step are single-flighted
//! - Missing stored credentials fall back to materialized files; any other
//!   store error is reported as is

// Configuration and chains
pub mod chain;
pub mod config;
pub mod constants;
pub mod error;

// Capabilities
pub mod builtin;
pub mod prompt;
pub mod registry;
pub mod types;

// Orchestration
mod defaults;
pub mod manager;
pub mod materialize;
mod single_flight;

// Re-exports from chain
pub use chain::{Chain, ChainStep, StepKind, resolve_chain, validate_chains};

// Re-exports from config
pub use config::{
    AuthConfig, DefaultsConfig, IdentityConfig, ProviderConfig, SessionConfig, Via, ViaTarget,
    parse_duration,
};

// Re-exports from constants
pub use constants::{
    ACTIVE_IDENTITY_ENV_VAR, ACTIVE_PROVIDER_ENV_VAR, DEFAULT_AUTH_TIMEOUT_SECS,
    DEFAULT_MIN_VALIDITY_SECS, IDENTITY_ENV_VAR, PRINCIPAL_METADATA_KEY,
};

// Re-exports from error
pub use error::{AuthError, ConfigError, Result};

// Re-exports from capabilities
pub use builtin::{EnvTokenProvider, StaticForwardIdentity};
pub use prompt::{
    NonInteractivePrompter, PromptError, Prompter, TerminalPrompter, default_prompter, run_prompt,
};
pub use registry::{IdentityFactory, ProviderFactory, Registry};
pub use types::{
    AuthContext, AuthPath, Capability, CapabilityRef, Identity, PathKind, Provider, StepContext,
};

// Re-exports from orchestration
pub use defaults::resolve_default_identity;
pub use manager::{
    AuthManager, AuthManagerBuilder, AuthOptions, AuthSession, LogoutOptions, LogoutReport,
    WhoamiInfo,
};
pub use materialize::{
    MaterializationFailure, MaterializationReport, MaterializeAction, Materializer, Owners,
};
