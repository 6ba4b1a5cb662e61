//! Constants for identity selection and credential handling.

/// Environment variable equivalent to `--identity`.
pub const IDENTITY_ENV_VAR: &str = "STRATUS_IDENTITY";

/// Exported to subprocesses so they can tell which identity is active.
pub const ACTIVE_IDENTITY_ENV_VAR: &str = "STRATUS_ACTIVE_IDENTITY";

/// Exported to subprocesses: root provider of the active identity.
pub const ACTIVE_PROVIDER_ENV_VAR: &str = "STRATUS_ACTIVE_PROVIDER";

/// A cached credential is reused only if it stays valid for at least this
/// many seconds.
pub const DEFAULT_MIN_VALIDITY_SECS: i64 = 15 * 60;

/// Upper bound on a whole authentication request, including prompts.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10 * 60;

/// Metadata key carrying the principal descriptor on issued credentials.
pub const PRINCIPAL_METADATA_KEY: &str = "principal";
