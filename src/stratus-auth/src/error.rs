//! Error taxonomy for authentication.
//!
//! Configuration and interaction problems surface immediately with the
//! offending names. Missing or expired credentials are recovered internally
//! and only reach callers when no source can produce a valid credential.

use std::time::Duration;

use stratus_keyring_store::{BackendKind, StoreError};
use thiserror::Error;

use crate::prompt::PromptError;

/// Problems with the declarative identity/provider configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("identity `{0}` is not defined")]
    UnknownIdentity(String),

    #[error("provider `{0}` is not defined")]
    UnknownProvider(String),

    #[error("`{from}` references unknown {target_kind} `{target}`")]
    UnknownReference {
        from: String,
        target: String,
        target_kind: &'static str,
    },

    #[error("identity reference cycle: {}", format_cycle(.members))]
    Cycle { members: Vec<String> },

    #[error("identity `{0}` has no `via` reference")]
    MissingVia(String),

    #[error("identity `{0}` sets both `via.provider` and `via.identity`")]
    AmbiguousVia(String),

    #[error("no identities are configured")]
    NoIdentitiesConfigured,

    #[error("no default identity configured; pass --identity or mark one identity with `default = true`")]
    NoDefaultIdentity,

    #[error("multiple default identities configured: {}; pass --identity to choose one", .candidates.join(", "))]
    MultipleDefaultIdentities { candidates: Vec<String> },

    #[error("unknown {role} kind `{kind}` for `{name}`")]
    UnknownKind {
        role: &'static str,
        name: String,
        kind: String,
    },

    #[error("invalid session duration `{value}` for `{owner}`")]
    InvalidSessionDuration { owner: String, value: String },

    #[error("invalid configuration for `{name}`: {reason}")]
    Invalid { name: String, reason: String },
}

fn format_cycle(members: &[String]) -> String {
    match members.first() {
        Some(first) => format!("{} -> {first}", members.join(" -> ")),
        None => String::new(),
    }
}

/// Errors returned by the authentication manager.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials found for `{name}` (credential store: {backend})")]
    NotFound { name: String, backend: BackendKind },

    #[error("credentials for `{0}` have expired")]
    Expired(String),

    /// A persisted credential exists but could not be loaded.
    #[error("stored credentials for `{name}` could not be read: {source:#}")]
    Unreadable {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("interaction required: {0}")]
    InteractionRequired(String),

    #[error("authentication failed at step {index} (`{step}`): {source:#}")]
    ExternalAuth {
        step: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("credential store error: {0}")]
    Storage(#[from] StoreError),

    #[error("authentication cancelled")]
    Cancelled,

    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_interaction_required(&self) -> bool {
        matches!(self, Self::InteractionRequired(_))
    }

    /// Wrap a capability failure for chain step `index`. Prompt failures
    /// raised inside the capability keep their own category.
    pub(crate) fn external(step: &str, index: usize, err: anyhow::Error) -> Self {
        match err.downcast::<PromptError>() {
            Ok(prompt) => match prompt {
                PromptError::InteractionRequired(msg) => {
                    Self::InteractionRequired(format!("step `{step}`: {msg}"))
                }
                other => other.into(),
            },
            Err(err) => Self::ExternalAuth {
                step: step.to_string(),
                index,
                source: err,
            },
        }
    }
}

impl From<PromptError> for AuthError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::InteractionRequired(msg) => Self::InteractionRequired(msg),
            PromptError::Cancelled => Self::Cancelled,
            PromptError::Failed(msg) => Self::Prompt(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_every_member() {
        let err = ConfigError::Cycle {
            members: vec!["b".into(), "c".into(), "d".into()],
        };
        assert_eq!(err.to_string(), "identity reference cycle: b -> c -> d -> b");
    }

    #[test]
    fn test_multiple_defaults_lists_candidates() {
        let err = ConfigError::MultipleDefaultIdentities {
            candidates: vec!["dev".into(), "prod".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("dev, prod"));
    }

    #[test]
    fn test_external_keeps_interaction_required() {
        let err = AuthError::external(
            "sso",
            0,
            anyhow::Error::new(PromptError::InteractionRequired("device login".into())),
        );
        assert!(err.is_interaction_required());

        let err = AuthError::external("sso", 0, anyhow::anyhow!("connection refused"));
        assert!(matches!(err, AuthError::ExternalAuth { index: 0, ref step, .. } if step == "sso"));
        assert!(err.to_string().contains("step 0 (`sso`)"));
    }
}
