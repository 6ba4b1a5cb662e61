//! Capability interfaces and the values passed through them.
//!
//! New external systems plug in by implementing [`Provider`] or [`Identity`]
//! and registering a factory under a kind string in the
//! [`Registry`](crate::registry::Registry). The chain resolver and manager
//! never need to change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use stratus_keyring_store::CredentialEnvelope;
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::prompt::Prompter;

/// Whether a declared artifact is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    File,
    Directory,
}

/// An on-disk artifact a capability needs. `location` is relative to the
/// managed directory of the chain's root provider and may not escape it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthPath {
    pub location: PathBuf,
    pub kind: PathKind,
    pub required: bool,
    pub purpose: String,
    pub metadata: BTreeMap<String, String>,
}

impl AuthPath {
    pub fn file(location: impl Into<PathBuf>, purpose: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            kind: PathKind::File,
            required: true,
            purpose: purpose.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn directory(location: impl Into<PathBuf>, purpose: impl Into<String>) -> Self {
        Self {
            kind: PathKind::Directory,
            ..Self::file(location, purpose)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Resolved, per-session facts consumed in-process and used to derive
/// subprocess environment variables. Rebuilt on every fresh authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// Root provider of the chain.
    pub provider: String,
    /// Chain step this context describes.
    pub identity: String,
    pub principal: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    /// Managed directory for the root provider.
    pub artifact_dir: PathBuf,
    /// Absolute artifact paths keyed by declared purpose.
    pub files: BTreeMap<String, PathBuf>,
    /// Free-form provider-family values.
    pub values: BTreeMap<String, String>,
}

impl AuthContext {
    pub fn file(&self, purpose: &str) -> Option<&Path> {
        self.files.get(purpose).map(PathBuf::as_path)
    }
}

/// Per-step inputs to an authentication call.
#[derive(Clone)]
pub struct StepContext {
    /// Position of this step in the chain.
    pub index: usize,
    /// Step name (provider or identity).
    pub name: String,
    /// Whether prompts may be shown.
    pub interactive: bool,
    /// Prompter to use; fails every prompt when `interactive` is false.
    pub prompter: Arc<dyn Prompter>,
    /// Fires when the caller gives up.
    pub cancel: CancellationToken,
    /// Effective requested session length.
    pub session_duration: Option<Duration>,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("interactive", &self.interactive)
            .field("session_duration", &self.session_duration)
            .finish_non_exhaustive()
    }
}

/// Behaviour shared by providers and identities.
#[async_trait]
pub trait Capability: Send + Sync {
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Artifacts to write after a fresh authentication.
    fn paths(&self) -> Vec<AuthPath> {
        Vec::new()
    }

    /// Contents for a declared file artifact. `None` leaves the file alone.
    fn render_artifact(
        &self,
        _path: &AuthPath,
        _credential: &CredentialEnvelope,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Fill kind-specific context fields. `credential` is `None` when the
    /// context is derived from configuration alone.
    fn populate_context(
        &self,
        _context: &mut AuthContext,
        _credential: Option<&CredentialEnvelope>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Subprocess environment derived from the context.
    fn environment(&self, _context: &AuthContext) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    /// Variables removed from an inherited environment before ours are
    /// applied, so stale values cannot shadow the managed ones.
    fn conflicting_env(&self) -> Vec<String> {
        Vec::new()
    }

    /// Load a previously materialized credential from `artifact_dir`.
    async fn load_credentials(
        &self,
        _artifact_dir: &Path,
    ) -> anyhow::Result<Option<CredentialEnvelope>> {
        Ok(None)
    }

    /// Kind-specific cleanup beyond removing declared artifacts.
    async fn logout(&self, _artifact_dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A root authentication source.
#[async_trait]
pub trait Provider: Capability {
    /// Inspect the whole chain before authenticating, e.g. to pick a
    /// console or region based on the target.
    async fn pre_authenticate(&self, _chain: &Chain) -> anyhow::Result<()> {
        Ok(())
    }

    async fn authenticate(&self, ctx: &StepContext) -> anyhow::Result<CredentialEnvelope>;
}

/// A principal obtained by presenting the previous step's credential.
#[async_trait]
pub trait Identity: Capability {
    async fn authenticate(
        &self,
        ctx: &StepContext,
        base: &CredentialEnvelope,
    ) -> anyhow::Result<CredentialEnvelope>;
}

/// A borrowed provider or identity, for code that treats both alike.
#[derive(Clone, Copy)]
pub enum CapabilityRef<'a> {
    Provider(&'a dyn Provider),
    Identity(&'a dyn Identity),
}

macro_rules! delegate {
    ($self:ident, $cap:ident => $call:expr) => {
        match *$self {
            CapabilityRef::Provider($cap) => $call,
            CapabilityRef::Identity($cap) => $call,
        }
    };
}

impl<'a> CapabilityRef<'a> {
    pub fn name(&self) -> &'a str {
        delegate!(self, c => c.name())
    }

    pub fn kind(&self) -> &'a str {
        delegate!(self, c => c.kind())
    }

    pub fn paths(&self) -> Vec<AuthPath> {
        delegate!(self, c => c.paths())
    }

    pub fn render_artifact(
        &self,
        path: &AuthPath,
        credential: &CredentialEnvelope,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        delegate!(self, c => c.render_artifact(path, credential))
    }

    pub fn populate_context(
        &self,
        context: &mut AuthContext,
        credential: Option<&CredentialEnvelope>,
    ) -> anyhow::Result<()> {
        delegate!(self, c => c.populate_context(context, credential))
    }

    pub fn environment(&self, context: &AuthContext) -> anyhow::Result<BTreeMap<String, String>> {
        delegate!(self, c => c.environment(context))
    }

    pub fn conflicting_env(&self) -> Vec<String> {
        delegate!(self, c => c.conflicting_env())
    }

    pub async fn load_credentials(
        &self,
        artifact_dir: &Path,
    ) -> anyhow::Result<Option<CredentialEnvelope>> {
        delegate!(self, c => c.load_credentials(artifact_dir).await)
    }

    pub async fn logout(&self, artifact_dir: &Path) -> anyhow::Result<()> {
        delegate!(self, c => c.logout(artifact_dir).await)
    }
}
