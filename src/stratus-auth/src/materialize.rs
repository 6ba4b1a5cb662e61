//! Materialization of credentials into on-disk artifacts, an in-process
//! [`AuthContext`] and subprocess environment variables.
//!
//! All artifacts live under `<config>/credentials/<root-provider>/`, a
//! namespace owned by this tool. Removing it can never touch configuration
//! the user manages for the external system directly.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use stratus_common::{
    OWNER_ONLY_FILE_MODE, PathError, atomic_write_with_mode, create_private_dir_all,
    normalize_path, resolve_within,
};
use stratus_keyring_store::CredentialEnvelope;
use tracing::{debug, info, warn};

use crate::constants::{ACTIVE_IDENTITY_ENV_VAR, ACTIVE_PROVIDER_ENV_VAR, PRINCIPAL_METADATA_KEY};
use crate::types::{AuthContext, AuthPath, CapabilityRef, PathKind};

/// Which of the three materialization actions failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializeAction {
    Artifacts,
    Context,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializationFailure {
    pub action: MaterializeAction,
    pub message: String,
    /// Whether the failed piece was declared required.
    pub required: bool,
}

/// Outcome of materializing one credential. Failures are collected, never
/// rolled back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializationReport {
    pub written: Vec<PathBuf>,
    pub context: AuthContext,
    pub environment: BTreeMap<String, String>,
    pub failures: Vec<MaterializationFailure>,
}

impl MaterializationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn required_failures(&self) -> impl Iterator<Item = &MaterializationFailure> {
        self.failures.iter().filter(|f| f.required)
    }

    /// A required artifact could not be found or written.
    pub fn missing_artifacts(&self) -> bool {
        self.required_failures()
            .any(|f| f.action == MaterializeAction::Artifacts)
    }

    fn fail(&mut self, action: MaterializeAction, message: impl Into<String>, required: bool) {
        let message = message.into();
        warn!(?action, required, error = %message, "Materialization step failed");
        self.failures.push(MaterializationFailure {
            action,
            message,
            required,
        });
    }
}

/// The capabilities whose declarations apply to one materialization: the
/// chain's root provider and, unless the chain is provider-only, its target.
#[derive(Clone, Copy)]
pub struct Owners<'a> {
    pub provider: CapabilityRef<'a>,
    pub target: Option<CapabilityRef<'a>>,
}

impl<'a> Owners<'a> {
    fn all(&self) -> impl Iterator<Item = CapabilityRef<'a>> {
        std::iter::once(self.provider).chain(self.target)
    }

    fn target_name(&self) -> &'a str {
        self.target.unwrap_or(self.provider).name()
    }

    /// Declared paths, provider first, with an identity path replacing any
    /// provider path at the same location.
    fn merged_paths(&self) -> Vec<(AuthPath, CapabilityRef<'a>)> {
        let mut merged: Vec<(AuthPath, CapabilityRef<'a>)> = Vec::new();
        for owner in self.all() {
            for path in owner.paths() {
                let key = normalize_path(&path.location);
                match merged
                    .iter_mut()
                    .find(|(existing, _)| normalize_path(&existing.location) == key)
                {
                    Some(slot) => *slot = (path, owner),
                    None => merged.push((path, owner)),
                }
            }
        }
        merged
    }
}

/// Writes and removes artifacts under the managed credentials directory.
#[derive(Debug, Clone)]
pub struct Materializer {
    root: PathBuf,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Managed directory for one root provider.
    pub fn provider_dir(&self, provider: &str) -> Result<PathBuf, PathError> {
        let dir = resolve_within(&self.root, provider)?;
        // a provider name like "a/b" would nest inside another namespace
        if dir.parent() != Some(normalize_path(&self.root).as_path()) {
            return Err(PathError::Escapes(provider.to_string()));
        }
        Ok(dir)
    }

    /// Materialize a freshly obtained credential. The three actions run
    /// independently; a failure in one is recorded and the rest still run.
    pub fn on_authenticated(
        &self,
        owners: Owners<'_>,
        credential: &CredentialEnvelope,
    ) -> MaterializationReport {
        let mut report = MaterializationReport::default();
        let provider = owners.provider.name();
        let mut files = BTreeMap::new();

        match self.provider_dir(provider) {
            Ok(dir) => match create_private_dir_all(&dir) {
                Ok(()) => self.write_artifacts(&dir, owners, credential, &mut files, &mut report),
                Err(e) => report.fail(
                    MaterializeAction::Artifacts,
                    format!("create {}: {e}", dir.display()),
                    true,
                ),
            },
            Err(e) => report.fail(MaterializeAction::Artifacts, e.to_string(), true),
        }

        self.derive(owners, Some(credential), files, &mut report);
        info!(
            provider,
            identity = owners.target_name(),
            written = report.written.len(),
            failures = report.failures.len(),
            "Materialized credentials"
        );
        report
    }

    /// Build context and environment from what is already on disk, writing
    /// nothing. Used for cache hits and environment export.
    pub fn derive_only(
        &self,
        owners: Owners<'_>,
        credential: Option<&CredentialEnvelope>,
    ) -> MaterializationReport {
        let mut report = MaterializationReport::default();
        let mut files = BTreeMap::new();

        match self.provider_dir(owners.provider.name()) {
            Ok(dir) => {
                for (path, _) in owners.merged_paths() {
                    match resolve_within(&dir, &path.location) {
                        Ok(target) if target.exists() => {
                            files.insert(path.purpose.clone(), target);
                        }
                        Ok(target) => {
                            if path.required {
                                report.fail(
                                    MaterializeAction::Artifacts,
                                    format!("{} is missing; log in again to recreate it", target.display()),
                                    true,
                                );
                            }
                        }
                        Err(e) => report.fail(MaterializeAction::Artifacts, e.to_string(), path.required),
                    }
                }
            }
            Err(e) => report.fail(MaterializeAction::Artifacts, e.to_string(), true),
        }

        self.derive(owners, credential, files, &mut report);
        report
    }

    fn write_artifacts(
        &self,
        dir: &Path,
        owners: Owners<'_>,
        credential: &CredentialEnvelope,
        files: &mut BTreeMap<String, PathBuf>,
        report: &mut MaterializationReport,
    ) {
        for (path, owner) in owners.merged_paths() {
            let target = match resolve_within(dir, &path.location) {
                Ok(target) => target,
                Err(e) => {
                    report.fail(
                        MaterializeAction::Artifacts,
                        format!("`{}` declared {e}", owner.name()),
                        path.required,
                    );
                    continue;
                }
            };

            let result = match path.kind {
                PathKind::Directory => create_private_dir_all(&target)
                    .map(|()| true)
                    .map_err(|e| e.to_string()),
                PathKind::File => match owner.render_artifact(&path, credential) {
                    Ok(Some(content)) => write_private_file(&target, &content).map(|()| true),
                    Ok(None) => Ok(false),
                    Err(e) => Err(format!("{e:#}")),
                },
            };

            match result {
                Ok(true) => {
                    debug!(path = %target.display(), purpose = %path.purpose, "Wrote artifact");
                    files.insert(path.purpose.clone(), target.clone());
                    report.written.push(target);
                }
                Ok(false) => {}
                Err(message) => report.fail(
                    MaterializeAction::Artifacts,
                    format!("{}: {message}", target.display()),
                    path.required,
                ),
            }
        }
    }

    fn derive(
        &self,
        owners: Owners<'_>,
        credential: Option<&CredentialEnvelope>,
        files: BTreeMap<String, PathBuf>,
        report: &mut MaterializationReport,
    ) {
        let provider = owners.provider.name();
        let mut context = AuthContext {
            provider: provider.to_string(),
            identity: owners.target_name().to_string(),
            principal: credential.and_then(|c| c.metadata().get(PRINCIPAL_METADATA_KEY).cloned()),
            artifact_dir: self.root.join(provider),
            files,
            ..AuthContext::default()
        };
        for owner in owners.all() {
            if let Err(e) = owner.populate_context(&mut context, credential) {
                report.fail(
                    MaterializeAction::Context,
                    format!("`{}`: {e:#}", owner.name()),
                    true,
                );
            }
        }

        // Environment is derived even from a partially populated context.
        let mut environment = BTreeMap::from([
            (ACTIVE_PROVIDER_ENV_VAR.to_string(), context.provider.clone()),
            (ACTIVE_IDENTITY_ENV_VAR.to_string(), context.identity.clone()),
        ]);
        for owner in owners.all() {
            match owner.environment(&context) {
                Ok(vars) => environment.extend(vars),
                Err(e) => report.fail(
                    MaterializeAction::Environment,
                    format!("`{}`: {e:#}", owner.name()),
                    true,
                ),
            }
        }

        report.context = context;
        report.environment = environment;
    }

    /// Delete the artifacts `owner` declares under `provider`'s namespace.
    /// Returns the paths that existed and were removed.
    pub fn remove_artifacts(&self, provider: &str, owner: CapabilityRef<'_>) -> io::Result<Vec<PathBuf>> {
        let dir = self
            .provider_dir(provider)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut removed = Vec::new();
        for path in owner.paths() {
            let Ok(target) = resolve_within(&dir, &path.location) else {
                continue;
            };
            let result = match path.kind {
                PathKind::File => std::fs::remove_file(&target),
                PathKind::Directory => std::fs::remove_dir_all(&target),
            };
            match result {
                Ok(()) => removed.push(target),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Delete a provider's entire managed namespace. Returns whether it existed.
    pub fn remove_namespace(&self, provider: &str) -> io::Result<bool> {
        let dir = self
            .provider_dir(provider)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn write_private_file(target: &Path, content: &[u8]) -> Result<(), String> {
    if let Some(parent) = target.parent() {
        create_private_dir_all(parent).map_err(|e| e.to_string())?;
    }
    atomic_write_with_mode(target, content, OWNER_ONLY_FILE_MODE).map_err(|e| e.to_string())
}
