//! Authentication manager.
//!
//! Walks a resolved [`Chain`] root to leaf, reusing every cached credential
//! that is still valid and authenticating only the steps that are missing or
//! about to expire. Each chain is computed per request and passed down
//! explicitly, so concurrent requests for different identities cannot
//! disturb each other.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stratus_common::{FileLockError, StratusDirs};
use stratus_keyring_store::{CredentialEnvelope, CredentialKind, CredentialStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{Chain, StepKind, resolve_chain, validate_chains};
use crate::config::AuthConfig;
use crate::constants::{DEFAULT_AUTH_TIMEOUT_SECS, DEFAULT_MIN_VALIDITY_SECS};
use crate::defaults::resolve_default_identity;
use crate::error::{AuthError, ConfigError, Result};
use crate::materialize::{MaterializationReport, Materializer, Owners};
use crate::prompt::{NonInteractivePrompter, Prompter, default_prompter, run_prompt};
use crate::registry::Registry;
use crate::single_flight::{KeyGuard, KeyedLocks};
use crate::types::{AuthContext, CapabilityRef, Identity, Provider, StepContext};

/// How a failing capability fallback load is reported.
#[derive(Debug, Clone, Copy)]
enum FallbackErrors {
    /// Chain execution: an unreadable copy is re-obtained like a missing one.
    AsMissing,
    /// Passive lookups: the failure is returned.
    Surface,
}

struct Scan {
    deepest: Option<(usize, CredentialEnvelope)>,
    seen: Vec<Option<CredentialEnvelope>>,
}

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Allow interactive prompts. Ignored when no terminal is attached.
    pub allow_prompts: bool,
    pub cancel: CancellationToken,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            allow_prompts: true,
            cancel: CancellationToken::new(),
        }
    }
}

impl AuthOptions {
    pub fn non_interactive() -> Self {
        Self {
            allow_prompts: false,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub identity: String,
    pub chain: Chain,
    pub credential: CredentialEnvelope,
    pub context: AuthContext,
    pub environment: BTreeMap<String, String>,
    pub materialization: MaterializationReport,
    /// Steps that were authenticated by this request, root first.
    pub refreshed: Vec<String>,
}

impl AuthSession {
    /// True when every step came from cache.
    pub fn from_cache(&self) -> bool {
        self.refreshed.is_empty()
    }
}

/// Summary of the active credential for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhoamiInfo {
    pub identity: String,
    pub provider: String,
    pub chain: Vec<String>,
    pub kind: CredentialKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    pub environment: BTreeMap<String, String>,
}

impl WhoamiInfo {
    fn new(chain: &Chain, credential: &CredentialEnvelope, report: MaterializationReport) -> Self {
        let context = report.context;
        Self {
            identity: chain.target().to_string(),
            provider: chain.root().to_string(),
            chain: chain.names().into_iter().map(str::to_string).collect(),
            kind: credential.kind(),
            principal: context.principal,
            account: context.account,
            region: context.region,
            expiration: credential.expiration(),
            environment: report.environment,
        }
    }
}

impl From<&AuthSession> for WhoamiInfo {
    fn from(session: &AuthSession) -> Self {
        Self::new(&session.chain, &session.credential, session.materialization.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutOptions {
    /// Also delete long-lived stored credentials.
    pub delete_stored: bool,
    /// Skip the deletion confirmation prompt.
    pub skip_confirmation: bool,
}

/// What a logout removed and what it left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogoutReport {
    pub removed_credentials: Vec<String>,
    pub removed_files: Vec<PathBuf>,
    /// Long-lived credentials left in place.
    pub kept: Vec<String>,
    pub errors: Vec<String>,
}

impl LogoutReport {
    fn merge(&mut self, other: LogoutReport) {
        self.removed_credentials.extend(other.removed_credentials);
        self.removed_files.extend(other.removed_files);
        self.kept.extend(other.kept);
        self.errors.extend(other.errors);
    }
}

/// Builder for [`AuthManager`].
pub struct AuthManagerBuilder {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    registry: Option<Registry>,
    prompter: Option<Arc<dyn Prompter>>,
    credentials_dir: Option<PathBuf>,
    lock_dir: Option<PathBuf>,
    min_validity: Duration,
    timeout: Duration,
}

impl AuthManagerBuilder {
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Root of the managed artifact namespace.
    pub fn credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    /// Directory for the per-alias lock files that keep concurrent CLI
    /// processes from refreshing the same step twice.
    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Cached credentials expiring sooner than this are refreshed.
    pub fn min_validity(mut self, min_validity: Duration) -> Self {
        self.min_validity = min_validity;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<AuthManager> {
        let registry = self.registry.unwrap_or_else(Registry::with_builtins);

        let mut providers = HashMap::new();
        for (name, config) in &self.config.providers {
            providers.insert(name.clone(), registry.build_provider(name, config)?);
        }
        let mut identities = HashMap::new();
        for (name, config) in &self.config.identities {
            identities.insert(name.clone(), registry.build_identity(name, config)?);
        }

        let credentials_dir = match self.credentials_dir {
            Some(dir) => dir,
            None => StratusDirs::new()
                .map(|dirs| dirs.credentials_dir())
                .ok_or_else(|| AuthError::Internal("could not determine the config directory".into()))?,
        };
        let locks = match self.lock_dir.or_else(|| StratusDirs::new().map(|dirs| dirs.locks_dir())) {
            Some(dir) => KeyedLocks::with_lock_dir(dir, self.timeout),
            None => {
                warn!("No data directory, refreshes are only serialized within this process");
                KeyedLocks::new()
            }
        };

        let min_validity = chrono::Duration::from_std(self.min_validity)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_MIN_VALIDITY_SECS));

        debug!(
            providers = providers.len(),
            identities = identities.len(),
            backend = %self.store.backend(),
            credentials_dir = %credentials_dir.display(),
            lock_dir = ?locks.lock_dir(),
            "Auth manager initialized"
        );

        Ok(AuthManager {
            config: Arc::new(self.config),
            providers,
            identities,
            store: self.store,
            prompter: self.prompter.unwrap_or_else(default_prompter),
            materializer: Materializer::new(credentials_dir),
            locks,
            min_validity,
            timeout: self.timeout,
        })
    }
}

/// Resolves, caches and materializes credentials for configured identities.
pub struct AuthManager {
    config: Arc<AuthConfig>,
    providers: HashMap<String, Arc<dyn Provider>>,
    identities: HashMap<String, Arc<dyn Identity>>,
    store: Arc<dyn CredentialStore>,
    prompter: Arc<dyn Prompter>,
    materializer: Materializer,
    locks: KeyedLocks,
    min_validity: chrono::Duration,
    timeout: Duration,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("identities", &self.identities.keys().collect::<Vec<_>>())
            .field("backend", &self.store.backend())
            .field("materializer", &self.materializer)
            .field("min_validity", &self.min_validity)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn builder(config: AuthConfig, store: Arc<dyn CredentialStore>) -> AuthManagerBuilder {
        AuthManagerBuilder {
            config,
            store,
            registry: None,
            prompter: None,
            credentials_dir: None,
            lock_dir: None,
            min_validity: Duration::from_secs(DEFAULT_MIN_VALIDITY_SECS as u64),
            timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Configured identity names, sorted.
    pub fn list_identities(&self) -> Vec<String> {
        self.config.identities.keys().cloned().collect()
    }

    /// Configured provider names, sorted.
    pub fn list_providers(&self) -> Vec<String> {
        self.config.providers.keys().cloned().collect()
    }

    /// The chain for `identity`, resolved fresh.
    pub fn chain_for(&self, identity: &str) -> Result<Chain> {
        let name = self.config.resolve_identity_name(identity)?;
        Ok(resolve_chain(&self.config, &name)?)
    }

    /// Every configuration problem found, keyed by the offending name.
    pub fn validate(&self) -> Vec<(String, ConfigError)> {
        let mut problems = validate_chains(&self.config);
        if let Some(session) = &self.config.defaults.session
            && let Err(e) = session.parse_duration("defaults")
        {
            problems.push(("defaults".to_string(), e));
        }
        for (name, provider) in &self.config.providers {
            if let Some(session) = &provider.session
                && let Err(e) = session.parse_duration(name)
            {
                problems.push((name.clone(), e));
            }
        }
        for (name, identity) in &self.config.identities {
            if let Some(session) = &identity.session
                && let Err(e) = session.parse_duration(name)
            {
                problems.push((name.clone(), e));
            }
        }
        problems
    }

    /// Pick the identity to act on when the caller may not have named one.
    pub async fn default_identity(&self, explicit: Option<&str>, options: &AuthOptions) -> Result<String> {
        resolve_default_identity(
            &self.config,
            explicit,
            self.interactive(options),
            self.prompter.clone(),
            &options.cancel,
        )
        .await
    }

    pub async fn authenticate(&self, identity: &str) -> Result<AuthSession> {
        self.authenticate_with(identity, AuthOptions::default()).await
    }

    /// Obtain a valid credential for `identity`, authenticating only the
    /// chain steps whose cached credential is missing or expiring.
    pub async fn authenticate_with(&self, identity: &str, options: AuthOptions) -> Result<AuthSession> {
        let chain = self.chain_for(identity)?;
        info!(identity = %chain.target(), chain = %chain, "Authenticating");
        self.guarded(&options, self.authenticate_chain(chain, &options))
            .await
    }

    /// Authenticate a provider on its own, without any identity.
    pub async fn authenticate_provider(&self, provider: &str, options: AuthOptions) -> Result<AuthSession> {
        let name = self.config.resolve_provider_name(provider)?;
        let chain = Chain::provider_only(name);
        info!(provider = %chain.root(), "Authenticating provider");
        self.guarded(&options, self.authenticate_chain(chain, &options))
            .await
    }

    async fn guarded<T>(&self, options: &AuthOptions, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => Err(AuthError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, work) => {
                outcome.map_err(|_| AuthError::Timeout(self.timeout))?
            }
        }
    }

    async fn authenticate_chain(&self, chain: Chain, options: &AuthOptions) -> Result<AuthSession> {
        let provider = self.provider(chain.root())?;
        provider
            .pre_authenticate(&chain)
            .await
            .map_err(|e| AuthError::external(chain.root(), 0, e))?;

        let Scan { deepest, seen } = self.scan(&chain).await?;
        let (begin, mut current) = match deepest {
            Some((index, credential)) => {
                debug!(step = %chain.steps()[index].name, index, "Resuming from cached credential");
                (index + 1, Some(credential))
            }
            None => (0, None),
        };

        let mut refreshed = Vec::new();
        for index in begin..chain.len() {
            let step = &chain.steps()[index];
            let _guard = self.step_lock(&step.name).await?;

            // Another request or process may have refreshed this step while
            // we waited. Its credential is accepted even inside the validity
            // buffer, as long as it has not expired.
            if let Some(cached) = self.cached(&chain, index, FallbackErrors::AsMissing).await? {
                let fresh = !cached.expires_within(self.min_validity);
                let replaced = !cached.is_expired() && seen[index].as_ref() != Some(&cached);
                if fresh || replaced {
                    debug!(step = %step.name, index, "Credential refreshed concurrently");
                    current = Some(cached);
                    continue;
                }
            }

            let ctx = self.step_context(&chain, index, options)?;
            let fresh = match (step.kind, current.as_ref()) {
                (StepKind::Provider, _) => provider.authenticate(&ctx).await,
                (StepKind::Identity, Some(base)) => {
                    self.identity(&step.name)?.authenticate(&ctx, base).await
                }
                (StepKind::Identity, None) => {
                    return Err(AuthError::Internal(format!(
                        "no input credential for step {index} (`{}`)",
                        step.name
                    )));
                }
            }
            .map_err(|e| AuthError::external(&step.name, index, e))?;

            self.store.store(&step.name, &fresh)?;
            info!(step = %step.name, index, kind = %fresh.kind(), "Authenticated chain step");
            refreshed.push(step.name.clone());
            current = Some(fresh);
        }

        let credential = current.ok_or_else(|| {
            AuthError::Internal(format!("chain `{chain}` produced no credential"))
        })?;
        let owners = self.owners(&chain)?;
        let materialization = if refreshed.last().map(String::as_str) == Some(chain.target()) {
            self.materializer.on_authenticated(owners, &credential)
        } else {
            debug!(identity = %chain.target(), "Using cached credential");
            let derived = self.materializer.derive_only(owners, Some(&credential));
            if derived.missing_artifacts() {
                // Obtained as an intermediate step or written by an older
                // run; recreate the files from the cached credential.
                info!(identity = %chain.target(), "Restoring missing artifacts");
                self.materializer.on_authenticated(owners, &credential)
            } else {
                derived
            }
        };

        Ok(AuthSession {
            identity: chain.target().to_string(),
            context: materialization.context.clone(),
            environment: materialization.environment.clone(),
            chain,
            credential,
            materialization,
            refreshed,
        })
    }

    /// Leaf-to-root scan for the deepest step with a credential that stays
    /// valid for at least the minimum validity window.
    pub async fn find_deepest_valid(&self, chain: &Chain) -> Result<Option<(usize, CredentialEnvelope)>> {
        Ok(self.scan(chain).await?.deepest)
    }

    /// The deepest valid step, plus what was cached for every step below it
    /// at scan time.
    async fn scan(&self, chain: &Chain) -> Result<Scan> {
        let mut seen = vec![None; chain.len()];
        for index in (0..chain.len()).rev() {
            match self.cached(chain, index, FallbackErrors::AsMissing).await? {
                Some(credential) if !credential.expires_within(self.min_validity) => {
                    return Ok(Scan {
                        deepest: Some((index, credential)),
                        seen,
                    });
                }
                Some(credential) => {
                    debug!(
                        step = %chain.steps()[index].name,
                        expiration = ?credential.expiration(),
                        "Cached credential expired or expiring"
                    );
                    seen[index] = Some(credential);
                }
                None => {}
            }
        }
        Ok(Scan { deepest: None, seen })
    }

    async fn cached(
        &self,
        chain: &Chain,
        index: usize,
        fallback: FallbackErrors,
    ) -> Result<Option<CredentialEnvelope>> {
        match self.load_step_credentials(chain, index, fallback).await {
            Ok(credential) => Ok(Some(credential)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch the stored credential for `name` (an identity or provider),
    /// falling back to the capability's own persisted copy only when the
    /// store has none.
    pub async fn load_credentials_with_fallback(&self, name: &str) -> Result<CredentialEnvelope> {
        let chain = match self.config.resolve_identity_name(name) {
            Ok(identity) => resolve_chain(&self.config, &identity)?,
            Err(ConfigError::UnknownIdentity(_)) => {
                Chain::provider_only(self.config.resolve_provider_name(name)?)
            }
            Err(e) => return Err(e.into()),
        };
        self.load_step_credentials(&chain, chain.len() - 1, FallbackErrors::Surface)
            .await
    }

    async fn load_step_credentials(
        &self,
        chain: &Chain,
        index: usize,
        fallback: FallbackErrors,
    ) -> Result<CredentialEnvelope> {
        let step = &chain.steps()[index];
        match self.store.retrieve(&step.name) {
            Ok(credential) => return Ok(credential),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let not_found = || AuthError::NotFound {
            name: step.name.clone(),
            backend: self.store.backend(),
        };
        let Ok(dir) = self.materializer.provider_dir(chain.root()) else {
            return Err(not_found());
        };
        match self.capability(step.kind, &step.name)?.load_credentials(&dir).await {
            Ok(Some(credential)) => {
                debug!(step = %step.name, "Loaded credential from materialized files");
                Ok(credential)
            }
            Ok(None) => Err(not_found()),
            Err(e) => {
                debug!(step = %step.name, error = %format!("{e:#}"), "Fallback credential load failed");
                match fallback {
                    FallbackErrors::AsMissing => Err(not_found()),
                    FallbackErrors::Surface => Err(AuthError::Unreadable {
                        name: step.name.clone(),
                        source: e,
                    }),
                }
            }
        }
    }

    /// The cached credential for `identity` without authenticating. Fails
    /// with [`AuthError::Expired`] if it has expired.
    pub async fn get_cached_credentials(&self, identity: &str) -> Result<WhoamiInfo> {
        let chain = self.chain_for(identity)?;
        let credential = self
            .load_step_credentials(&chain, chain.len() - 1, FallbackErrors::Surface)
            .await?;
        if credential.is_expired() {
            return Err(AuthError::Expired(chain.target().to_string()));
        }
        let report = self
            .materializer
            .derive_only(self.owners(&chain)?, Some(&credential));
        Ok(WhoamiInfo::new(&chain, &credential, report))
    }

    /// Report the active credential, authenticating without prompts if
    /// nothing usable is cached. On failure the cache error is returned.
    pub async fn whoami(&self, identity: &str, cancel: CancellationToken) -> Result<WhoamiInfo> {
        match self.get_cached_credentials(identity).await {
            Ok(info) => Ok(info),
            Err(original) => {
                debug!(identity, error = %original, "No cached credential, trying non-interactive authentication");
                let options = AuthOptions::non_interactive().with_cancel(cancel);
                match self.authenticate_with(identity, options).await {
                    Ok(session) => Ok(WhoamiInfo::from(&session)),
                    Err(e) => {
                        debug!(identity, error = %e, "Non-interactive authentication failed");
                        Err(original)
                    }
                }
            }
        }
    }

    /// Environment for `identity` derived from cached state, without
    /// authenticating.
    pub async fn environment_variables(&self, identity: &str) -> Result<BTreeMap<String, String>> {
        let chain = self.chain_for(identity)?;
        let credential = self
            .cached(&chain, chain.len() - 1, FallbackErrors::AsMissing)
            .await?;
        let report = self
            .materializer
            .derive_only(self.owners(&chain)?, credential.as_ref());
        Ok(report.environment)
    }

    /// Apply `identity`'s environment on top of `base` (`KEY=VALUE` entries).
    /// Variables that would conflict with the managed ones are removed first.
    /// Output is sorted by key.
    pub async fn prepare_shell_environment(&self, identity: &str, base: &[String]) -> Result<Vec<String>> {
        let chain = self.chain_for(identity)?;
        let managed = self.environment_variables(chain.target()).await?;

        let mut merged: BTreeMap<String, String> = base
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let owners = self.owners(&chain)?;
        for owner in std::iter::once(owners.provider).chain(owners.target) {
            for key in owner.conflicting_env() {
                merged.remove(&key);
            }
        }
        merged.extend(managed);
        Ok(merged.into_iter().map(|(k, v)| format!("{k}={v}")).collect())
    }

    /// Log out an identity or, if no identity matches, a provider.
    pub async fn logout(&self, name: &str, options: LogoutOptions, cancel: &CancellationToken) -> Result<LogoutReport> {
        match self.config.resolve_identity_name(name) {
            Ok(identity) => {
                self.confirm_deletion(&format!("identity `{identity}`"), options, cancel)
                    .await?;
                self.logout_identity(&identity, options).await
            }
            Err(ConfigError::UnknownIdentity(_)) if self.config.resolve_provider_name(name).is_ok() => {
                self.logout_provider(name, options, cancel).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Log out every identity rooted at `provider`, then the provider itself,
    /// and remove its managed artifact namespace.
    pub async fn logout_provider(
        &self,
        provider: &str,
        options: LogoutOptions,
        cancel: &CancellationToken,
    ) -> Result<LogoutReport> {
        let provider = self.config.resolve_provider_name(provider)?;
        self.confirm_deletion(&format!("provider `{provider}`"), options, cancel)
            .await?;
        self.logout_provider_confirmed(&provider, options).await
    }

    /// Log out every configured provider and identity.
    pub async fn logout_all(&self, options: LogoutOptions, cancel: &CancellationToken) -> Result<LogoutReport> {
        self.confirm_deletion("all identities and providers", options, cancel)
            .await?;
        let mut report = LogoutReport::default();
        for provider in self.config.providers.keys() {
            report.merge(self.logout_provider_confirmed(provider, options).await?);
        }
        Ok(report)
    }

    async fn logout_provider_confirmed(&self, provider: &str, options: LogoutOptions) -> Result<LogoutReport> {
        let mut report = LogoutReport::default();
        for name in self.config.identities.keys() {
            match resolve_chain(&self.config, name) {
                Ok(chain) if chain.root() == provider => {
                    report.merge(self.logout_identity(name, options).await?);
                }
                Ok(_) => {}
                Err(e) => report.errors.push(format!("{name}: {e}")),
            }
        }

        self.clear_alias(provider, options.delete_stored, &mut report).await;
        if let Err(e) = self.provider(provider)?.logout(&self.materializer.root().join(provider)).await {
            report.errors.push(format!("{provider}: {e:#}"));
        }
        match self.materializer.remove_namespace(provider) {
            Ok(true) => report.removed_files.push(self.materializer.root().join(provider)),
            Ok(false) => {}
            Err(e) => report.errors.push(format!("{provider}: {e}")),
        }
        info!(provider, removed = report.removed_credentials.len(), "Logged out provider");
        Ok(report)
    }

    /// Clear session credentials on the identity steps of the chain, never
    /// the root provider's. The target's long-lived credential is deleted
    /// only when requested.
    async fn logout_identity(&self, identity: &str, options: LogoutOptions) -> Result<LogoutReport> {
        let chain = resolve_chain(&self.config, identity)?;
        let mut report = LogoutReport::default();

        for step in chain.steps().iter().filter(|s| s.kind == StepKind::Identity) {
            let delete_stored = options.delete_stored && step.name == identity;
            self.clear_alias(&step.name, delete_stored, &mut report).await;
        }

        let capability = self.identity(identity)?;
        match self
            .materializer
            .remove_artifacts(chain.root(), CapabilityRef::Identity(capability.as_ref()))
        {
            Ok(removed) => report.removed_files.extend(removed),
            Err(e) => report.errors.push(format!("{identity}: {e}")),
        }
        if let Err(e) = capability.logout(&self.materializer.root().join(chain.root())).await {
            report.errors.push(format!("{identity}: {e:#}"));
        }
        info!(identity, removed = report.removed_credentials.len(), kept = report.kept.len(), "Logged out identity");
        Ok(report)
    }

    async fn clear_alias(&self, alias: &str, delete_stored: bool, report: &mut LogoutReport) {
        let _guard = match self.step_lock(alias).await {
            Ok(guard) => guard,
            Err(e) => {
                report.errors.push(format!("{alias}: {e}"));
                return;
            }
        };
        let credential = match self.store.retrieve(alias) {
            Ok(credential) => credential,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                report.errors.push(format!("{alias}: {e}"));
                return;
            }
        };
        if !delete_stored && !credential.is_session() {
            debug!(alias, "Keeping long-lived credential");
            report.kept.push(alias.to_string());
            return;
        }
        match self.store.delete(alias) {
            Ok(true) => report.removed_credentials.push(alias.to_string()),
            Ok(false) => {}
            Err(e) => report.errors.push(format!("{alias}: {e}")),
        }
    }

    async fn confirm_deletion(&self, what: &str, options: LogoutOptions, cancel: &CancellationToken) -> Result<()> {
        if !options.delete_stored || options.skip_confirmation {
            return Ok(());
        }
        if !self.prompter.is_interactive() {
            return Err(AuthError::InteractionRequired(format!(
                "deleting stored credentials for {what} needs confirmation; pass --force to skip it"
            )));
        }
        let prompter = self.prompter.clone();
        let message = format!("Permanently delete stored credentials for {what}?");
        if run_prompt(cancel, move || prompter.confirm(&message, false)).await? {
            Ok(())
        } else {
            warn!(what, "Credential deletion declined");
            Err(AuthError::Aborted(format!("kept stored credentials for {what}")))
        }
    }

    async fn step_lock(&self, alias: &str) -> Result<KeyGuard> {
        self.locks.lock(alias).await.map_err(|e| match e {
            FileLockError::Timeout { .. } => AuthError::Timeout(self.timeout),
            other => AuthError::Internal(format!("could not lock `{alias}`: {other}")),
        })
    }

    fn interactive(&self, options: &AuthOptions) -> bool {
        options.allow_prompts && self.prompter.is_interactive()
    }

    fn step_context(&self, chain: &Chain, index: usize, options: &AuthOptions) -> Result<StepContext> {
        let step = &chain.steps()[index];
        let session = match step.kind {
            StepKind::Identity => self.config.effective_session(&step.name),
            StepKind::Provider => self
                .config
                .providers
                .get(&step.name)
                .and_then(|p| p.session.as_ref())
                .or(self.config.defaults.session.as_ref()),
        };
        let session_duration = match session {
            Some(session) => session.parse_duration(&step.name)?,
            None => None,
        };
        let interactive = self.interactive(options);
        Ok(StepContext {
            index,
            name: step.name.clone(),
            interactive,
            prompter: if interactive {
                self.prompter.clone()
            } else {
                Arc::new(NonInteractivePrompter)
            },
            cancel: options.cancel.clone(),
            session_duration,
        })
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn Provider>> {
        self.providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()).into())
    }

    fn identity(&self, name: &str) -> Result<&Arc<dyn Identity>> {
        self.identities
            .get(name)
            .ok_or_else(|| ConfigError::UnknownIdentity(name.to_string()).into())
    }

    fn capability(&self, kind: StepKind, name: &str) -> Result<CapabilityRef<'_>> {
        Ok(match kind {
            StepKind::Provider => CapabilityRef::Provider(self.provider(name)?.as_ref()),
            StepKind::Identity => CapabilityRef::Identity(self.identity(name)?.as_ref()),
        })
    }

    fn owners(&self, chain: &Chain) -> Result<Owners<'_>> {
        let provider = CapabilityRef::Provider(self.provider(chain.root())?.as_ref());
        let target = match chain.steps().last() {
            Some(step) if step.kind == StepKind::Identity => {
                Some(CapabilityRef::Identity(self.identity(&step.name)?.as_ref()))
            }
            _ => None,
        };
        Ok(Owners { provider, target })
    }
}
