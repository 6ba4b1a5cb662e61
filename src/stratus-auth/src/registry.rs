//! Kind registry - maps configured `kind` strings to capability factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin;
use crate::config::{IdentityConfig, ProviderConfig};
use crate::error::ConfigError;
use crate::types::{Identity, Provider};

/// Builds a provider from its configured name and settings.
pub type ProviderFactory =
    Arc<dyn Fn(&str, &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;

/// Builds an identity from its configured name and settings.
pub type IdentityFactory =
    Arc<dyn Fn(&str, &IdentityConfig) -> anyhow::Result<Arc<dyn Identity>> + Send + Sync>;

/// Registry of capability kinds.
#[derive(Default, Clone)]
pub struct Registry {
    providers: HashMap<String, ProviderFactory>,
    identities: HashMap<String, IdentityFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.providers.keys().collect();
        let mut identities: Vec<_> = self.identities.keys().collect();
        providers.sort();
        identities.sort();
        f.debug_struct("Registry")
            .field("providers", &providers)
            .field("identities", &identities)
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the kinds shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register a provider kind. A later registration replaces an earlier one.
    pub fn register_provider<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.providers.insert(kind.into(), Arc::new(factory));
    }

    /// Register an identity kind. A later registration replaces an earlier one.
    pub fn register_identity<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &IdentityConfig) -> anyhow::Result<Arc<dyn Identity>> + Send + Sync + 'static,
    {
        self.identities.insert(kind.into(), Arc::new(factory));
    }

    pub fn has_provider_kind(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    pub fn has_identity_kind(&self, kind: &str) -> bool {
        self.identities.contains_key(kind)
    }

    pub(crate) fn build_provider(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn Provider>, ConfigError> {
        let factory = self
            .providers
            .get(&config.kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                role: "provider",
                name: name.to_string(),
                kind: config.kind.clone(),
            })?;
        factory(name, config).map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })
    }

    pub(crate) fn build_identity(
        &self,
        name: &str,
        config: &IdentityConfig,
    ) -> Result<Arc<dyn Identity>, ConfigError> {
        let factory = self
            .identities
            .get(&config.kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                role: "identity",
                name: name.to_string(),
                kind: config.kind.clone(),
            })?;
        factory(name, config).map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })
    }
}
