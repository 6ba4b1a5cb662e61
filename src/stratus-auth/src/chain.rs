//! Chain resolution.
//!
//! A [`Chain`] is the root-first list of steps needed to obtain a target
//! identity's credential: the root provider, then each identity reached by
//! following `via` references back down to the target. Chains are plain
//! values computed per request and handed to whoever needs them; nothing in
//! the manager keeps a "current chain".

use std::fmt;

use crate::config::{AuthConfig, ViaTarget};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Provider,
    Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub name: String,
    pub kind: StepKind,
}

/// Ordered, root-first authentication plan. Always starts with a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    steps: Vec<ChainStep>,
}

impl Chain {
    /// A chain consisting of a single provider.
    pub fn provider_only(name: impl Into<String>) -> Self {
        Self {
            steps: vec![ChainStep {
                name: name.into(),
                kind: StepKind::Provider,
            }],
        }
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Name of the root provider.
    pub fn root(&self) -> &str {
        &self.steps[0].name
    }

    /// Name of the leaf, which is the requested identity (or the provider for
    /// a provider-only chain).
    pub fn target(&self) -> &str {
        &self.steps[self.steps.len() - 1].name
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name == name)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" -> "))
    }
}

/// Build the chain for identity `target` (which must be an exact configured
/// name).
///
/// Fails with [`ConfigError::Cycle`] naming every identity in the loop, or
/// with the specific missing/invalid reference. Walks at most once per
/// identity, so it terminates for any configuration.
pub fn resolve_chain(config: &AuthConfig, target: &str) -> Result<Chain, ConfigError> {
    if !config.identities.contains_key(target) {
        return Err(ConfigError::UnknownIdentity(target.to_string()));
    }

    let mut visited: Vec<String> = Vec::new();
    let mut current = target.to_string();

    let provider = loop {
        if let Some(pos) = visited.iter().position(|name| *name == current) {
            return Err(ConfigError::Cycle {
                members: visited[pos..].to_vec(),
            });
        }

        let Some(identity) = config.identities.get(&current) else {
            // only reachable through a `via.identity` reference
            let from = visited.last().cloned().unwrap_or_default();
            return Err(ConfigError::UnknownReference {
                from,
                target: current,
                target_kind: "identity",
            });
        };

        let next = identity.via_target(&current)?;
        visited.push(current.clone());

        match next {
            ViaTarget::Provider(provider) => {
                if !config.providers.contains_key(provider) {
                    return Err(ConfigError::UnknownReference {
                        from: current,
                        target: provider.to_string(),
                        target_kind: "provider",
                    });
                }
                break provider.to_string();
            }
            ViaTarget::Identity(next) => current = next.to_string(),
        }
    };

    let mut steps = Vec::with_capacity(visited.len() + 1);
    steps.push(ChainStep {
        name: provider,
        kind: StepKind::Provider,
    });
    steps.extend(visited.into_iter().rev().map(|name| ChainStep {
        name,
        kind: StepKind::Identity,
    }));
    Ok(Chain { steps })
}

/// Resolve every identity's chain, returning each failure.
pub fn validate_chains(config: &AuthConfig) -> Vec<(String, ConfigError)> {
    config
        .identities
        .keys()
        .filter_map(|name| resolve_chain(config, name).err().map(|e| (name.clone(), e)))
        .collect()
}
