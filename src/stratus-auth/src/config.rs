//! Declarative authentication configuration.
//!
//! These structures are produced by whatever loads the configuration file;
//! this crate only consumes them. Unknown fields are rejected so typos in
//! `via` or `default` fail loudly instead of silently changing a chain.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_keyring_store::KeyringConfig;

use crate::error::ConfigError;

/// Top-level `auth` configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub identities: BTreeMap<String, IdentityConfig>,
    pub defaults: DefaultsConfig,
    pub keyring: KeyringConfig,
}

/// A root authentication source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Selects the registered capability implementing this provider.
    pub kind: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    /// Kind-specific settings (endpoints, client ids, ...).
    #[serde(default)]
    pub spec: BTreeMap<String, Value>,
}

/// A target principal reached through a provider or another identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub kind: String,
    #[serde(default)]
    pub via: Option<Via>,
    /// Which role/account/permission set to become.
    #[serde(default)]
    pub principal: BTreeMap<String, Value>,
    /// Candidate for default selection. Several identities may set this.
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// `via` reference. Exactly one of the two fields must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Via {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Where a `via` reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViaTarget<'a> {
    Provider(&'a str),
    Identity(&'a str),
}

/// Global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Selected default identity; wins over `default = true` favorites.
    pub identity: Option<String>,
    pub session: Option<SessionConfig>,
}

/// Session settings. A per-identity block replaces the global one entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Requested session length, e.g. `"1h"`, `"90m"`, `"1h30m"`.
    pub duration: Option<String>,
}

impl IdentityConfig {
    /// Resolve the `via` reference of identity `name`.
    pub fn via_target(&self, name: &str) -> Result<ViaTarget<'_>, ConfigError> {
        let via = self
            .via
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVia(name.to_string()))?;
        match (non_empty(&via.provider), non_empty(&via.identity)) {
            (Some(provider), None) => Ok(ViaTarget::Provider(provider)),
            (None, Some(identity)) => Ok(ViaTarget::Identity(identity)),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousVia(name.to_string())),
            (None, None) => Err(ConfigError::MissingVia(name.to_string())),
        }
    }

    /// Short human-readable principal, taken from the `name`, `role` or
    /// `arn` entry of the principal descriptor.
    pub fn principal_summary(&self) -> Option<String> {
        ["name", "role", "arn", "account"]
            .iter()
            .find_map(|key| self.principal.get(*key))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SessionConfig {
    pub fn parse_duration(&self, owner: &str) -> Result<Option<Duration>, ConfigError> {
        match self.duration.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_duration(raw)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidSessionDuration {
                    owner: owner.to_string(),
                    value: raw.to_string(),
                }),
        }
    }
}

impl AuthConfig {
    /// Session settings for `identity`: its own block if present, else the
    /// global default. The two are never merged.
    pub fn effective_session(&self, identity: &str) -> Option<&SessionConfig> {
        self.identities
            .get(identity)
            .and_then(|i| i.session.as_ref())
            .or(self.defaults.session.as_ref())
    }

    /// Map user input to a configured identity name. An exact match wins,
    /// otherwise a unique case-insensitive match is accepted. Input matching
    /// several names only by case is unknown.
    pub fn resolve_identity_name(&self, input: &str) -> Result<String, ConfigError> {
        match_name(self.identities.keys(), input)
            .ok_or_else(|| ConfigError::UnknownIdentity(input.trim().to_string()))
    }

    /// Same as [`resolve_identity_name`](Self::resolve_identity_name), for providers.
    pub fn resolve_provider_name(&self, input: &str) -> Result<String, ConfigError> {
        match_name(self.providers.keys(), input)
            .ok_or_else(|| ConfigError::UnknownProvider(input.trim().to_string()))
    }

    /// Identities flagged `default = true`, sorted by name.
    pub fn favorites(&self) -> Vec<String> {
        self.identities
            .iter()
            .filter(|(_, identity)| identity.default)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn match_name<'a>(names: impl Iterator<Item = &'a String> + Clone, input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(exact) = names.clone().find(|name| name.as_str() == input) {
        return Some(exact.clone());
    }
    let mut folded = names.filter(|name| name.eq_ignore_ascii_case(input));
    match (folded.next(), folded.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

/// Parse `90s`, `15m`, `1h`, `1d`, or compounds like `1h30m`. A bare number
/// is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity(via: Via) -> IdentityConfig {
        IdentityConfig {
            kind: "static/forward".into(),
            via: Some(via),
            principal: BTreeMap::new(),
            default: false,
            session: None,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_via_target() {
        let p = identity(Via {
            provider: Some("sso".into()),
            identity: None,
        });
        assert_eq!(p.via_target("x").unwrap(), ViaTarget::Provider("sso"));

        let both = identity(Via {
            provider: Some("sso".into()),
            identity: Some("base".into()),
        });
        assert_eq!(
            both.via_target("x").unwrap_err(),
            ConfigError::AmbiguousVia("x".into())
        );

        let blank = identity(Via {
            provider: Some("  ".into()),
            identity: None,
        });
        assert_eq!(
            blank.via_target("x").unwrap_err(),
            ConfigError::MissingVia("x".into())
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1D"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("1h30"), None);
    }

    #[test]
    fn test_session_override_replaces_global() {
        let mut config = AuthConfig::default();
        config.defaults.session = Some(SessionConfig {
            duration: Some("12h".into()),
        });
        let mut dev = identity(Via {
            provider: Some("sso".into()),
            identity: None,
        });
        dev.session = Some(SessionConfig::default());
        config.identities.insert("dev".into(), dev);
        config.identities.insert(
            "ops".into(),
            identity(Via {
                provider: Some("sso".into()),
                identity: None,
            }),
        );

        // dev's empty block wins outright; nothing inherited from the global one
        assert_eq!(
            config.effective_session("dev").unwrap().parse_duration("dev").unwrap(),
            None
        );
        assert_eq!(
            config.effective_session("ops").unwrap().parse_duration("ops").unwrap(),
            Some(Duration::from_secs(12 * 3600))
        );
    }

    #[test]
    fn test_resolve_identity_name_case_insensitive() {
        let mut config = AuthConfig::default();
        let via = Via {
            provider: Some("sso".into()),
            identity: None,
        };
        config.identities.insert("Prod-Admin".into(), identity(via.clone()));
        config.identities.insert("dev".into(), identity(via.clone()));

        assert_eq!(config.resolve_identity_name("prod-admin").unwrap(), "Prod-Admin");
        assert_eq!(config.resolve_identity_name("dev").unwrap(), "dev");
        assert!(matches!(
            config.resolve_identity_name("staging"),
            Err(ConfigError::UnknownIdentity(_))
        ));

        config.identities.insert("DEV".into(), identity(via));
        assert_eq!(config.resolve_identity_name("DEV").unwrap(), "DEV");
        assert!(matches!(
            config.resolve_identity_name("Dev"),
            Err(ConfigError::UnknownIdentity(name)) if name == "Dev"
        ));

        config.providers.insert("SSO".into(), ProviderConfig::default());
        config.providers.insert("sso".into(), ProviderConfig::default());
        assert_eq!(config.resolve_provider_name("sso").unwrap(), "sso");
        assert!(matches!(
            config.resolve_provider_name("Sso"),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let raw = serde_json::json!({
            "identities": {"dev": {"kind": "static/forward", "via": {"provider": "sso"}, "defualt": true}}
        });
        assert!(serde_json::from_value::<AuthConfig>(raw).is_err());
    }
}
