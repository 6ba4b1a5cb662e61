//! Default identity selection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{ConfigError, Result};
use crate::prompt::{Prompter, run_prompt};

/// Pick the identity to use when the caller may not have named one.
///
/// Order: an explicit non-empty name, then `defaults.identity`, then the
/// single identity flagged `default = true`. With zero or several favorites
/// an interactive caller is asked to choose; a non-interactive one gets an
/// error naming the situation.
pub async fn resolve_default_identity(
    config: &AuthConfig,
    explicit: Option<&str>,
    interactive: bool,
    prompter: Arc<dyn Prompter>,
    cancel: &CancellationToken,
) -> Result<String> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(config.resolve_identity_name(name)?);
    }

    if let Some(selected) = config
        .defaults
        .identity
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        let name = config.resolve_identity_name(selected)?;
        debug!(identity = %name, "Using configured default identity");
        return Ok(name);
    }

    let favorites = config.favorites();
    let candidates = match favorites.len() {
        1 => return Ok(favorites.into_iter().next().unwrap_or_default()),
        0 if config.identities.is_empty() => {
            return Err(ConfigError::NoIdentitiesConfigured.into());
        }
        0 if !interactive => return Err(ConfigError::NoDefaultIdentity.into()),
        0 => config.identities.keys().cloned().collect(),
        _ if !interactive => {
            return Err(ConfigError::MultipleDefaultIdentities {
                candidates: favorites,
            }
            .into());
        }
        _ => favorites,
    };

    let chosen = run_prompt(cancel, move || {
        prompter.select("Choose an identity", &candidates)
    })
    .await?;
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentityConfig, Via};
    use crate::error::AuthError;
    use crate::prompt::{NonInteractivePrompter, PromptError};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records the options it was offered and picks the last one.
    #[derive(Default)]
    struct PickLast {
        offered: Mutex<Vec<String>>,
    }

    impl Prompter for PickLast {
        fn is_interactive(&self) -> bool {
            true
        }

        fn select(&self, _message: &str, options: &[String]) -> std::result::Result<String, PromptError> {
            *self.offered.lock().unwrap() = options.to_vec();
            options.last().cloned().ok_or(PromptError::Cancelled)
        }

        fn confirm(&self, _message: &str, default: bool) -> std::result::Result<bool, PromptError> {
            Ok(default)
        }

        fn password(&self, _message: &str) -> std::result::Result<SecretString, PromptError> {
            Err(PromptError::Cancelled)
        }
    }

    fn config(identities: &[(&str, bool)]) -> AuthConfig {
        let mut config = AuthConfig::default();
        for (name, default) in identities {
            config.identities.insert(
                name.to_string(),
                IdentityConfig {
                    kind: "static/forward".into(),
                    via: Some(Via {
                        provider: Some("sso".into()),
                        identity: None,
                    }),
                    principal: BTreeMap::new(),
                    default: *default,
                    session: None,
                    tags: BTreeMap::new(),
                },
            );
        }
        config
    }

    async fn resolve(config: &AuthConfig, explicit: Option<&str>, interactive: bool) -> Result<String> {
        resolve_default_identity(
            config,
            explicit,
            interactive,
            Arc::new(NonInteractivePrompter),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_explicit_wins() {
        let config = config(&[("dev", true), ("prod", false)]);
        assert_eq!(resolve(&config, Some("PROD"), false).await.unwrap(), "prod");
    }

    #[tokio::test]
    async fn test_blank_explicit_is_ignored() {
        let config = config(&[("dev", true), ("prod", false)]);
        assert_eq!(resolve(&config, Some("  "), false).await.unwrap(), "dev");
    }

    #[tokio::test]
    async fn test_selected_default_beats_favorites() {
        let mut config = config(&[("dev", true), ("prod", true)]);
        config.defaults.identity = Some("prod".into());
        assert_eq!(resolve(&config, None, false).await.unwrap(), "prod");

        config.defaults.identity = Some("gone".into());
        assert!(matches!(
            resolve(&config, None, false).await,
            Err(AuthError::Configuration(ConfigError::UnknownIdentity(name))) if name == "gone"
        ));
    }

    #[tokio::test]
    async fn test_no_identities() {
        let config = AuthConfig::default();
        assert!(matches!(
            resolve(&config, None, true).await,
            Err(AuthError::Configuration(ConfigError::NoIdentitiesConfigured))
        ));
    }

    #[tokio::test]
    async fn test_no_favorites_non_interactive() {
        let config = config(&[("dev", false), ("prod", false)]);
        assert!(matches!(
            resolve(&config, None, false).await,
            Err(AuthError::Configuration(ConfigError::NoDefaultIdentity))
        ));
    }

    #[tokio::test]
    async fn test_multiple_favorites_non_interactive() {
        let config = config(&[("dev", true), ("prod", true), ("ops", false)]);
        match resolve(&config, None, false).await {
            Err(AuthError::Configuration(ConfigError::MultipleDefaultIdentities { candidates })) => {
                assert_eq!(candidates, vec!["dev".to_string(), "prod".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interactive_prompts_among_favorites() {
        let config = config(&[("dev", true), ("prod", true), ("ops", false)]);
        let prompter = Arc::new(PickLast::default());
        let chosen = resolve_default_identity(
            &config,
            None,
            true,
            prompter.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(chosen, "prod");
        assert_eq!(*prompter.offered.lock().unwrap(), vec!["dev", "prod"]);
    }

    #[tokio::test]
    async fn test_interactive_prompts_among_all_without_favorites() {
        let config = config(&[("dev", false), ("ops", false)]);
        let prompter = Arc::new(PickLast::default());
        let chosen = resolve_default_identity(
            &config,
            None,
            true,
            prompter.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(chosen, "ops");
        assert_eq!(*prompter.offered.lock().unwrap(), vec!["dev", "ops"]);
    }
}
