//! Built-in capability kinds.
//!
//! - `env/token`: a provider that reads a bearer token from an environment
//!   variable, prompting for it when a terminal is attached.
//! - `static/forward`: an identity that re-labels its base credential with
//!   its principal and caps it to the requested session length.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::Value;
use stratus_keyring_store::{CredentialEnvelope, TokenCredentials, safe_format_key};

use crate::chain::Chain;
use crate::config::{IdentityConfig, ProviderConfig, parse_duration};
use crate::constants::PRINCIPAL_METADATA_KEY;
use crate::prompt::{PromptError, run_prompt};
use crate::registry::Registry;
use crate::types::{AuthContext, AuthPath, Capability, Identity, Provider, StepContext};

pub const ENV_TOKEN_KIND: &str = "env/token";
pub const STATIC_FORWARD_KIND: &str = "static/forward";

/// Variable read by `env/token` unless `spec.env` names another.
pub const DEFAULT_TOKEN_ENV: &str = "STRATUS_TOKEN";

/// Path of the materialized token, exported to subprocesses.
pub const TOKEN_FILE_ENV: &str = "STRATUS_TOKEN_FILE";
/// Path of the materialized credential document.
pub const CREDENTIALS_FILE_ENV: &str = "STRATUS_CREDENTIALS_FILE";

const CREDENTIALS_FILE: &str = "credentials.json";
const TOKEN_FILE: &str = "token";

pub(crate) fn register(registry: &mut Registry) {
    registry.register_provider(ENV_TOKEN_KIND, |name, config| {
        Ok(Arc::new(EnvTokenProvider::from_config(name, config)?) as Arc<dyn Provider>)
    });
    registry.register_identity(STATIC_FORWARD_KIND, |name, config| {
        Ok(Arc::new(StaticForwardIdentity::from_config(name, config)) as Arc<dyn Identity>)
    });
}

fn spec_str<'a>(spec: &'a BTreeMap<String, Value>, key: &str) -> anyhow::Result<Option<&'a str>> {
    match spec.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => anyhow::bail!("`spec.{key}` must be a string, got {other}"),
    }
}

#[derive(Debug)]
pub struct EnvTokenProvider {
    name: String,
    env: String,
    issuer: Option<String>,
    ttl: Option<chrono::Duration>,
    region: Option<String>,
}

impl EnvTokenProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> anyhow::Result<Self> {
        let ttl = match spec_str(&config.spec, "ttl")? {
            Some(raw) => {
                let ttl = parse_duration(raw).with_context(|| format!("invalid `spec.ttl` value `{raw}`"))?;
                Some(chrono::Duration::from_std(ttl).context("`spec.ttl` is too large")?)
            }
            None => None,
        };
        Ok(Self {
            name: name.to_string(),
            env: spec_str(&config.spec, "env")?
                .unwrap_or(DEFAULT_TOKEN_ENV)
                .to_string(),
            issuer: spec_str(&config.spec, "issuer")?.map(str::to_string),
            ttl,
            region: config.region.clone(),
        })
    }

    async fn read_token(&self, ctx: &StepContext) -> anyhow::Result<String> {
        if let Ok(token) = std::env::var(&self.env)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_string());
        }
        if !ctx.interactive {
            return Err(PromptError::InteractionRequired(format!(
                "`{}` is not set and a token prompt needs a terminal",
                self.env
            ))
            .into());
        }
        let prompter = ctx.prompter.clone();
        let message = format!("Token for `{}`:", self.name);
        let secret = run_prompt(&ctx.cancel, move || prompter.password(&message)).await?;
        let token = secret.expose_secret().trim().to_string();
        anyhow::ensure!(!token.is_empty(), "empty token entered for `{}`", self.name);
        Ok(token)
    }
}

#[async_trait]
impl Capability for EnvTokenProvider {
    fn kind(&self) -> &str {
        ENV_TOKEN_KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn populate_context(
        &self,
        context: &mut AuthContext,
        _credential: Option<&CredentialEnvelope>,
    ) -> anyhow::Result<()> {
        if context.region.is_none() {
            context.region = self.region.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for EnvTokenProvider {
    async fn pre_authenticate(&self, chain: &Chain) -> anyhow::Result<()> {
        tracing::debug!(provider = %self.name, target = %chain.target(), "Token provider selected");
        Ok(())
    }

    async fn authenticate(&self, ctx: &StepContext) -> anyhow::Result<CredentialEnvelope> {
        let token = self.read_token(ctx).await?;
        tracing::debug!(provider = %self.name, token = %safe_format_key(&token), "Read bearer token");
        let mut credentials = TokenCredentials::new(token);
        credentials.issuer = self.issuer.clone();
        credentials.expiration = self.ttl.map(|ttl| Utc::now() + ttl);
        Ok(credentials.into())
    }
}

#[derive(Debug)]
pub struct StaticForwardIdentity {
    name: String,
    principal: Option<String>,
    account: Option<String>,
}

impl StaticForwardIdentity {
    pub fn from_config(name: &str, config: &IdentityConfig) -> Self {
        Self {
            name: name.to_string(),
            principal: config.principal_summary(),
            account: match config.principal.get("account") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            },
        }
    }

    fn file(&self, name: &str) -> String {
        format!("{}/{name}", self.name)
    }
}

#[async_trait]
impl Capability for StaticForwardIdentity {
    fn kind(&self) -> &str {
        STATIC_FORWARD_KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn paths(&self) -> Vec<AuthPath> {
        vec![
            AuthPath::file(self.file(CREDENTIALS_FILE), "credentials"),
            AuthPath::file(self.file(TOKEN_FILE), "token").optional(),
        ]
    }

    fn render_artifact(
        &self,
        path: &AuthPath,
        credential: &CredentialEnvelope,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        match path.purpose.as_str() {
            "credentials" => Ok(Some(serde_json::to_vec_pretty(credential)?)),
            "token" => Ok(credential.as_token().map(|t| t.token.clone().into_bytes())),
            _ => Ok(None),
        }
    }

    fn populate_context(
        &self,
        context: &mut AuthContext,
        _credential: Option<&CredentialEnvelope>,
    ) -> anyhow::Result<()> {
        if context.principal.is_none() {
            context.principal = self.principal.clone();
        }
        if self.account.is_some() {
            context.account = self.account.clone();
        }
        Ok(())
    }

    fn environment(&self, context: &AuthContext) -> anyhow::Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        if let Some(path) = context.file("token") {
            env.insert(TOKEN_FILE_ENV.to_string(), path.display().to_string());
        }
        if let Some(path) = context.file("credentials") {
            env.insert(CREDENTIALS_FILE_ENV.to_string(), path.display().to_string());
        }
        Ok(env)
    }

    fn conflicting_env(&self) -> Vec<String> {
        vec![TOKEN_FILE_ENV.to_string(), CREDENTIALS_FILE_ENV.to_string()]
    }

    async fn load_credentials(&self, artifact_dir: &Path) -> anyhow::Result<Option<CredentialEnvelope>> {
        let path = artifact_dir.join(&self.name).join(CREDENTIALS_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let credential = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(credential))
    }
}

#[async_trait]
impl Identity for StaticForwardIdentity {
    async fn authenticate(
        &self,
        ctx: &StepContext,
        base: &CredentialEnvelope,
    ) -> anyhow::Result<CredentialEnvelope> {
        let mut credential = base.clone();
        if let Some(principal) = &self.principal {
            credential = credential.with_metadata(PRINCIPAL_METADATA_KEY, principal.clone());
        }
        if let Some(duration) = ctx.session_duration {
            let cap = Utc::now() + chrono::Duration::from_std(duration).context("session duration is too large")?;
            let expiration = match &mut credential {
                CredentialEnvelope::CloudTemporary(c) => &mut c.expiration,
                CredentialEnvelope::OidcToken(t) => &mut t.expiration,
            };
            *expiration = Some(expiration.map_or(cap, |current| current.min(cap)));
        }
        Ok(credential)
    }
}
