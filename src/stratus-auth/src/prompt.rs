//! Interactive prompts as an injected capability.
//!
//! [`TerminalPrompter`] talks to the user through `inquire`.
//! [`NonInteractivePrompter`] fails every prompt with
//! [`PromptError::InteractionRequired`], so code paths that would block on
//! input fail fast in CI and pipelines instead of hanging.

use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("{0} (no interactive terminal attached)")]
    InteractionRequired(String),

    #[error("prompt cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

pub trait Prompter: Send + Sync {
    /// Whether prompts can actually reach a user.
    fn is_interactive(&self) -> bool;

    /// Pick one of `options`.
    fn select(&self, message: &str, options: &[String]) -> Result<String, PromptError>;

    /// Yes/no question.
    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError>;

    /// Hidden input.
    fn password(&self, message: &str) -> Result<SecretString, PromptError>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn select(&self, message: &str, options: &[String]) -> Result<String, PromptError> {
        inquire::Select::new(message, options.to_vec())
            .prompt()
            .map_err(map_inquire)
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool, PromptError> {
        inquire::Confirm::new(message)
            .with_default(default)
            .prompt()
            .map_err(map_inquire)
    }

    fn password(&self, message: &str) -> Result<SecretString, PromptError> {
        inquire::Password::new(message)
            .without_confirmation()
            .prompt()
            .map(SecretString::from)
            .map_err(map_inquire)
    }
}

fn map_inquire(err: inquire::InquireError) -> PromptError {
    use inquire::InquireError;
    match err {
        InquireError::NotTTY => PromptError::InteractionRequired("prompt".to_string()),
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            PromptError::Cancelled
        }
        other => PromptError::Failed(other.to_string()),
    }
}

/// Fails every prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn is_interactive(&self) -> bool {
        false
    }

    fn select(&self, message: &str, _options: &[String]) -> Result<String, PromptError> {
        Err(PromptError::InteractionRequired(message.to_string()))
    }

    fn confirm(&self, message: &str, _default: bool) -> Result<bool, PromptError> {
        Err(PromptError::InteractionRequired(message.to_string()))
    }

    fn password(&self, message: &str) -> Result<SecretString, PromptError> {
        Err(PromptError::InteractionRequired(message.to_string()))
    }
}

/// Terminal prompter when attached to an interactive terminal outside CI,
/// otherwise the failing one.
pub fn default_prompter() -> Arc<dyn Prompter> {
    if stratus_common::is_interactive() {
        Arc::new(TerminalPrompter)
    } else {
        Arc::new(NonInteractivePrompter)
    }
}

/// Run a blocking prompt on the blocking pool, abandoning it if `cancel`
/// fires first.
pub async fn run_prompt<T, F>(cancel: &CancellationToken, prompt: F) -> Result<T, PromptError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PromptError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(prompt);
    tokio::select! {
        _ = cancel.cancelled() => Err(PromptError::Cancelled),
        joined = task => joined.map_err(|e| PromptError::Failed(e.to_string()))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_interactive_always_fails() {
        let prompter = NonInteractivePrompter;
        assert!(!prompter.is_interactive());
        assert!(matches!(
            prompter.select("Choose identity", &["a".into()]),
            Err(PromptError::InteractionRequired(msg)) if msg == "Choose identity"
        ));
        assert!(prompter.confirm("Delete?", false).is_err());
        assert!(prompter.password("Password").is_err());
    }

    #[tokio::test]
    async fn test_run_prompt_returns_value() {
        let cancel = CancellationToken::new();
        let value = run_prompt(&cancel, || Ok::<_, PromptError>(42)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_prompt_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_prompt(&cancel, || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok::<_, PromptError>(1)
        })
        .await;
        assert_eq!(result, Err(PromptError::Cancelled));
    }
}
