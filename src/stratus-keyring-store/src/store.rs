//! The backend-independent credential store contract.

use serde_json::Value;

use crate::envelope::CredentialEnvelope;
use crate::error::Result;
use crate::selection::BackendKind;

/// Uniform storage contract shared by every backend.
///
/// Implementations must be safe for concurrent use from multiple threads.
/// Absence is always reported as [`StoreError::NotFound`](crate::StoreError::NotFound),
/// never folded into another error.
pub trait CredentialStore: Send + Sync {
    /// Which backend this is.
    fn backend(&self) -> BackendKind;

    /// Store `envelope` under `alias`, replacing any previous value wholesale.
    fn store(&self, alias: &str, envelope: &CredentialEnvelope) -> Result<()>;

    /// Fetch the raw envelope, expired or not.
    fn retrieve(&self, alias: &str) -> Result<CredentialEnvelope>;

    /// Remove `alias`. Returns whether anything was removed.
    fn delete(&self, alias: &str) -> Result<bool>;

    /// All aliases with a stored credential, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Whether the stored envelope has passed its expiration, evaluated now.
    fn is_expired(&self, alias: &str) -> Result<bool> {
        Ok(self.retrieve(alias)?.is_expired())
    }

    /// Fetch opaque non-credential metadata.
    fn get_any(&self, key: &str) -> Result<Value>;

    /// Store opaque non-credential metadata.
    fn set_any(&self, key: &str, value: &Value) -> Result<()>;
}
