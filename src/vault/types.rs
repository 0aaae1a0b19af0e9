//! Identity record and vault errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cipher::CipherError;

/// One remote-service login.
///
/// Persisted as `accounts/<name>.json`. `secret` holds the cipher token,
/// never the plaintext.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub username: String,
    pub email: String,
    pub secret: String,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Optional field changes for [`super::Vault::update`].
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Account '{0}' already exists")]
    DuplicateIdentity(String),

    #[error("Account '{0}' not found")]
    NotFound(String),

    #[error("Invalid account name '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidName(String),

    #[error("Failed to encrypt secret: {0}")]
    Encryption(#[source] CipherError),

    #[error("Failed to decrypt secret for '{name}': {source}")]
    Decrypt {
        name: String,
        #[source]
        source: CipherError,
    },

    #[error("Account storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Names become file names, so keep them boring.
pub(crate) fn validate_name(name: &str) -> Result<(), VaultError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(VaultError::InvalidName(name.to_string()))
    }
}
