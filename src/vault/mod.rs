//! Credential vault.
//!
//! Stores several remote-service identities with their secrets encrypted
//! under a machine-bound key.
//!
//! ## Layout
//!
//! ```text
//! ~/.arngit/accounts/
//! ├── work.json      # { name, username, email, secret: BASE64(nonce||ct||tag), is_active, ... }
//! └── personal.json
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let vault = Vault::open(storage.accounts_dir()).await?;
//! vault.add("work", "octocat", "octo@example.com", &token).await?;
//! vault.switch_active("work").await?;
//! let token = vault.get_secret("work").await?;
//! ```

mod cipher;
mod store;
mod types;

pub use cipher::{derive_key, CipherError, SecretCipher, KEY_LENGTH};
pub use store::{SharedVault, Vault};
pub use types::{Identity, IdentityUpdate, VaultError};
