//! Multi-identity credential vault.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::cipher::SecretCipher;
use super::types::{validate_name, Identity, IdentityUpdate, VaultError};
use crate::storage::{JsonDirStore, RecordStore};

/// Encrypted identities, one persisted record each.
///
/// Exactly one identity is active whenever the vault is non-empty. Mutations
/// hold the write lock until their records are on disk.
pub struct Vault {
    identities: RwLock<BTreeMap<String, Identity>>,
    store: Arc<dyn RecordStore<Identity>>,
    cipher: SecretCipher,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    /// Open the vault stored under `dir` with the machine-bound cipher.
    pub async fn open(dir: PathBuf) -> Result<Self, VaultError> {
        Self::with_store(
            Arc::new(JsonDirStore::<Identity>::new(dir)),
            SecretCipher::for_machine(),
        )
        .await
    }

    pub async fn with_store(
        store: Arc<dyn RecordStore<Identity>>,
        cipher: SecretCipher,
    ) -> Result<Self, VaultError> {
        let mut identities = BTreeMap::new();
        for (key, identity) in store.load_all().await? {
            if validate_name(&identity.name).is_err() {
                tracing::warn!("Skipping account with invalid name {:?}", identity.name);
                continue;
            }
            // Remove and save address records by key; a mismatch could never
            // be deleted.
            if identity.name != key {
                tracing::warn!(
                    "Skipping account record '{}': it names itself {:?}",
                    key,
                    identity.name
                );
                continue;
            }
            identities.insert(key, identity);
        }

        reconcile_active(&mut identities, store.as_ref()).await;

        tracing::info!("Loaded {} account(s)", identities.len());

        Ok(Self {
            identities: RwLock::new(identities),
            store,
            cipher,
        })
    }

    /// Add an identity. The first identity ever added becomes active.
    pub async fn add(
        &self,
        name: &str,
        username: &str,
        email: &str,
        secret: &str,
    ) -> Result<(), VaultError> {
        validate_name(name)?;

        let mut identities = self.identities.write().await;
        if identities.contains_key(name) {
            return Err(VaultError::DuplicateIdentity(name.to_string()));
        }

        let token = self
            .cipher
            .encrypt(secret.trim())
            .map_err(VaultError::Encryption)?;

        let now = Utc::now();
        let identity = Identity {
            name: name.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            secret: token,
            is_active: identities.is_empty(),
            created_at: now,
            updated_at: now,
        };

        // Only a fully written record makes the identity exist.
        self.store.save(name, &identity).await?;
        let active = identity.is_active;
        identities.insert(name.to_string(), identity);

        tracing::info!("Added account '{}'{}", name, if active { " (active)" } else { "" });
        Ok(())
    }

    /// Remove an identity. If it was active, the smallest remaining name
    /// becomes active.
    pub async fn remove(&self, name: &str) -> Result<(), VaultError> {
        let mut identities = self.identities.write().await;
        let was_active = identities
            .get(name)
            .map(|i| i.is_active)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

        self.store.delete(name).await?;
        identities.remove(name);
        tracing::info!("Removed account '{}'", name);

        if was_active {
            if let Some((next_name, next)) = identities.iter_mut().next() {
                next.is_active = true;
                next.updated_at = Utc::now();
                tracing::info!("Account '{}' is now active", next_name);
                // The removal already happened. A failed write here still
                // converges: load promotes the same smallest name.
                if let Err(e) = self.store.save(next_name, next).await {
                    tracing::warn!(
                        "Failed to persist promotion of account '{}': {}",
                        next_name,
                        e
                    );
                }
            }
        }

        Ok(())
    }

    /// Make `name` the only active identity.
    pub async fn switch_active(&self, name: &str) -> Result<(), VaultError> {
        let mut identities = self.identities.write().await;
        if !identities.contains_key(name) {
            return Err(VaultError::NotFound(name.to_string()));
        }

        let now = Utc::now();
        let mut changed: Vec<Identity> = identities
            .values()
            .filter(|i| i.is_active != (i.name == name))
            .map(|i| Identity {
                is_active: i.name == name,
                updated_at: now,
                ..i.clone()
            })
            .collect();

        // Persist the newly active record first so a partial failure never
        // leaves disk without an active identity.
        changed.sort_by_key(|i| i.name != name);
        for (written, identity) in changed.iter().enumerate() {
            if let Err(e) = self.store.save(&identity.name, identity).await {
                for done in &changed[..written] {
                    if let Some(previous) = identities.get(&done.name) {
                        if let Err(e) = self.store.save(&done.name, previous).await {
                            tracing::warn!(
                                "Failed to restore account '{}' after failed switch: {}",
                                done.name,
                                e
                            );
                        }
                    }
                }
                return Err(e.into());
            }
        }

        for identity in changed {
            identities.insert(identity.name.clone(), identity);
        }

        tracing::info!("Switched active account to '{}'", name);
        Ok(())
    }

    /// Change profile fields or rotate the secret.
    pub async fn update(&self, name: &str, update: IdentityUpdate) -> Result<Identity, VaultError> {
        let mut identities = self.identities.write().await;
        let current = identities
            .get(name)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

        let mut updated = current.clone();
        if let Some(username) = update.username {
            updated.username = username;
        }
        if let Some(email) = update.email {
            updated.email = email;
        }
        if let Some(secret) = update.secret {
            updated.secret = self
                .cipher
                .encrypt(secret.trim())
                .map_err(VaultError::Encryption)?;
        }
        updated.updated_at = Utc::now();

        self.store.save(name, &updated).await?;
        identities.insert(name.to_string(), updated.clone());
        Ok(updated)
    }

    pub async fn current(&self) -> Option<Identity> {
        let identities = self.identities.read().await;
        identities.values().find(|i| i.is_active).cloned()
    }

    pub async fn current_name(&self) -> Option<String> {
        self.current().await.map(|i| i.name)
    }

    pub async fn get(&self, name: &str) -> Option<Identity> {
        self.identities.read().await.get(name).cloned()
    }

    /// Identity names, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.identities.read().await.keys().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.identities.read().await.is_empty()
    }

    /// Decrypted secret, with incidental whitespace and line endings trimmed.
    pub async fn get_secret(&self, name: &str) -> Result<String, VaultError> {
        let token = {
            let identities = self.identities.read().await;
            identities
                .get(name)
                .map(|i| i.secret.clone())
                .ok_or_else(|| VaultError::NotFound(name.to_string()))?
        };

        let plaintext = self
            .cipher
            .decrypt(&token)
            .map_err(|source| VaultError::Decrypt {
                name: name.to_string(),
                source,
            })?;
        Ok(plaintext.trim().to_string())
    }
}

/// Leave exactly one active identity: the smallest name claiming it, or the
/// smallest name overall when nobody does.
async fn reconcile_active(
    identities: &mut BTreeMap<String, Identity>,
    store: &dyn RecordStore<Identity>,
) {
    let keep = identities
        .values()
        .find(|i| i.is_active)
        .or_else(|| identities.values().next())
        .map(|i| i.name.clone());

    let Some(keep) = keep else {
        return;
    };

    for (name, identity) in identities.iter_mut() {
        let should = *name == keep;
        if identity.is_active != should {
            identity.is_active = should;
            tracing::warn!(
                "Repairing active flag for account '{}' (active={})",
                name,
                should
            );
            if let Err(e) = store.save(name, identity).await {
                tracing::warn!("Failed to persist repaired account '{}': {}", name, e);
            }
        }
    }
}

/// Shared vault handle.
pub type SharedVault = Arc<Vault>;
