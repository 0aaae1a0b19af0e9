//! Guarded-repository registry.
//!
//! A guard protects a canonical repository path and everything beneath it.
//! Destructive operations (force push, auto-publish, history rewrites) ask
//! the registry first. A guard may carry a password; without one it only
//! demands confirmation.
//!
//! All guards live in a single document, `config/protected.json`, keyed by
//! canonical path.

mod password;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub use password::{hash_password, verify_password};

use crate::storage::write_atomic;

/// Protection record for one repository root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub path: PathBuf,
    /// Empty when the guard is confirmation-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    pub protected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Guard {
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    fn accepts(&self, password: &str) -> bool {
        !self.has_password() || verify_password(password, &self.password_hash)
    }
}

/// Result of a successful [`Registry::protect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectOutcome {
    Protected,
    /// The exact path was already guarded the same way; nothing changed.
    AlreadyProtected,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Access denied: wrong password for protected repository {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("{} is already covered by the guard on {}", .path.display(), .guard.display())]
    AlreadyProtected { path: PathBuf, guard: PathBuf },

    #[error("Cannot resolve path {}: {}", .path.display(), .source)]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Protected repository list is corrupt: {0}")]
    Corrupt(String),

    #[error("Protected repository storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path-keyed guards with a single persisted document.
#[derive(Debug)]
pub struct Registry {
    guards: RwLock<BTreeMap<PathBuf, Guard>>,
    document: PathBuf,
}

impl Registry {
    /// Load the registry document. A missing document is an empty registry.
    pub async fn open(document: PathBuf) -> Result<Self, RegistryError> {
        let guards = match tokio::fs::read(&document).await {
            Ok(bytes) => {
                let stored: BTreeMap<String, Guard> = serde_json::from_slice(&bytes)
                    .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
                stored
                    .into_values()
                    .map(|guard| (guard.path.clone(), guard))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            "Loaded {} protected repositor{} from {}",
            guards.len(),
            if guards.len() == 1 { "y" } else { "ies" },
            document.display()
        );

        Ok(Self {
            guards: RwLock::new(guards),
            document,
        })
    }

    async fn persist(&self, guards: &BTreeMap<PathBuf, Guard>) -> Result<(), RegistryError> {
        let stored: BTreeMap<String, &Guard> = guards
            .iter()
            .map(|(path, guard)| (path.to_string_lossy().into_owned(), guard))
            .collect();
        let data = serde_json::to_vec_pretty(&stored)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.document, &data).await?;
        tracing::debug!("Saved protected repositories to {}", self.document.display());
        Ok(())
    }

    /// Advisory check: `false` when the path cannot be resolved.
    pub async fn is_protected(&self, path: &Path) -> bool {
        self.get_protection(path).await.is_some()
    }

    /// The guard covering `path`: an exact match, else the nearest guarded
    /// ancestor.
    pub async fn get_protection(&self, path: &Path) -> Option<Guard> {
        let canonical = tokio::fs::canonicalize(path).await.ok()?;
        let guards = self.guards.read().await;
        covering(&guards, &canonical).cloned()
    }

    /// Guard `path`. An empty password means confirmation-only protection.
    ///
    /// An existing password is never replaced: protecting an already covered
    /// path fails unless it is the exact same guard again.
    pub async fn protect(
        &self,
        path: &Path,
        password: &str,
    ) -> Result<ProtectOutcome, RegistryError> {
        let canonical =
            tokio::fs::canonicalize(path)
                .await
                .map_err(|source| RegistryError::InvalidPath {
                    path: path.to_path_buf(),
                    source,
                })?;

        let mut guards = self.guards.write().await;
        if let Some(existing) = covering(&guards, &canonical) {
            let same_guard = existing.path == canonical
                && existing.has_password() == !password.is_empty()
                && existing.accepts(password);
            if same_guard {
                tracing::info!("{} is already protected", canonical.display());
                return Ok(ProtectOutcome::AlreadyProtected);
            }
            return Err(RegistryError::AlreadyProtected {
                path: canonical.clone(),
                guard: existing.path.clone(),
            });
        }

        let guard = Guard {
            path: canonical.clone(),
            password_hash: if password.is_empty() {
                String::new()
            } else {
                hash_password(password)
            },
            protected_at: Utc::now(),
            last_accessed: None,
        };
        guards.insert(canonical.clone(), guard);

        if let Err(e) = self.persist(&guards).await {
            guards.remove(&canonical);
            return Err(e);
        }

        tracing::info!("Protected {}", canonical.display());
        Ok(ProtectOutcome::Protected)
    }

    /// Remove the guard covering `path`.
    ///
    /// Unguarded paths succeed as a no-op. A password-protected guard stays in
    /// place unless `password` verifies. When `path` lies beneath the guarded
    /// root, the root's guard is the one removed.
    pub async fn unprotect(&self, path: &Path, password: &str) -> Result<(), RegistryError> {
        // Allow removing guards whose directory no longer exists.
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(_) if path.is_absolute() => path.to_path_buf(),
            Err(_) => std::env::current_dir()?.join(path),
        };

        let mut guards = self.guards.write().await;
        let Some(guard) = covering(&guards, &resolved).cloned() else {
            return Ok(());
        };

        if !guard.accepts(password) {
            tracing::warn!("Rejected unprotect of {}: wrong password", guard.path.display());
            return Err(RegistryError::AccessDenied(guard.path));
        }

        guards.remove(&guard.path);
        if let Err(e) = self.persist(&guards).await {
            guards.insert(guard.path.clone(), guard);
            return Err(e);
        }

        tracing::info!("Unprotected {}", guard.path.display());
        Ok(())
    }

    /// `true` when unguarded, guarded without password, or the password
    /// matches.
    pub async fn verify_access(&self, path: &Path, password: &str) -> bool {
        match self.get_protection(path).await {
            None => true,
            Some(guard) => guard.accepts(password),
        }
    }

    /// Record an access on the covering guard. Failures are only logged.
    pub async fn update_last_accessed(&self, path: &Path) {
        let Ok(canonical) = tokio::fs::canonicalize(path).await else {
            return;
        };

        let mut guards = self.guards.write().await;
        let Some(root) = covering(&guards, &canonical).map(|g| g.path.clone()) else {
            return;
        };
        if let Some(guard) = guards.get_mut(&root) {
            guard.last_accessed = Some(Utc::now());
        }
        if let Err(e) = self.persist(&guards).await {
            tracing::warn!("Failed to record access to {}: {}", root.display(), e);
        }
    }

    /// All guards, sorted by path.
    pub async fn list(&self) -> Vec<Guard> {
        self.guards.read().await.values().cloned().collect()
    }
}

fn covering<'a>(guards: &'a BTreeMap<PathBuf, Guard>, canonical: &Path) -> Option<&'a Guard> {
    canonical.ancestors().find_map(|p| guards.get(p))
}

/// Shared registry handle.
pub type SharedRegistry = Arc<Registry>;
