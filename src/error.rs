//! Crate-level error with stable codes and remediation hints.

use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::vault::VaultError;
use crate::watcher::WatchError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize storage: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable identifier for user-facing output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Vault(e) => match e {
                VaultError::DuplicateIdentity(_) => "ACCOUNT_EXISTS",
                VaultError::NotFound(_) => "ACCOUNT_NOT_FOUND",
                VaultError::InvalidName(_) => "ACCOUNT_INVALID_NAME",
                VaultError::Encryption(_) => "PAT_ENCRYPT",
                VaultError::Decrypt { .. } => "PAT_DECRYPT",
                VaultError::Io(_) => "ACCOUNT_STORAGE",
            },
            Self::Registry(e) => match e {
                RegistryError::AccessDenied(_) => "GIT_PROTECTED",
                RegistryError::AlreadyProtected { .. } => "ALREADY_PROTECTED",
                RegistryError::InvalidPath { .. } => "INVALID_PATH",
                RegistryError::Corrupt(_) | RegistryError::Io(_) => "PROTECTED_STORAGE",
            },
            Self::Watch(e) => match e {
                WatchError::NotARepository(_) => "GIT_NO_REPO",
                WatchError::PublishBlocked(_) => "GIT_PROTECTED",
                WatchError::PublishFailed { .. } => "GIT_PUSH",
                WatchError::Inspect(_) => "GIT_COMMAND",
                WatchError::Config(_) => "WATCH_CONFIG",
            },
            Self::Config(e) => match e {
                ConfigError::UnknownKey(_) => "CONFIG_UNKNOWN_KEY",
                ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
                ConfigError::Parse { .. } => "CONFIG_LOAD",
                ConfigError::Io(_) => "CONFIG_SAVE",
            },
            Self::Storage(_) => "STORAGE_INIT",
        }
    }

    /// One-line remediation text.
    pub fn hint(&self) -> &'static str {
        match self.code() {
            "ACCOUNT_EXISTS" => "Use a different name or remove the existing account first",
            "ACCOUNT_NOT_FOUND" => "List accounts to see the available names",
            "ACCOUNT_INVALID_NAME" => "Use letters, digits, '.', '-' or '_' (not starting with '.')",
            "PAT_ENCRYPT" => "This is an internal error. Please report this issue.",
            "PAT_DECRYPT" => {
                "The token may have been encrypted on a different machine. Re-add the account."
            }
            "GIT_PROTECTED" => "Confirm with the repository password, or unprotect the repo first",
            "ALREADY_PROTECTED" => "Unprotect the existing guard first to change its password",
            "INVALID_PATH" => "Check that the directory exists",
            "GIT_NO_REPO" => "Navigate to an existing repository",
            "GIT_PUSH" => "Check the remote, your network connection and token permissions",
            "GIT_COMMAND" => "Check that git is installed and the remote branch exists",
            "WATCH_CONFIG" => "Thresholds: commits as a number, time like 5m, size like 1MB",
            "CONFIG_UNKNOWN_KEY" | "CONFIG_INVALID_VALUE" => "Check the key name and value format",
            "CONFIG_LOAD" => "Check that ~/.arngit/config/config.yaml is valid YAML",
            "CONFIG_SAVE" => "Check write permissions for ~/.arngit/config/",
            "ACCOUNT_STORAGE" | "PROTECTED_STORAGE" | "STORAGE_INIT" => {
                "Check write permissions for the ~/.arngit directory"
            }
            _ => "",
        }
    }

    /// The caller must supply credentials or change a guard; retrying as-is
    /// will not help.
    pub fn is_authorization(&self) -> bool {
        match self {
            Self::Registry(RegistryError::AccessDenied(_)) => true,
            Self::Watch(e) => e.is_authorization(),
            _ => false,
        }
    }

    /// May succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Watch(e) => e.is_transient(),
            Self::Vault(VaultError::Io(_))
            | Self::Registry(RegistryError::Io(_))
            | Self::Config(ConfigError::Io(_))
            | Self::Storage(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn codes_and_hints() {
        let err: Error = VaultError::NotFound("work".to_string()).into();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
        assert!(!err.hint().is_empty());
        assert!(err.to_string().contains("work"));

        let err: Error = ConfigError::UnknownKey("theme".to_string()).into();
        assert_eq!(err.code(), "CONFIG_UNKNOWN_KEY");
    }

    #[test]
    fn authorization_is_distinct_from_transient() {
        let denied: Error = RegistryError::AccessDenied(PathBuf::from("/repo")).into();
        assert!(denied.is_authorization());
        assert!(!denied.is_transient());

        let blocked: Error = WatchError::PublishBlocked(PathBuf::from("/repo")).into();
        assert!(blocked.is_authorization());
        assert_eq!(blocked.code(), "GIT_PROTECTED");

        let failed: Error = WatchError::PublishFailed {
            remote: "origin".to_string(),
            branch: "main".to_string(),
            message: "timeout".to_string(),
        }
        .into();
        assert!(failed.is_transient());
        assert!(!failed.is_authorization());
    }
}
