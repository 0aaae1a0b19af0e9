//! # arngit
//!
//! Control layer for day-to-day git work across several identities.
//!
//! This library provides:
//! - A credential vault holding multiple git identities with machine-bound
//!   encrypted tokens, exactly one of them active
//! - A registry of guarded repositories that gates destructive operations
//!   behind confirmation or a password
//! - A threshold watcher that pushes automatically once enough unpushed work
//!   accumulates, and never for a guarded repository
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │              Engine              │
//!        │  (storage, config, update loop)  │
//!        └───┬──────────────┬───────────┬───┘
//!            │              │           │
//!            ▼              ▼           ▼
//!      ┌──────────┐   ┌──────────┐  ┌──────────┐
//!      │  Vault   │   │ Registry │◄─┤ Watcher  │
//!      └──────────┘   └──────────┘  └────┬─────┘
//!                                        │
//!                                        ▼
//!                                  ┌──────────┐
//!                                  │  GitCli  │
//!                                  └──────────┘
//! ```
//!
//! ## Modules
//! - `vault`: identities and the secret cipher
//! - `registry`: guarded repositories
//! - `watcher`: threshold-triggered auto-push
//! - `engine`: composition root
//! - `git`, `update`: concrete collaborators

pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod registry;
pub mod storage;
pub mod update;
pub mod vault;
pub mod watcher;

pub use config::{Config, ConfigError, ConfigKey, ConfigValue};
pub use engine::{Engine, EngineOptions};
pub use error::{Error, Result};
pub use registry::{Guard, ProtectOutcome, Registry, RegistryError};
pub use vault::{Identity, IdentityUpdate, SecretCipher, Vault, VaultError};
pub use watcher::{Trigger, TriggerKind, WatchError, WatchOptions, Watcher};
