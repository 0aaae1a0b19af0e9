//! Composition root.
//!
//! The [`Engine`] owns storage, configuration, the credential vault and the
//! guarded-repository registry, and hands out collaborators wired to them.
//! Nothing here is global: every caller goes through an `Engine` value.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigKey};
use crate::error::{Error, Result};
use crate::git::{GitCli, GitCredentials};
use crate::registry::{verify_password, Registry, RegistryError, SharedRegistry};
use crate::storage::{default_base_dir, Storage};
use crate::update::{UpdateInfo, UpdateSource};
use crate::vault::{SharedVault, Vault};
use crate::watcher::{Publisher, RepoInspector, WatchListener, WatchOptions, Watcher};

const DEFAULT_UPDATE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Storage root. Defaults to `$ARNGIT_HOME` or `~/.arngit`.
    pub base_dir: Option<PathBuf>,
    /// Version compared against published releases.
    pub version: String,
    /// Delay before the first background update check.
    pub update_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            update_delay: DEFAULT_UPDATE_DELAY,
        }
    }
}

pub struct Engine {
    storage: Storage,
    config: RwLock<Config>,
    vault: SharedVault,
    registry: SharedRegistry,
    version: String,
    update_delay: Duration,
    started_at: Instant,
    latest_update: Arc<RwLock<Option<UpdateInfo>>>,
    shutdown: CancellationToken,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub async fn open(options: EngineOptions) -> Result<Self> {
        let started_at = Instant::now();

        let base_dir = options.base_dir.unwrap_or_else(default_base_dir);
        let storage = Storage::open(base_dir).await?;
        let config = Config::load(storage.config_file()).await?;
        let vault = Arc::new(Vault::open(storage.accounts_dir()).await?);
        let registry = Arc::new(Registry::open(storage.protected_file()).await?);

        tracing::info!(
            "arngit {} engine started (home: {})",
            options.version,
            storage.base_dir().display()
        );

        Ok(Self {
            storage,
            config: RwLock::new(config),
            vault,
            registry,
            version: options.version,
            update_delay: options.update_delay,
            started_at,
            latest_update: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
            update_task: Mutex::new(None),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn vault(&self) -> SharedVault {
        Arc::clone(&self.vault)
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Parse and persist one config value. Memory changes only if the save
    /// succeeds.
    pub async fn set_config(&self, key: ConfigKey, value: &str) -> Result<()> {
        let mut config = self.config.write().await;
        let mut updated = config.clone();
        updated.set(key, value)?;
        updated.save().await?;
        *config = updated;
        tracing::info!("Set {} = {}", key, config.get(key));
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Gate for history-rewriting or otherwise destructive operations on
    /// `path`.
    ///
    /// Unguarded paths and confirmation-only guards pass; the caller is
    /// expected to have confirmed interactively for the latter.
    pub async fn authorize_destructive(&self, path: &Path, password: &str) -> Result<()> {
        let Some(guard) = self.registry.get_protection(path).await else {
            return Ok(());
        };

        if guard.has_password() && !verify_password(password, &guard.password_hash) {
            tracing::warn!(
                "Denied destructive operation on protected repository {}",
                guard.path.display()
            );
            return Err(RegistryError::AccessDenied(guard.path).into());
        }

        self.registry.update_last_accessed(path).await;
        Ok(())
    }

    /// `git` runner for `path`, authenticated as the active identity when
    /// there is one.
    pub async fn git_for(&self, path: &Path) -> GitCli {
        let git = GitCli::new(path);
        let Some(identity) = self.vault.current().await else {
            return git;
        };

        match self.vault.get_secret(&identity.name).await {
            Ok(secret) => git.with_credentials(GitCredentials {
                username: identity.username,
                secret,
            }),
            Err(e) => {
                tracing::warn!(
                    "Running git without credentials for '{}': {}",
                    identity.name,
                    e
                );
                git
            }
        }
    }

    /// Build a watcher that consults this engine's registry before every
    /// publish.
    pub async fn watcher(
        &self,
        inspector: Arc<dyn RepoInspector>,
        publisher: Arc<dyn Publisher>,
        options: WatchOptions,
        listener: Arc<dyn WatchListener>,
    ) -> Result<Watcher> {
        Watcher::new(
            inspector,
            publisher,
            Arc::clone(&self.registry),
            options,
            listener,
        )
        .await
        .map_err(Error::from)
    }

    /// Latest release found by the background check, if newer.
    pub async fn available_update(&self) -> Option<UpdateInfo> {
        self.latest_update.read().await.clone()
    }

    /// Start periodic update checks until [`Engine::shutdown`]. Returns
    /// `false` when checks are disabled (`update_interval_hours: 0`), already
    /// running, or the engine has shut down.
    pub async fn start_update_checks(&self, source: Arc<dyn UpdateSource>) -> bool {
        let Some(interval) = self.config.read().await.update_interval() else {
            tracing::debug!("Update checks disabled");
            return false;
        };

        let mut update_task = self.update_task.lock().await;
        if update_task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Update checks already running");
            return false;
        }
        if self.shutdown.is_cancelled() {
            tracing::debug!("Engine is shut down; not starting update checks");
            return false;
        }

        let cancel = self.shutdown.child_token();
        let version = self.version.clone();
        let latest = Arc::clone(&self.latest_update);
        let mut delay = self.update_delay;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = source.check(&version) => result,
                };
                match result {
                    Ok(Some(update)) => {
                        tracing::info!("Update available: {}", update.version);
                        *latest.write().await = Some(update);
                    }
                    Ok(None) => tracing::debug!("arngit {} is up to date", version),
                    Err(e) => tracing::warn!("Update check failed: {:#}", e),
                }

                delay = interval;
            }
            tracing::debug!("Update checks stopped");
        });

        *update_task = Some(task);
        true
    }

    /// Stop background work and wait for it to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.update_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
        tracing::info!(
            "arngit engine shutting down after {}s",
            self.uptime().as_secs()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    async fn engine_in(dir: &Path) -> Engine {
        Engine::open(EngineOptions {
            base_dir: Some(dir.join("home")),
            version: "0.4.0".to_string(),
            update_delay: Duration::ZERO,
        })
        .await
        .unwrap()
    }

    struct FakeSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpdateSource for FakeSource {
        async fn check(&self, current_version: &str) -> anyhow::Result<Option<UpdateInfo>> {
            assert_eq!(current_version, "0.4.0");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(UpdateInfo {
                version: "0.5.0".to_string(),
                release_url: "https://example.invalid/release".to_string(),
                release_date: None,
                changelog: String::new(),
            }))
        }
    }

    #[tokio::test]
    async fn open_creates_layout() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path()).await;

        assert!(engine.storage().config_file().exists());
        assert!(engine.storage().accounts_dir().is_dir());
        assert!(engine.vault().is_empty().await);
        assert!(engine.registry().list().await.is_empty());
        assert_eq!(engine.version(), "0.4.0");
    }

    #[tokio::test]
    async fn destructive_operations_need_the_guard_password() {
        let temp = tempfile::tempdir().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        let engine = engine_in(temp.path()).await;

        engine.authorize_destructive(&repo, "").await.unwrap();

        engine.registry().protect(&repo, "hunter2").await.unwrap();
        let err = engine
            .authorize_destructive(&repo.join("src"), "wrong")
            .await
            .unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(err.code(), "GIT_PROTECTED");

        engine.authorize_destructive(&repo, "hunter2").await.unwrap();
        let guard = engine.registry().get_protection(&repo).await.unwrap();
        assert!(guard.last_accessed.is_some());
    }

    #[tokio::test]
    async fn confirmation_only_guard_passes() {
        let temp = tempfile::tempdir().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let engine = engine_in(temp.path()).await;

        engine.registry().protect(&repo, "").await.unwrap();
        engine.authorize_destructive(&repo, "").await.unwrap();
    }

    #[tokio::test]
    async fn git_uses_active_identity() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path()).await;

        assert!(!engine.git_for(temp.path()).await.has_credentials());

        engine
            .vault()
            .add("work", "octo", "octo@example.com", "ghp_token")
            .await
            .unwrap();
        let git = engine.git_for(temp.path()).await;
        assert!(git.has_credentials());
        assert!(!format!("{:?}", git).contains("ghp_token"));
    }

    #[tokio::test]
    async fn config_changes_persist() {
        let temp = tempfile::tempdir().unwrap();
        {
            let engine = engine_in(temp.path()).await;
            engine
                .set_config(ConfigKey::WatchRemote, "upstream")
                .await
                .unwrap();
            assert!(engine
                .set_config(ConfigKey::WatchIntervalSecs, "never")
                .await
                .is_err());
        }

        let engine = engine_in(temp.path()).await;
        let config = engine.config().await;
        assert_eq!(config.watch_remote, "upstream");
        assert_eq!(config.watch_interval_secs, 10);
    }

    #[tokio::test]
    async fn update_checks_run_until_shutdown() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path()).await;
        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
        });

        assert!(engine.start_update_checks(source.clone()).await);
        assert!(!engine.start_update_checks(source.clone()).await);

        tokio::time::timeout(WAIT, async {
            while engine.available_update().await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("update check did not run");

        tokio::time::timeout(WAIT, engine.shutdown())
            .await
            .expect("shutdown hung");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.available_update().await.unwrap().version, "0.5.0");
    }

    #[tokio::test]
    async fn update_checks_do_not_restart_after_shutdown() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path()).await;
        engine.shutdown().await;

        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
        });
        assert!(!engine.start_update_checks(source.clone()).await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_interval_disables_update_checks() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path()).await;
        engine
            .set_config(ConfigKey::UpdateIntervalHours, "0")
            .await
            .unwrap();

        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
        });
        assert!(!engine.start_update_checks(source).await);
        engine.shutdown().await;
    }
}
