//! Threshold watcher: autonomous, cancellable auto-push.
//!
//! Every poll interval the watcher measures one dimension of unpushed work
//! (pending commits, time since the last push, or unpushed change size) and
//! publishes once the threshold is crossed. Protected repositories are never
//! published; the attempt is reported as [`WatchError::PublishBlocked`].
//!
//! ```ignore
//! let watcher = Watcher::new(inspector, publisher, registry, options, listener).await?;
//! let handle = watcher.spawn();
//! // ...
//! handle.stop();
//! handle.join().await?;
//! ```

mod listener;
mod trigger;

pub use listener::{ChannelListener, LogListener, NoopListener, WatchEvent, WatchListener};
pub use trigger::{
    format_duration, format_size, parse_duration, parse_size, Trigger, TriggerKind,
    TriggerParseError,
};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Current value reported when the repository could not be inspected.
pub const UNKNOWN_VALUE: &str = "?";

/// Read-only view of the repository being watched.
#[async_trait]
pub trait RepoInspector: Send + Sync {
    /// Working directory checked against the protection registry.
    fn work_dir(&self) -> &Path;

    async fn is_under_version_control(&self) -> bool;

    async fn pending_commit_count(&self, remote: &str, branch: &str) -> anyhow::Result<u64>;

    async fn unpushed_change_size(&self, remote: &str, branch: &str) -> anyhow::Result<u64>;

    async fn current_branch(&self) -> anyhow::Result<String>;
}

/// Performs the actual push.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, remote: &str, branch: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Error)]
pub enum WatchError {
    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("Repository {} is protected; skipping auto-push", .0.display())]
    PublishBlocked(PathBuf),

    #[error("Push to {remote}/{branch} failed: {message}")]
    PublishFailed {
        remote: String,
        branch: String,
        message: String,
    },

    #[error("Failed to inspect repository: {0}")]
    Inspect(String),

    #[error(transparent)]
    Config(#[from] TriggerParseError),
}

impl WatchError {
    /// Needs the user to intervene (e.g. unprotect) rather than a retry.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::PublishBlocked(_))
    }

    /// May succeed on a later poll without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PublishFailed { .. } | Self::Inspect(_))
    }
}

/// Overrides applied on top of the watcher defaults.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub trigger: Option<TriggerKind>,
    /// Threshold text, parsed according to the trigger kind.
    pub threshold: Option<String>,
    pub interval: Option<Duration>,
    pub remote: Option<String>,
    pub branch: Option<String>,
}

/// Resolved, immutable configuration for one watch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    pub trigger: Trigger,
    pub interval: Duration,
    pub remote: String,
    pub branch: String,
}

impl WatcherConfig {
    pub fn summary(&self) -> String {
        format!(
            "threshold={}:{} interval={} remote={} branch={}",
            self.trigger.kind(),
            self.trigger.threshold_display(),
            format_duration(self.interval),
            self.remote,
            self.branch
        )
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Idle(String),
    Publish {
        reason: String,
        /// Pending commits, when the evaluation already counted them.
        pending: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Evaluation {
    current: String,
    threshold: String,
    decision: Decision,
}

pub struct Watcher {
    inspector: Arc<dyn RepoInspector>,
    publisher: Arc<dyn Publisher>,
    registry: Arc<Registry>,
    listener: Arc<dyn WatchListener>,
    config: WatcherConfig,
    cancel: CancellationToken,
}

impl Watcher {
    /// Resolve `options` against the repository and defaults.
    ///
    /// Fails with [`WatchError::NotARepository`] outside version control.
    pub async fn new(
        inspector: Arc<dyn RepoInspector>,
        publisher: Arc<dyn Publisher>,
        registry: Arc<Registry>,
        options: WatchOptions,
        listener: Arc<dyn WatchListener>,
    ) -> Result<Self, WatchError> {
        if !inspector.is_under_version_control().await {
            return Err(WatchError::NotARepository(inspector.work_dir().to_path_buf()));
        }

        let branch = match options.branch.filter(|b| !b.trim().is_empty()) {
            Some(branch) => branch,
            None => inspector
                .current_branch()
                .await
                .map_err(|e| WatchError::Inspect(format!("{:#}", e)))?,
        };
        let remote = options
            .remote
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REMOTE.to_string());
        let interval = options
            .interval
            .filter(|i| !i.is_zero())
            .unwrap_or(DEFAULT_INTERVAL);

        let kind = options.trigger.unwrap_or(TriggerKind::CommitCount);
        let trigger = match options.threshold.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Trigger::parse(kind, value)?,
            _ => Trigger::default_for(kind),
        };

        Ok(Self {
            inspector,
            publisher,
            registry,
            listener,
            config: WatcherConfig {
                trigger,
                interval,
                remote,
                branch,
            },
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop scheduling polls. An in-flight publish completes first.
    /// Idempotent, and valid before the loop starts.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run the loop on a dedicated task.
    pub fn spawn(self) -> WatchHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { self.run().await });
        WatchHandle { cancel, task }
    }

    /// Poll until stopped. Returns once cancelled.
    pub async fn run(&self) {
        tracing::info!(
            "Watching {} ({})",
            self.inspector.work_dir().display(),
            self.config.summary()
        );

        let mut last_publish = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            self.poll(&mut last_publish).await;
        }

        tracing::info!("Stopped watching {}", self.inspector.work_dir().display());
    }

    async fn poll(&self, last_publish: &mut Instant) {
        let evaluation = match self.evaluate(*last_publish).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                // Every poll reports an evaluation, even an unmeasurable one.
                self.listener.on_evaluated(
                    self.config.trigger.kind(),
                    UNKNOWN_VALUE,
                    &self.config.trigger.threshold_display(),
                );
                self.listener.on_failed(&e);
                return;
            }
        };

        self.listener.on_evaluated(
            self.config.trigger.kind(),
            &evaluation.current,
            &evaluation.threshold,
        );

        match evaluation.decision {
            Decision::Idle(reason) => self.listener.on_idle(&reason),
            Decision::Publish { reason, pending } => {
                if self.cancel.is_cancelled() {
                    return;
                }
                tracing::info!("Threshold reached: {}", reason);
                match self.publish(pending).await {
                    Ok(count) => {
                        *last_publish = Instant::now();
                        self.listener
                            .on_published(&self.config.remote, &self.config.branch, count);
                    }
                    Err(e) => self.listener.on_failed(&e),
                }
            }
        }
    }

    async fn evaluate(&self, last_publish: Instant) -> Result<Evaluation, WatchError> {
        let remote = &self.config.remote;
        let branch = &self.config.branch;
        let inspect = |e: anyhow::Error| WatchError::Inspect(format!("{:#}", e));

        let evaluation = match self.config.trigger {
            Trigger::CommitCount(threshold) => {
                let count = self
                    .inspector
                    .pending_commit_count(remote, branch)
                    .await
                    .map_err(inspect)?;
                let decision = if count >= threshold {
                    Decision::Publish {
                        reason: format!("{} commits pending (threshold: {})", count, threshold),
                        pending: Some(count),
                    }
                } else {
                    Decision::Idle(format!("{}/{} commits", count, threshold))
                };
                Evaluation {
                    current: count.to_string(),
                    threshold: threshold.to_string(),
                    decision,
                }
            }

            Trigger::ElapsedTime(threshold) => {
                let elapsed = last_publish.elapsed();
                let current = format_duration(Duration::from_secs(elapsed.as_secs()));
                let threshold_text = format_duration(threshold);
                let decision = if elapsed >= threshold {
                    let count = self
                        .inspector
                        .pending_commit_count(remote, branch)
                        .await
                        .map_err(inspect)?;
                    if count > 0 {
                        Decision::Publish {
                            reason: format!("time threshold reached ({})", threshold_text),
                            pending: Some(count),
                        }
                    } else {
                        Decision::Idle(format!(
                            "{}/{} elapsed, nothing to push",
                            current, threshold_text
                        ))
                    }
                } else {
                    Decision::Idle(format!("{}/{} elapsed", current, threshold_text))
                };
                Evaluation {
                    current,
                    threshold: threshold_text,
                    decision,
                }
            }

            Trigger::ChangeSize(threshold) => {
                let size = self
                    .inspector
                    .unpushed_change_size(remote, branch)
                    .await
                    .map_err(inspect)?;
                let decision = if size >= threshold {
                    Decision::Publish {
                        reason: format!("size threshold reached ({})", format_size(size)),
                        pending: None,
                    }
                } else {
                    Decision::Idle(format!(
                        "{}/{} unpushed",
                        format_size(size),
                        format_size(threshold)
                    ))
                };
                Evaluation {
                    current: format_size(size),
                    threshold: format_size(threshold),
                    decision,
                }
            }
        };

        Ok(evaluation)
    }

    /// Check protection, then push. Returns the number of commits pushed.
    async fn publish(&self, pending: Option<u64>) -> Result<u64, WatchError> {
        let work_dir = self.inspector.work_dir();
        if self.registry.is_protected(work_dir).await {
            return Err(WatchError::PublishBlocked(work_dir.to_path_buf()));
        }

        let remote = &self.config.remote;
        let branch = &self.config.branch;
        let count = match pending {
            Some(count) => count,
            None => match self.inspector.pending_commit_count(remote, branch).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!("Could not count pending commits: {:#}", e);
                    0
                }
            },
        };

        self.publisher
            .publish(remote, branch)
            .await
            .map_err(|e| WatchError::PublishFailed {
                remote: remote.clone(),
                branch: branch.clone(),
                message: format!("{:#}", e),
            })?;

        Ok(count)
    }
}

/// Handle to a spawned watcher.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to return.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}
