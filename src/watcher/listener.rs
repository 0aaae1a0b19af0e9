//! Watcher observation surface.
//!
//! A listener is fixed at construction; callbacks run synchronously on the
//! watcher's own task and must return promptly.

use tokio::sync::mpsc;

use super::trigger::TriggerKind;
use super::WatchError;

pub trait WatchListener: Send + Sync {
    /// A publish succeeded.
    fn on_published(&self, _remote: &str, _branch: &str, _commit_count: u64) {}

    /// A publish was blocked or failed, or the repository could not be
    /// inspected. The watch continues.
    fn on_failed(&self, _error: &WatchError) {}

    /// Fired on every poll with the measured value and the threshold.
    fn on_evaluated(&self, _kind: TriggerKind, _current: &str, _threshold: &str) {}

    /// No trigger condition was met; `reason` is a snapshot like `2/5 commits`.
    fn on_idle(&self, _reason: &str) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl WatchListener for NoopListener {}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl WatchListener for LogListener {
    fn on_published(&self, remote: &str, branch: &str, commit_count: u64) {
        tracing::info!(
            "Auto-pushed {} commit(s) to {}/{}",
            commit_count,
            remote,
            branch
        );
    }

    fn on_failed(&self, error: &WatchError) {
        if error.is_authorization() {
            tracing::warn!("{}", error);
        } else {
            tracing::error!("{}", error);
        }
    }

    fn on_evaluated(&self, kind: TriggerKind, current: &str, threshold: &str) {
        tracing::debug!("Checked {} threshold: {} / {}", kind, current, threshold);
    }

    fn on_idle(&self, reason: &str) {
        tracing::debug!("Waiting: {}", reason);
    }
}

/// Watcher events as values.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Published {
        remote: String,
        branch: String,
        commit_count: u64,
    },
    Failed(WatchError),
    Evaluated {
        kind: TriggerKind,
        current: String,
        threshold: String,
    },
    Idle(String),
}

/// Forwards events into an unbounded channel, so sending never blocks the
/// watch loop.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: WatchEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl WatchListener for ChannelListener {
    fn on_published(&self, remote: &str, branch: &str, commit_count: u64) {
        self.send(WatchEvent::Published {
            remote: remote.to_string(),
            branch: branch.to_string(),
            commit_count,
        });
    }

    fn on_failed(&self, error: &WatchError) {
        self.send(WatchEvent::Failed(error.clone()));
    }

    fn on_evaluated(&self, kind: TriggerKind, current: &str, threshold: &str) {
        self.send(WatchEvent::Evaluated {
            kind,
            current: current.to_string(),
            threshold: threshold.to_string(),
        });
    }

    fn on_idle(&self, reason: &str) {
        self.send(WatchEvent::Idle(reason.to_string()));
    }
}
