//! User configuration stored as YAML at `<base>/config/config.yaml`.
//!
//! Every recognized key is a [`ConfigKey`]; values are parsed per key when
//! set, so the stored document is always well-typed.
//!
//! Environment overrides applied at load:
//! - `ARNGIT_UPDATE_INTERVAL_HOURS` - Hours between update checks. `0` disables them.
//!
//! The base directory itself comes from `ARNGIT_HOME` (see [`crate::storage`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::write_atomic;
use crate::watcher::{Trigger, TriggerKind, WatchOptions};

pub const UPDATE_INTERVAL_ENV: &str = "ARNGIT_UPDATE_INTERVAL_HOURS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to parse config file {}: {}", .path.display(), .reason)]
    Parse { path: PathBuf, reason: String },

    #[error("Config storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    fn invalid(key: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    #[default]
    Stable,
    Beta,
    Nightly,
}

impl UpdateChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Nightly => "nightly",
        }
    }
}

impl std::str::FromStr for UpdateChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "nightly" => Ok(Self::Nightly),
            other => Err(format!("unknown channel '{}' (stable, beta, nightly)", other)),
        }
    }
}

/// Recognized configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DefaultAccount,
    UpdateChannel,
    UpdateIntervalHours,
    DefaultBranch,
    PushAfterCommit,
    WatchTrigger,
    WatchThreshold,
    WatchIntervalSecs,
    WatchRemote,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        Self::DefaultAccount,
        Self::UpdateChannel,
        Self::UpdateIntervalHours,
        Self::DefaultBranch,
        Self::PushAfterCommit,
        Self::WatchTrigger,
        Self::WatchThreshold,
        Self::WatchIntervalSecs,
        Self::WatchRemote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefaultAccount => "default_account",
            Self::UpdateChannel => "update_channel",
            Self::UpdateIntervalHours => "update_interval_hours",
            Self::DefaultBranch => "default_branch",
            Self::PushAfterCommit => "push_after_commit",
            Self::WatchTrigger => "watch_trigger",
            Self::WatchThreshold => "watch_threshold",
            Self::WatchIntervalSecs => "watch_interval_secs",
            Self::WatchRemote => "watch_remote",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// A typed config value, as returned by [`Config::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Text(String),
    Number(u64),
    Flag(bool),
    Unset,
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Unset => f.write_str("(not set)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_account: String,
    pub update_channel: UpdateChannel,
    /// Hours between update checks; `0` disables them.
    pub update_interval_hours: u64,
    pub default_branch: String,
    pub push_after_commit: bool,

    pub watch_trigger: TriggerKind,
    /// Unset means the per-trigger default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_threshold: Option<String>,
    pub watch_interval_secs: u64,
    pub watch_remote: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            default_account: String::new(),
            update_channel: UpdateChannel::Stable,
            update_interval_hours: 24,
            default_branch: "main".to_string(),
            push_after_commit: false,
            watch_trigger: TriggerKind::CommitCount,
            watch_threshold: None,
            watch_interval_secs: 10,
            watch_remote: "origin".to_string(),
        }
    }
}

impl Config {
    /// Load `path`, creating it with defaults when missing, then apply
    /// environment overrides.
    pub async fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let mut config: Config = if text.trim().is_empty() {
                    Config::default()
                } else {
                    serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?
                };
                config.path = path;
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config {
                    path,
                    ..Default::default()
                };
                config.save().await?;
                tracing::info!("Created default config at {}", config.path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(UPDATE_INTERVAL_ENV) {
            self.update_interval_hours = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(UPDATE_INTERVAL_ENV, e))?;
            tracing::debug!(
                "Update interval overridden from environment: {}h",
                self.update_interval_hours
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        let data = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, data.as_bytes()).await?;
        Ok(())
    }

    pub fn get(&self, key: ConfigKey) -> ConfigValue {
        match key {
            ConfigKey::DefaultAccount if self.default_account.is_empty() => ConfigValue::Unset,
            ConfigKey::DefaultAccount => ConfigValue::Text(self.default_account.clone()),
            ConfigKey::UpdateChannel => ConfigValue::Text(self.update_channel.as_str().to_string()),
            ConfigKey::UpdateIntervalHours => ConfigValue::Number(self.update_interval_hours),
            ConfigKey::DefaultBranch => ConfigValue::Text(self.default_branch.clone()),
            ConfigKey::PushAfterCommit => ConfigValue::Flag(self.push_after_commit),
            ConfigKey::WatchTrigger => ConfigValue::Text(self.watch_trigger.id().to_string()),
            ConfigKey::WatchThreshold => match &self.watch_threshold {
                Some(value) => ConfigValue::Text(value.clone()),
                None => ConfigValue::Unset,
            },
            ConfigKey::WatchIntervalSecs => ConfigValue::Number(self.watch_interval_secs),
            ConfigKey::WatchRemote => ConfigValue::Text(self.watch_remote.clone()),
        }
    }

    /// Parse `value` for `key` and store it in memory. Call [`Config::save`]
    /// to persist.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            ConfigKey::DefaultAccount => self.default_account = value.to_string(),
            ConfigKey::UpdateChannel => {
                self.update_channel = value.parse().map_err(|e| ConfigError::invalid(key, e))?
            }
            ConfigKey::UpdateIntervalHours => {
                self.update_interval_hours =
                    value.parse().map_err(|e| ConfigError::invalid(key, e))?
            }
            ConfigKey::DefaultBranch => self.default_branch = non_empty(key, value)?,
            ConfigKey::PushAfterCommit => self.push_after_commit = parse_flag(key, value)?,
            ConfigKey::WatchTrigger => {
                let kind: TriggerKind = value.parse().map_err(|e| ConfigError::invalid(key, e))?;
                let stale = self
                    .watch_threshold
                    .as_deref()
                    .is_some_and(|t| Trigger::parse(kind, t).is_err());
                if stale {
                    tracing::warn!(
                        "Clearing watch_threshold {:?}: not valid for trigger {}",
                        self.watch_threshold,
                        kind
                    );
                    self.watch_threshold = None;
                }
                self.watch_trigger = kind;
            }
            ConfigKey::WatchThreshold => {
                if value.is_empty() {
                    self.watch_threshold = None;
                } else {
                    Trigger::parse(self.watch_trigger, value)
                        .map_err(|e| ConfigError::invalid(key, e))?;
                    self.watch_threshold = Some(value.to_string());
                }
            }
            ConfigKey::WatchIntervalSecs => {
                let secs: u64 = value.parse().map_err(|e| ConfigError::invalid(key, e))?;
                if secs == 0 {
                    return Err(ConfigError::invalid(key, "must be at least 1 second"));
                }
                self.watch_interval_secs = secs;
            }
            ConfigKey::WatchRemote => self.watch_remote = non_empty(key, value)?,
        }
        Ok(())
    }

    /// Period of the background update check; `None` when disabled.
    pub fn update_interval(&self) -> Option<Duration> {
        match self.update_interval_hours {
            0 => None,
            hours => Some(Duration::from_secs(hours.saturating_mul(3600))),
        }
    }

    /// Watcher overrides from the `watch_*` keys. The branch is left to the
    /// repository's current branch.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            trigger: Some(self.watch_trigger),
            threshold: self.watch_threshold.clone(),
            interval: Some(Duration::from_secs(self.watch_interval_secs)),
            remote: Some(self.watch_remote.clone()),
            branch: None,
        }
    }
}

fn non_empty(key: ConfigKey, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid(key, "must not be empty"));
    }
    Ok(value.to_string())
}

fn parse_flag(key: ConfigKey, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::invalid(key, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yaml");

        let config = Config::load(path.clone()).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.watch_trigger, TriggerKind::CommitCount);
        assert_eq!(config.get(ConfigKey::DefaultAccount), ConfigValue::Unset);
    }

    #[tokio::test]
    async fn set_and_save_roundtrip_through_yaml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yaml");

        let mut config = Config::load(path.clone()).await.unwrap();
        config.set(ConfigKey::WatchTrigger, "size").unwrap();
        config.set(ConfigKey::WatchThreshold, "2MB").unwrap();
        config.set(ConfigKey::PushAfterCommit, "yes").unwrap();
        config.set("update-channel".parse().unwrap(), "beta").unwrap();
        config.save().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("watch_trigger: size"));
        assert!(text.contains("update_channel: beta"));

        let reloaded = Config::load(path).await.unwrap();
        assert_eq!(reloaded.watch_threshold.as_deref(), Some("2MB"));
        assert_eq!(reloaded.get(ConfigKey::PushAfterCommit), ConfigValue::Flag(true));
        assert_eq!(reloaded.update_channel, UpdateChannel::Beta);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            "theme".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(config.set(ConfigKey::WatchThreshold, "5m").is_err());
        assert!(config.set(ConfigKey::WatchIntervalSecs, "0").is_err());
        assert!(config.set(ConfigKey::UpdateIntervalHours, "-1").is_err());
        assert!(config.set(ConfigKey::PushAfterCommit, "maybe").is_err());
        assert!(config.set(ConfigKey::WatchRemote, " ").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn changing_trigger_clears_incompatible_threshold() {
        let mut config = Config::default();
        config.set(ConfigKey::WatchThreshold, "7").unwrap();
        config.set(ConfigKey::WatchTrigger, "time").unwrap();
        assert_eq!(config.watch_threshold, None);

        config.set(ConfigKey::WatchThreshold, "90s").unwrap();
        config.set(ConfigKey::WatchTrigger, "time").unwrap();
        assert_eq!(config.watch_threshold.as_deref(), Some("90s"));
    }

    #[test]
    fn update_interval_floor_and_disable() {
        let mut config = Config::default();
        assert_eq!(config.update_interval(), Some(Duration::from_secs(24 * 3600)));
        config.update_interval_hours = 0;
        assert_eq!(config.update_interval(), None);
        config.update_interval_hours = 1;
        assert_eq!(config.update_interval(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn environment_overrides_interval() {
        let mut config = Config::default();
        config
            .apply_overrides(|name| (name == UPDATE_INTERVAL_ENV).then(|| "6".to_string()))
            .unwrap();
        assert_eq!(config.update_interval_hours, 6);

        assert!(config
            .apply_overrides(|_| Some("soon".to_string()))
            .is_err());
    }

    #[test]
    fn watch_options_follow_config() {
        let mut config = Config::default();
        config.set(ConfigKey::WatchIntervalSecs, "30").unwrap();
        let options = config.watch_options();
        assert_eq!(options.trigger, Some(TriggerKind::CommitCount));
        assert_eq!(options.interval, Some(Duration::from_secs(30)));
        assert_eq!(options.remote.as_deref(), Some("origin"));
        assert_eq!(options.branch, None);
    }
}
