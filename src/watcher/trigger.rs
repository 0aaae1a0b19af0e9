//! Trigger kinds, threshold parsing and human-readable formatting.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// The dimension a watcher evaluates each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    #[serde(rename = "commits", alias = "commit-count")]
    CommitCount,
    #[serde(rename = "time", alias = "elapsed-time")]
    ElapsedTime,
    #[serde(rename = "size", alias = "change-size")]
    ChangeSize,
}

impl TriggerKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::CommitCount => "commits",
            Self::ElapsedTime => "time",
            Self::ChangeSize => "size",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = TriggerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commits" | "commit-count" | "commit" => Ok(Self::CommitCount),
            "time" | "elapsed-time" | "elapsed" => Ok(Self::ElapsedTime),
            "size" | "change-size" => Ok(Self::ChangeSize),
            _ => Err(TriggerParseError::new(
                "trigger",
                s,
                "expected one of: commits, time, size",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} threshold '{value}': {reason}")]
pub struct TriggerParseError {
    pub kind: String,
    pub value: String,
    pub reason: String,
}

impl TriggerParseError {
    fn new(kind: &str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A trigger kind bound to a compatible threshold value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    CommitCount(u64),
    ElapsedTime(Duration),
    ChangeSize(u64),
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::CommitCount(_) => TriggerKind::CommitCount,
            Self::ElapsedTime(_) => TriggerKind::ElapsedTime,
            Self::ChangeSize(_) => TriggerKind::ChangeSize,
        }
    }

    /// Threshold used when only the kind is configured.
    pub fn default_for(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::CommitCount => Self::CommitCount(3),
            TriggerKind::ElapsedTime => Self::ElapsedTime(Duration::from_secs(5 * 60)),
            TriggerKind::ChangeSize => Self::ChangeSize(MB),
        }
    }

    /// Parse `value` according to `kind`. Thresholds must be positive.
    pub fn parse(kind: TriggerKind, value: &str) -> Result<Self, TriggerParseError> {
        let err = |reason: String| TriggerParseError::new(kind.id(), value, reason);
        let trigger = match kind {
            TriggerKind::CommitCount => Self::CommitCount(
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| err(e.to_string()))?,
            ),
            TriggerKind::ElapsedTime => Self::ElapsedTime(parse_duration(value).map_err(err)?),
            TriggerKind::ChangeSize => Self::ChangeSize(parse_size(value).map_err(err)?),
        };

        let positive = match trigger {
            Self::CommitCount(n) | Self::ChangeSize(n) => n > 0,
            Self::ElapsedTime(d) => !d.is_zero(),
        };
        if !positive {
            return Err(err("threshold must be greater than zero".to_string()));
        }
        Ok(trigger)
    }

    /// Threshold rendered for status output.
    pub fn threshold_display(&self) -> String {
        match self {
            Self::CommitCount(n) => n.to_string(),
            Self::ElapsedTime(d) => format_duration(*d),
            Self::ChangeSize(n) => format_size(*n),
        }
    }
}

/// Parse `<integer>[B|KB|MB|GB]` (case-insensitive, powers of 1024).
/// Unsuffixed values are bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let upper = s.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, GB)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, MB)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, KB)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    let digits = digits.trim();
    if digits.is_empty() {
        return Err("missing number".to_string());
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{}' is not a whole number", digits))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| "size is too large".to_string())
}

/// Parse durations like `90s`, `5m`, `1h30m`, `250ms`. A bare integer is
/// seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("missing duration".to_string());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = s.parse().map_err(|_| "duration is too large".to_string())?;
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(format!("expected a number at '{}'", rest));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| "duration is too large".to_string())?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_end] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err("missing unit".to_string()),
            unit => return Err(format!("unknown unit '{}' (use ms, s, m or h)", unit)),
        };
        rest = &rest[unit_end..];

        total = total
            .checked_add(part)
            .ok_or_else(|| "duration is too large".to_string())?;
    }

    Ok(total)
}

/// `512 B`, `1.5 KB`, `2.0 MB`, `1.0 GB`.
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Compact `1h30m`, `45s`, `250ms` rendering.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        let millis = d.subsec_millis();
        return if millis == 0 {
            "0s".to_string()
        } else {
            format!("{}ms", millis)
        };
    }

    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{}s", s));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("2MB"), Ok(2_097_152));
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("1kb"), Ok(1024));
        assert_eq!(parse_size(" 3 GB "), Ok(3 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("10B"), Ok(10));

        assert!(parse_size("MB").is_err());
        assert!(parse_size("2XB").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("1.5MB").is_err());
        assert!(parse_size("99999999999999999GB").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("1h30").is_err());
    }

    #[test]
    fn trigger_value_must_match_kind() {
        assert_eq!(
            Trigger::parse(TriggerKind::CommitCount, "5"),
            Ok(Trigger::CommitCount(5))
        );
        assert_eq!(
            Trigger::parse(TriggerKind::ChangeSize, "2MB"),
            Ok(Trigger::ChangeSize(2_097_152))
        );
        assert_eq!(
            Trigger::parse(TriggerKind::ElapsedTime, "2m"),
            Ok(Trigger::ElapsedTime(Duration::from_secs(120)))
        );

        assert!(Trigger::parse(TriggerKind::CommitCount, "5m").is_err());
        assert!(Trigger::parse(TriggerKind::ElapsedTime, "1MB").is_err());
        assert!(Trigger::parse(TriggerKind::CommitCount, "0").is_err());
        assert!(Trigger::parse(TriggerKind::ChangeSize, "0KB").is_err());
    }

    #[test]
    fn kind_names() {
        assert_eq!("commits".parse::<TriggerKind>(), Ok(TriggerKind::CommitCount));
        assert_eq!("Elapsed-Time".parse::<TriggerKind>(), Ok(TriggerKind::ElapsedTime));
        assert_eq!("size".parse::<TriggerKind>(), Ok(TriggerKind::ChangeSize));
        assert!("bytes".parse::<TriggerKind>().is_err());
        assert_eq!(
            serde_json::to_string(&TriggerKind::ElapsedTime).unwrap(),
            "\"time\""
        );
    }

    #[test]
    fn defaults_per_kind() {
        assert_eq!(
            Trigger::default_for(TriggerKind::CommitCount),
            Trigger::CommitCount(3)
        );
        assert_eq!(
            Trigger::default_for(TriggerKind::ElapsedTime).threshold_display(),
            "5m"
        );
        assert_eq!(
            Trigger::default_for(TriggerKind::ChangeSize).threshold_display(),
            "1.0 MB"
        );
    }

    #[test]
    fn formats_sizes_and_durations() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2 * MB), "2.0 MB");
        assert_eq!(format_size(GB), "1.0 GB");

        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(3601)), "1h1s");
    }
}
