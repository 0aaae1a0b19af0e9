//! Release update checks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_OWNER: &str = "arfrfrr";
const DEFAULT_REPO: &str = "arngit-releases";

/// A release newer than the running version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    pub release_url: String,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changelog: String,
}

/// Where update information comes from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// `Ok(None)` when `current_version` is already the newest.
    async fn check(&self, current_version: &str) -> anyhow::Result<Option<UpdateInfo>>;
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

/// GitHub `releases/latest` lookup.
pub struct GithubReleases {
    client: Client,
    base_url: String,
    owner: String,
    repo: String,
}

impl GithubReleases {
    pub fn new() -> Self {
        Self::for_repo(DEFAULT_OWNER, DEFAULT_REPO)
    }

    pub fn for_repo(owner: &str, repo: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("arngit/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: GITHUB_API_URL.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Point at a different API host (GitHub Enterprise).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn latest_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.base_url, self.owner, self.repo
        )
    }
}

impl Default for GithubReleases {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateSource for GithubReleases {
    async fn check(&self, current_version: &str) -> anyhow::Result<Option<UpdateInfo>> {
        let response = self
            .client
            .get(self.latest_url())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reach GitHub: {}", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // No releases published yet.
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("GitHub API error: {}", status);
        }

        let release: Release = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid release response: {}", e))?;

        Ok(release_update(release, current_version))
    }
}

fn release_update(release: Release, current_version: &str) -> Option<UpdateInfo> {
    let latest = release.tag_name.trim().trim_start_matches('v').to_string();
    if !is_newer_version(&latest, current_version) {
        return None;
    }
    Some(UpdateInfo {
        version: latest,
        release_url: release.html_url,
        release_date: release.published_at,
        changelog: release.body.unwrap_or_default(),
    })
}

/// Compare dotted numeric versions. A `dev` or empty current version is
/// always older; non-numeric components count as zero.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let current = current.trim();
    if current.is_empty() || current == "dev" {
        return true;
    }

    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    };
    let latest = parse(latest);
    let current = parse(current);

    for (l, c) in latest.iter().zip(current.iter()) {
        if l != c {
            return l > c;
        }
    }
    latest.len() > current.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_versions() {
        assert!(is_newer_version("1.2.0", "1.1.9"));
        assert!(is_newer_version("v2.0", "1.9.9"));
        assert!(is_newer_version("1.0.1", "1.0"));
        assert!(is_newer_version("0.1.0", "dev"));
        assert!(is_newer_version("0.1.0", ""));

        assert!(!is_newer_version("1.0.0", "1.0.0"));
        assert!(!is_newer_version("1.0", "1.0.1"));
        assert!(!is_newer_version("1.9.9", "v2.0.0"));
        assert!(!is_newer_version("1.10.0", "1.10.0-beta"));
        assert!(is_newer_version("1.10.0", "1.9.0"));
    }

    #[test]
    fn release_maps_to_update_only_when_newer() {
        let release: Release = serde_json::from_str(
            r#"{
                "tag_name": "v0.5.0",
                "html_url": "https://github.com/arfrfrr/arngit-releases/releases/tag/v0.5.0",
                "body": "Fixes",
                "published_at": "2026-01-02T03:04:05Z"
            }"#,
        )
        .unwrap();
        let update = release_update(release, "0.4.0").expect("newer release");
        assert_eq!(update.version, "0.5.0");
        assert_eq!(update.changelog, "Fixes");
        assert!(update.release_date.is_some());

        let release: Release = serde_json::from_str(r#"{"tag_name": "0.4.0"}"#).unwrap();
        assert_eq!(release_update(release, "0.4.0"), None);
    }

    #[test]
    fn builds_latest_release_url() {
        let source = GithubReleases::for_repo("me", "tool").with_base_url("https://ghe.local/api/v3/");
        assert_eq!(
            source.latest_url(),
            "https://ghe.local/api/v3/repos/me/tool/releases/latest"
        );
    }
}
