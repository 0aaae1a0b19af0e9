//! `git` binary adapter for the watcher.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::process::Command;

use crate::watcher::{Publisher, RepoInspector};

/// HTTP basic credentials injected into network commands.
#[derive(Clone)]
pub struct GitCredentials {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl GitCredentials {
    fn extra_header(&self) -> String {
        let pair = format!("{}:{}", self.username, self.secret);
        format!("Authorization: Basic {}", BASE64.encode(pair))
    }
}

/// Runs `git` in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
    credentials: Option<GitCredentials>,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: GitCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        run_git_command(Command::new("git"), args, &self.work_dir).await
    }

    /// Like [`GitCli::run`], with credentials passed through the environment
    /// so they never appear in argv.
    async fn run_with_auth(&self, args: &[&str]) -> anyhow::Result<String> {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(credentials) = &self.credentials {
            for (key, value) in auth_env(credentials) {
                cmd.env(key, value);
            }
        }
        run_git_command(cmd, args, &self.work_dir).await
    }
}

fn auth_env(credentials: &GitCredentials) -> [(&'static str, String); 3] {
    [
        ("GIT_CONFIG_COUNT", "1".to_string()),
        ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
        ("GIT_CONFIG_VALUE_0", credentials.extra_header()),
    ]
}

fn upstream_range(remote: &str, branch: &str) -> String {
    format!("{}/{}..HEAD", remote, branch)
}

async fn run_git_command(
    mut cmd: Command,
    args: &[&str],
    repo_path: &Path,
) -> anyhow::Result<String> {
    let output = cmd
        .args(args)
        .current_dir(repo_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run git: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        if stderr.trim().is_empty() {
            return Err(anyhow::anyhow!("Git command failed: {}", stdout.trim()));
        }
        return Err(anyhow::anyhow!("Git error: {}", stderr.trim()));
    }

    Ok(stdout.into_owned())
}

#[async_trait]
impl RepoInspector for GitCli {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn is_under_version_control(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"]).await.is_ok()
    }

    async fn pending_commit_count(&self, remote: &str, branch: &str) -> anyhow::Result<u64> {
        let range = upstream_range(remote, branch);
        let out = self.run(&["rev-list", "--count", &range]).await?;
        out.trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Unexpected rev-list output '{}': {}", out.trim(), e))
    }

    /// Byte length of `diff --stat` output, a rough proxy for change volume.
    async fn unpushed_change_size(&self, remote: &str, branch: &str) -> anyhow::Result<u64> {
        let range = upstream_range(remote, branch);
        let out = self.run(&["diff", "--stat", &range]).await?;
        Ok(out.len() as u64)
    }

    async fn current_branch(&self) -> anyhow::Result<String> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = out.trim();
        if branch.is_empty() || branch == "HEAD" {
            anyhow::bail!("HEAD is detached; set a branch explicitly");
        }
        Ok(branch.to_string())
    }
}

#[async_trait]
impl Publisher for GitCli {
    async fn publish(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        tracing::debug!(
            "git push {} {} in {}",
            remote,
            branch,
            self.work_dir.display()
        );
        self.run_with_auth(&["push", remote, branch]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> GitCredentials {
        GitCredentials {
            username: "octo".to_string(),
            secret: "ghp_abc".to_string(),
        }
    }

    #[test]
    fn basic_auth_header_encoding() {
        // base64("octo:ghp_abc")
        assert_eq!(
            creds().extra_header(),
            "Authorization: Basic b2N0bzpnaHBfYWJj"
        );
    }

    #[test]
    fn credentials_go_through_git_config_env() {
        let env = auth_env(&creds());
        assert_eq!(env[0], ("GIT_CONFIG_COUNT", "1".to_string()));
        assert_eq!(env[1], ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()));
        assert!(env[2].1.starts_with("Authorization: Basic "));
    }

    #[test]
    fn debug_redacts_secret() {
        let git = GitCli::new("/tmp").with_credentials(creds());
        let shown = format!("{:?}", git);
        assert!(shown.contains("octo"));
        assert!(!shown.contains("ghp_abc"));
        assert!(git.has_credentials());
    }

    #[test]
    fn range_targets_remote_branch() {
        assert_eq!(upstream_range("origin", "main"), "origin/main..HEAD");
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_repository() {
        let temp = tempfile::tempdir().unwrap();
        let git = GitCli::new(temp.path());
        assert!(!git.is_under_version_control().await);
        assert_eq!(git.work_dir(), temp.path());
    }
}
