use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default backup file name pattern.
pub const DEFAULT_NAME_PATTERN: &str = "{filename}_{timestamp}.bak";

/// Timestamp format substituted for `{timestamp}` in backup names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of the default backup directory, created next to the managed file.
pub const DEFAULT_BACKUP_DIR: &str = ".backup";

/// Backup location, naming and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Backup directory. `None` places backups in `<file-dir>/.backup`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Pattern with `{filename}`, `{timestamp}` and `{extension}` placeholders.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
    /// Keep at most this many backups per file (0 keeps all).
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Delete backups older than this (`None` keeps them regardless of age).
    #[serde(default = "default_retention")]
    pub retention_period: Option<Duration>,
}

fn default_name_pattern() -> String {
    DEFAULT_NAME_PATTERN.to_string()
}

fn default_max_count() -> usize {
    10
}

fn default_retention() -> Option<Duration> {
    Some(Duration::from_secs(30 * 24 * 60 * 60))
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            directory: None,
            name_pattern: default_name_pattern(),
            max_count: default_max_count(),
            retention_period: default_retention(),
        }
    }
}

impl BackupOptions {
    /// Directory that holds backups of `source`.
    pub fn directory_for(&self, source: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) => dir.clone(),
            None => source
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_BACKUP_DIR),
        }
    }
}

/// Where a managed file's remote copy lives and how often to look at it.
///
/// Addressing is `owner/repo` + branch + in-repo path. With an `auth_token`
/// the authenticated (rate-limited) API endpoint is used, otherwise the
/// unauthenticated raw-content endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteFileConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub remote_path: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: Duration,
    #[serde(default = "default_metadata_cache")]
    pub metadata_cache_duration: Duration,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_metadata_cache() -> Duration {
    Duration::from_secs(60)
}

impl RemoteFileConfig {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            remote_path: remote_path.into(),
            auth_token: None,
            polling_interval: default_polling_interval(),
            metadata_cache_duration: default_metadata_cache(),
        }
    }

    /// Parse an `owner/repo` slug.
    pub fn from_slug(slug: &str, remote_path: impl Into<String>) -> Option<Self> {
        let (owner, repo) = slug.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(owner, repo, remote_path))
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Remote path without leading slashes.
    pub fn normalized_path(&self) -> &str {
        self.remote_path.trim_start_matches('/')
    }

    /// Human-readable address, e.g. `owner/repo@main:config/app.json`.
    pub fn display_address(&self) -> String {
        format!(
            "{}/{}@{}:{}",
            self.owner,
            self.repo,
            self.branch,
            self.normalized_path()
        )
    }
}

impl std::fmt::Debug for RemoteFileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFileConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("remote_path", &self.remote_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("polling_interval", &self.polling_interval)
            .field("metadata_cache_duration", &self.metadata_cache_duration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backup_directory_is_next_to_file() {
        let options = BackupOptions::default();
        assert_eq!(
            options.directory_for(Path::new("/data/app/settings.json")),
            PathBuf::from("/data/app/.backup")
        );

        let custom = BackupOptions {
            directory: Some(PathBuf::from("/backups")),
            ..Default::default()
        };
        assert_eq!(
            custom.directory_for(Path::new("/data/app/settings.json")),
            PathBuf::from("/backups")
        );
    }

    #[test]
    fn test_from_slug() {
        let config = RemoteFileConfig::from_slug("octo/dotfiles", "/cfg/app.json").unwrap();
        assert_eq!(config.owner, "octo");
        assert_eq!(config.repo, "dotfiles");
        assert_eq!(config.branch, "main");
        assert_eq!(config.normalized_path(), "cfg/app.json");
        assert_eq!(config.display_address(), "octo/dotfiles@main:cfg/app.json");

        assert!(RemoteFileConfig::from_slug("octo", "a").is_none());
        assert!(RemoteFileConfig::from_slug("/repo", "a").is_none());
        assert!(RemoteFileConfig::from_slug("a/b/c", "a").is_none());
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let config = RemoteFileConfig::new("o", "r", "p").with_token("ghp_secret");
        assert!(config.is_authenticated());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_empty_token_means_unauthenticated() {
        let config = RemoteFileConfig::new("o", "r", "p").with_token("");
        assert!(!config.is_authenticated());
    }
}
