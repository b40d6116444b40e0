use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use filekeep_core::{BackupOptions, RemoteFileConfig};
use filekeep_local::CrashRecovery;

/// Configuration for the filekeep daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "filekeep")]
#[command(about = "Keeps JSON files auto-saved, backed up, crash-safe and synced from GitHub")]
pub struct Config {
    /// Directory for the crash flag (defaults to the platform data directory)
    #[arg(long, env = "FILEKEEP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON file to manage (repeatable)
    #[arg(long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Auto-save tick interval (milliseconds)
    #[arg(long, default_value = "500", env = "FILEKEEP_AUTO_SAVE_INTERVAL_MS")]
    pub auto_save_interval_ms: u64,

    /// Backup interval (seconds, 0 disables scheduled backups)
    #[arg(long, default_value = "300", env = "FILEKEEP_BACKUP_INTERVAL_SECS")]
    pub backup_interval_secs: u64,

    /// Backup directory (defaults to `.backup` next to each file)
    #[arg(long, env = "FILEKEEP_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Backups kept per file (0 keeps all)
    #[arg(long, default_value = "10", env = "FILEKEEP_BACKUP_MAX_COUNT")]
    pub backup_max_count: usize,

    /// Delete backups older than this many days (0 keeps all)
    #[arg(long, default_value = "30", env = "FILEKEEP_BACKUP_RETENTION_DAYS")]
    pub backup_retention_days: u64,

    /// GitHub repository to pull files from, as owner/repo
    #[arg(long, env = "FILEKEEP_REMOTE_REPO", value_parser = parse_repo_slug)]
    pub remote_repo: Option<String>,

    /// Branch to pull from
    #[arg(long, default_value = "main", env = "FILEKEEP_REMOTE_BRANCH")]
    pub remote_branch: String,

    /// Directory inside the repository holding the files (default: repository root)
    #[arg(long, default_value = "", env = "FILEKEEP_REMOTE_PATH")]
    pub remote_path: String,

    /// GitHub token; switches to the rate-limited contents API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Remote polling interval (seconds)
    #[arg(long, default_value = "300", env = "FILEKEEP_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: u64,

    /// Minimum time between two remote checks of the same file (seconds)
    #[arg(long, default_value = "60", env = "FILEKEEP_METADATA_CACHE_SECS")]
    pub metadata_cache_secs: u64,
}

fn parse_repo_slug(value: &str) -> Result<String, String> {
    match value.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(value.to_string())
        }
        _ => Err(format!("expected owner/repo, got '{}'", value)),
    }
}

impl Config {
    /// Explicit `--data-dir`, else the platform data directory, else
    /// `.filekeep` in the working directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(CrashRecovery::default_data_dir)
            .unwrap_or_else(|| PathBuf::from(".filekeep"))
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }

    /// `None` when scheduled backups are disabled.
    pub fn backup_interval(&self) -> Option<Duration> {
        (self.backup_interval_secs > 0).then(|| Duration::from_secs(self.backup_interval_secs))
    }

    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            directory: self.backup_dir.clone(),
            max_count: self.backup_max_count,
            retention_period: (self.backup_retention_days > 0)
                .then(|| Duration::from_secs(self.backup_retention_days * 24 * 60 * 60)),
            ..Default::default()
        }
    }

    /// Remote source for `file`: `<remote-path>/<file name>` in the configured
    /// repository.
    pub fn remote_config_for(&self, file: &Path) -> Option<RemoteFileConfig> {
        let slug = self.remote_repo.as_deref()?;
        let name = file.file_name()?.to_string_lossy();
        let prefix = self.remote_path.trim_matches('/');
        let remote_path = if prefix.is_empty() {
            name.into_owned()
        } else {
            format!("{}/{}", prefix, name)
        };

        let mut config =
            RemoteFileConfig::from_slug(slug, remote_path)?.with_branch(self.remote_branch.clone());
        if let Some(token) = &self.github_token {
            config = config.with_token(token.clone());
        }
        config.polling_interval = Duration::from_secs(self.poll_interval_secs);
        config.metadata_cache_duration = Duration::from_secs(self.metadata_cache_secs);
        Some(config)
    }
}
