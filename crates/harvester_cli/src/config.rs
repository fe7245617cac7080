//! Configuration file support for harvester.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `HARVESTER__`, e.g.
//!    `HARVESTER__HARVEST__MAX_COMMITS`), plus `GITHUB_TOKEN`
//! 3. Config file (~/.config/harvester/config.toml or ./harvester.toml)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [github]
//! token = "ghp_..."  # or use GITHUB_TOKEN
//! api_url = "https://api.github.com"
//!
//! [harvest]
//! repository = "rust-lang/cargo"
//! output_dir = "./data"
//! lookback_days = 90
//! max_commits = 1000
//! max_pull_requests = 500
//! max_developers = 200
//! max_following = 100
//! per_page = 100
//! rate_limit_margin_secs = 1
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use harvester::RepoSlug;
use harvester::sync::{
    DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_COMMITS, DEFAULT_MAX_DEVELOPERS, DEFAULT_MAX_FOLLOWING,
    DEFAULT_MAX_PULL_REQUESTS, DEFAULT_PER_PAGE,
};
use serde::Deserialize;

/// File name of the checkpoint inside the output directory.
pub const DEFAULT_CHECKPOINT_FILE: &str = "checkpoint.json";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GitHub configuration.
    pub github: GitHubConfig,
    /// Default harvest options.
    pub harvest: HarvestConfig,
}

/// GitHub configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token.
    /// Falls back to the GITHUB_TOKEN environment variable.
    pub token: Option<String>,
    /// API root, for GitHub Enterprise.
    pub api_url: Option<String>,
}

/// Default harvest options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Repository as `owner/name`.
    pub repository: Option<String>,
    /// Directory receiving the CSV tables.
    pub output_dir: Option<PathBuf>,
    /// Checkpoint path; relative paths resolve against the output directory.
    pub checkpoint_file: Option<PathBuf>,
    pub lookback_days: i64,
    pub max_commits: usize,
    pub max_pull_requests: usize,
    pub max_developers: usize,
    pub max_following: usize,
    pub per_page: u32,
    /// Seconds added to the server-reported reset time before resuming.
    pub rate_limit_margin_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            repository: None,
            output_dir: None,
            checkpoint_file: None,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            max_commits: DEFAULT_MAX_COMMITS,
            max_pull_requests: DEFAULT_MAX_PULL_REQUESTS,
            max_developers: DEFAULT_MAX_DEVELOPERS,
            max_following: DEFAULT_MAX_FOLLOWING,
            per_page: DEFAULT_PER_PAGE,
            rate_limit_margin_secs: 1,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/harvester/config.toml)
    /// 3. Local config file (./harvester.toml)
    /// 4. Environment variables with HARVESTER__ prefix
    /// 5. GITHUB_TOKEN, when no token was configured
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", "harvester") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from("harvester.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./harvester.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Field names contain underscores, so sections are split on "__":
        // HARVESTER__HARVEST__MAX_COMMITS -> harvest.max_commits
        builder = builder.add_source(
            Environment::with_prefix("HARVESTER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config = match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        };

        if config.github.token.is_none() {
            config.github.token = std::env::var("GITHUB_TOKEN").ok();
        }
        config
    }

    /// Get the GitHub token, ignoring blank values.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
    }

    /// Output directory for a repository: configured value, else
    /// `<data dir>/<owner>_<name>`, else `./<owner>_<name>`.
    pub fn output_dir(&self, repository: &RepoSlug) -> PathBuf {
        if let Some(dir) = &self.harvest.output_dir {
            return dir.clone();
        }
        let leaf = format!("{}_{}", repository.owner, repository.name);
        match Self::default_data_dir() {
            Some(data_dir) => data_dir.join(leaf),
            None => PathBuf::from(leaf),
        }
    }

    /// Checkpoint path; relative paths resolve against `output_dir`.
    pub fn checkpoint_path(&self, output_dir: &std::path::Path) -> PathBuf {
        match &self.harvest.checkpoint_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => output_dir.join(path),
            None => output_dir.join(DEFAULT_CHECKPOINT_FILE),
        }
    }

    /// Get the default data directory path.
    pub fn default_data_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "harvester").map(|dirs| dirs.data_dir().to_path_buf())
    }
}
