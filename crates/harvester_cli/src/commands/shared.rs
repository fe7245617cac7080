use std::path::PathBuf;
use std::time::Duration;

use harvester::{GitHubClient, RateLimiter, RepoSlug};

use crate::TargetArgs;
use crate::config::Config;

/// Repository and file locations for a command, after applying flags over config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedTarget {
    pub(crate) repository: RepoSlug,
    pub(crate) output_dir: PathBuf,
    pub(crate) checkpoint_path: PathBuf,
}

/// Resolve the repository and paths, flags first, then config.
pub(crate) fn resolve_target(
    target: &TargetArgs,
    config: &Config,
) -> Result<ResolvedTarget, Box<dyn std::error::Error>> {
    let repository = match &target.repo {
        Some(repo) => repo.clone(),
        None => config
            .harvest
            .repository
            .as_deref()
            .ok_or(
                "No repository given. Pass --repo owner/name or set repository in the [harvest] config section.",
            )?
            .parse()?,
    };

    let output_dir = target
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output_dir(&repository));
    let checkpoint_path = target
        .checkpoint
        .clone()
        .unwrap_or_else(|| config.checkpoint_path(&output_dir));

    Ok(ResolvedTarget {
        repository,
        output_dir,
        checkpoint_path,
    })
}

/// Build a GitHub client from config.
///
/// Runs unauthenticated (60 requests/hour) when no token is configured.
pub(crate) fn github_client(config: &Config) -> GitHubClient {
    let token = config.github_token();
    if token.is_none() {
        tracing::warn!("No GitHub token configured, using the unauthenticated rate limit");
    }

    let margin = Duration::from_secs(config.harvest.rate_limit_margin_secs);
    let client =
        GitHubClient::new(token).with_rate_limiter(RateLimiter::with_margin(margin));
    match &config.github.api_url {
        Some(api_url) => client.with_api_url(api_url.as_str()),
        None => client,
    }
}
