use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::github::GitHubError;
use crate::sink::SinkError;

/// Errors surfaced by a harvest job.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Upstream failure. Aborts the current job only.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// Progress can no longer be tracked. Aborts the run.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Output can no longer be written. Aborts the run.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl HarvestError {
    /// Whether the orchestrator must stop instead of moving to the next job.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Checkpoint(_) | Self::Sink(_))
    }
}

/// One-line description suitable for progress output.
pub fn short_error_message(err: &HarvestError) -> String {
    match err {
        HarvestError::GitHub(GitHubError::Http { status, body }) => {
            let message = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| body.trim().to_string());
            if message.is_empty() {
                format!("HTTP {status}")
            } else if message.chars().count() > 50 {
                let truncated: String = message.chars().take(47).collect();
                format!("HTTP {status}: {truncated}...")
            } else {
                format!("HTTP {status}: {message}")
            }
        }
        HarvestError::GitHub(GitHubError::Transport(_)) => "Network error".to_string(),
        HarvestError::GitHub(GitHubError::MalformedResponse { .. }) => {
            "Malformed response".to_string()
        }
        HarvestError::GitHub(GitHubError::InvalidUrl { url, .. }) => format!("Invalid URL: {url}"),
        HarvestError::Checkpoint(_) => "Checkpoint I/O error".to_string(),
        HarvestError::Sink(_) => "Output I/O error".to_string(),
    }
}
