//! Shared harvest types and constants.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::github::RepoSlug;

/// Items requested per page (GitHub's maximum).
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default lookback window for commits and pull requests.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;

/// Default per-stream item caps.
pub const DEFAULT_MAX_COMMITS: usize = 1_000;
pub const DEFAULT_MAX_PULL_REQUESTS: usize = 500;
pub const DEFAULT_MAX_DEVELOPERS: usize = 200;
pub const DEFAULT_MAX_FOLLOWING: usize = 100;

/// A collection stream. Each stream owns one checkpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    Commits,
    PullRequests,
    Developers,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Commits, Stream::PullRequests, Stream::Developers];

    /// Key used in the checkpoint file.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Commits => "commits",
            Stream::PullRequests => "pull_requests",
            Stream::Developers => "developers",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "commits" => Ok(Stream::Commits),
            "pull_requests" | "pulls" | "prs" => Ok(Stream::PullRequests),
            "developers" | "devs" => Ok(Stream::Developers),
            other => Err(format!("unknown stream '{other}'")),
        }
    }
}

/// Options for a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Repository to harvest.
    pub repository: RepoSlug,
    /// Only commits and pull requests newer than this are collected.
    pub lookback: Duration,
    /// Item cap for the commits stream.
    pub max_commits: usize,
    /// Item cap for the pull-request stream.
    pub max_pull_requests: usize,
    /// Item cap for the developer stream.
    pub max_developers: usize,
    /// Follow relationships fetched per developer.
    pub max_following: usize,
    /// Page size for list endpoints.
    pub per_page: u32,
}

impl HarvestOptions {
    pub fn new(repository: RepoSlug) -> Self {
        Self {
            repository,
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            max_commits: DEFAULT_MAX_COMMITS,
            max_pull_requests: DEFAULT_MAX_PULL_REQUESTS,
            max_developers: DEFAULT_MAX_DEVELOPERS,
            max_following: DEFAULT_MAX_FOLLOWING,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Item cap for a stream.
    #[must_use]
    pub fn target(&self, stream: Stream) -> usize {
        match stream {
            Stream::Commits => self.max_commits,
            Stream::PullRequests => self.max_pull_requests,
            Stream::Developers => self.max_developers,
        }
    }

    /// Start of the lookback window relative to `now`.
    #[must_use]
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }
}

/// Why a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The checkpoint already held the target before the job started.
    AlreadyAtLimit,
    /// The target was reached during this run.
    TargetReached,
    /// The upstream had nothing more to give.
    Exhausted,
    /// An item older than the lookback cutoff was reached.
    CutoffReached,
    /// A shutdown was requested between items.
    Stopped,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletionReason::AlreadyAtLimit => "already at limit",
            CompletionReason::TargetReached => "target reached",
            CompletionReason::Exhausted => "upstream exhausted",
            CompletionReason::CutoffReached => "cutoff reached",
            CompletionReason::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Outcome of a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(CompletionReason),
    Failed(String),
}

/// Result of running one job.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub stream: Stream,
    /// Items collected during this run.
    pub collected: usize,
    /// Running total including earlier runs.
    pub total: usize,
    pub outcome: JobOutcome,
}

impl JobSummary {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    /// Number of jobs that aborted.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_failed()).count()
    }

    /// Items collected across all jobs during this run.
    #[must_use]
    pub fn collected(&self) -> usize {
        self.jobs.iter().map(|j| j.collected).sum()
    }
}
