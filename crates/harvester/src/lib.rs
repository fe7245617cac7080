//! Harvester - a rate-limit aware, resumable GitHub repository harvester.
//!
//! Pulls commits (with per-file changes), pull requests with their requested
//! reviewers, and contributor profiles with follow relationships from one
//! repository, and appends them to flat CSV tables. Progress is checkpointed
//! after every item so an interrupted run picks up where it stopped.
//!
//! # Modules
//!
//! - [`http`] - Transport boundary (`HttpTransport`) and the reqwest implementation
//! - [`rate_limit`] - Header-driven throttle
//! - [`github`] - Client, link-following pagination, rate-limit rejection retries
//! - [`checkpoint`] - Durable per-stream progress
//! - [`sink`] - Append-only tabular output
//! - [`sync`] - Jobs and the resumable engine

pub mod checkpoint;
pub mod error;
pub mod github;
pub mod http;
pub mod rate_limit;
pub mod sink;
pub mod sync;

pub use checkpoint::{CheckpointError, CheckpointRecord, CheckpointState, CheckpointStore};
pub use error::{HarvestError, short_error_message};
pub use github::{GitHubClient, GitHubError, RepoSlug};
pub use rate_limit::{RateLimitState, RateLimiter};
pub use sink::{CsvSink, FieldValue, OutputRecord, RecordSink, SinkError, Table};
pub use sync::{HarvestOptions, HarvestProgress, Harvester, ProgressCallback, RunSummary, Stream};
