//! Resumable, checkpointed collection.
//!
//! # Module Structure
//!
//! - [`types`] - Streams, options, constants and run summaries
//! - [`progress`] - Progress reporting: `HarvestProgress`, `ProgressCallback`, `emit()`
//! - [`jobs`] - Per-stream jobs: commits, pull requests, developers
//! - [`engine`] - The resumable control loop and the [`Harvester`] orchestrator
//!
//! # Example
//!
//! ```ignore
//! use harvester::checkpoint::CheckpointStore;
//! use harvester::github::{GitHubClient, RepoSlug};
//! use harvester::sink::CsvSink;
//! use harvester::sync::{HarvestOptions, Harvester, Stream};
//!
//! let repo: RepoSlug = "rust-lang/rust".parse()?;
//! let checkpoint = CheckpointStore::load("out/checkpoint.json")?;
//! let mut harvester = Harvester::new(
//!     GitHubClient::new(Some(token)),
//!     HarvestOptions::new(repo),
//!     checkpoint,
//!     CsvSink::new("out"),
//! );
//! let summary = harvester.run(&Stream::ALL).await?;
//! println!("collected {} items", summary.collected());
//! ```

pub mod engine;
pub mod jobs;
mod progress;
mod types;

pub use types::{CompletionReason, HarvestOptions, JobOutcome, JobSummary, RunSummary, Stream};

pub use types::{
    DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_COMMITS, DEFAULT_MAX_DEVELOPERS, DEFAULT_MAX_FOLLOWING,
    DEFAULT_MAX_PULL_REQUESTS, DEFAULT_PER_PAGE,
};

pub use progress::{HarvestProgress, ProgressCallback, emit};

pub use engine::Harvester;
