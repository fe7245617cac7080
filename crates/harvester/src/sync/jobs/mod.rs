//! Per-stream collection jobs.
//!
//! Each job describes one upstream listing: where it starts, how items are
//! identified and filtered, and how an item becomes output records. The
//! resumable control loop that drives a job lives in
//! [`engine`](super::engine).

mod commits;
mod developers;
mod pull_requests;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub use commits::CommitsJob;
pub use developers::DevelopersJob;
pub use pull_requests::PullRequestsJob;

use super::progress::ProgressCallback;
use super::types::{HarvestOptions, Stream};
use crate::checkpoint::CheckpointStore;
use crate::error::HarvestError;
use crate::github::{GitHubClient, PageRequest};
use crate::sink::{FieldValue, OutputRecord, Table};

/// Records accumulated by a job until it exits.
#[derive(Debug, Default)]
pub struct Batch {
    tables: BTreeMap<Table, Vec<OutputRecord>>,
}

impl Batch {
    pub fn push(&mut self, table: Table, record: OutputRecord) {
        self.tables.entry(table).or_default().push(record);
    }

    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    /// Remove and return everything queued for `table`.
    pub fn take(&mut self, table: Table) -> Vec<OutputRecord> {
        self.tables.remove(&table).unwrap_or_default()
    }
}

/// Everything a job may touch while running.
pub struct JobContext<'a> {
    pub client: &'a GitHubClient,
    pub options: &'a HarvestOptions,
    pub checkpoint: &'a mut CheckpointStore,
    pub batch: &'a mut Batch,
    pub on_progress: Option<&'a ProgressCallback>,
    /// Start of the lookback window.
    pub since: DateTime<Utc>,
}

impl JobContext<'_> {
    /// Cursor committed for `stream` by earlier items or runs.
    #[must_use]
    pub fn last_cursor(&self, stream: Stream) -> Option<&str> {
        self.checkpoint.last_cursor(stream.as_str())
    }
}

/// What became of one item handed to [`CollectionJob::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Records were queued; the engine commits the item to the checkpoint.
    Collected,
    /// Nothing was committed; the item does not count toward the target.
    Skipped(String),
}

/// One resumable collection stream.
#[async_trait]
pub trait CollectionJob: Send + Sync {
    fn stream(&self) -> Stream;

    /// Tables this job writes, in flush order.
    fn tables(&self) -> &'static [Table];

    /// First list page, with any resume position injected.
    fn initial_request(&self, cx: &JobContext<'_>) -> PageRequest;

    /// Stable identifier for a list item, or `None` to filter it out.
    fn item_key(&self, item: &Value) -> Option<String>;

    /// Whether an earlier run already committed this item.
    fn is_collected(&self, key: &str, cx: &JobContext<'_>) -> bool {
        cx.last_cursor(self.stream()) == Some(key)
    }

    /// Processed set that records committed keys, written together with
    /// the item counter when an item is collected.
    fn committed_set(&self) -> Option<&'static str> {
        None
    }

    /// Whether the item lies before the lookback window. The first such
    /// item ends the job.
    fn is_past_cutoff(&self, _item: &Value, _since: DateTime<Utc>) -> bool {
        false
    }

    /// Turn an item into records and queue them on `cx.batch`.
    ///
    /// Upstream errors returned from here abort the job. The engine, not the
    /// job, advances the item counter, the cursor and
    /// [`committed_set`](Self::committed_set).
    async fn process(
        &self,
        cx: &mut JobContext<'_>,
        key: &str,
        item: &Value,
    ) -> Result<ItemOutcome, HarvestError>;
}

/// The job collecting `stream`.
pub fn for_stream(stream: Stream) -> Box<dyn CollectionJob> {
    match stream {
        Stream::Commits => Box::new(CommitsJob),
        Stream::PullRequests => Box::new(PullRequestsJob),
        Stream::Developers => Box::new(DevelopersJob),
    }
}

fn str_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn field_at(value: &Value, pointer: &str) -> FieldValue {
    value
        .pointer(pointer)
        .map_or(FieldValue::Null, FieldValue::from_json)
}

fn time_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    str_at(value, pointer)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Timestamp format for `since` query parameters.
fn iso8601(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
