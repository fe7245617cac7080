//! Resumable collection engine.
//!
//! [`Harvester`] owns the client, the checkpoint and the sink, and runs one
//! [`CollectionJob`] per requested stream, strictly one after another. Each
//! job goes through the same loop:
//!
//! 1. If the checkpoint already holds the stream's target, finish at once.
//! 2. Page through the job's listing, lazily.
//! 3. For each item: filter, stop at the lookback cutoff, skip items an
//!    earlier run committed, process, then commit to the checkpoint.
//! 4. Flush every table the job queued, once, even when the job aborted.
//!
//! Upstream errors abort the current job and the run moves on. Checkpoint and
//! sink errors abort the whole run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use super::jobs::{Batch, CollectionJob, ItemOutcome, JobContext, for_stream};
use super::progress::{HarvestProgress, ProgressCallback, emit};
use super::types::{CompletionReason, HarvestOptions, JobOutcome, JobSummary, RunSummary, Stream};
use crate::checkpoint::CheckpointStore;
use crate::error::{HarvestError, short_error_message};
use crate::github::GitHubClient;
use crate::sink::RecordSink;

/// Runs collection jobs against one repository.
pub struct Harvester<S> {
    client: GitHubClient,
    options: HarvestOptions,
    checkpoint: CheckpointStore,
    sink: S,
    on_progress: Option<Arc<ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<S: RecordSink> Harvester<S> {
    pub fn new(
        client: GitHubClient,
        options: HarvestOptions,
        checkpoint: CheckpointStore,
        sink: S,
    ) -> Self {
        Self {
            client,
            options,
            checkpoint,
            sink,
            on_progress: None,
            shutdown_flag: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Stop between items once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (CheckpointStore, S) {
        (self.checkpoint, self.sink)
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Run `streams` in order, with the lookback window ending now.
    pub async fn run(&mut self, streams: &[Stream]) -> Result<RunSummary, HarvestError> {
        self.run_at(streams, Utc::now()).await
    }

    /// Run `streams` in order, with the lookback window ending at `now`.
    ///
    /// Returns `Err` only for errors that make further progress unsafe.
    pub async fn run_at(
        &mut self,
        streams: &[Stream],
        now: DateTime<Utc>,
    ) -> Result<RunSummary, HarvestError> {
        let since = self.options.since(now);
        let mut summary = RunSummary::default();

        for &stream in streams {
            if self.is_shutdown_requested() {
                tracing::info!(stream = %stream, "Shutdown requested, not starting job");
                break;
            }

            let job = for_stream(stream);
            let before = self.checkpoint.items_collected(stream.as_str());
            let result = self.run_job(job.as_ref(), since).await;
            let total = self.checkpoint.items_collected(stream.as_str());
            let collected = total.saturating_sub(before);

            let outcome = match result {
                Ok(reason) => {
                    tracing::info!(
                        stream = %stream,
                        collected,
                        total,
                        reason = %reason,
                        "Job completed"
                    );
                    if reason != CompletionReason::AlreadyAtLimit {
                        emit(
                            self.progress(),
                            HarvestProgress::JobCompleted {
                                stream,
                                collected,
                                total,
                                reason,
                            },
                        );
                    }
                    JobOutcome::Completed(reason)
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(stream = %stream, error = %e, "Run aborted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(stream = %stream, collected, error = %e, "Job failed");
                    let message = short_error_message(&e);
                    emit(
                        self.progress(),
                        HarvestProgress::JobFailed {
                            stream,
                            error: message.clone(),
                        },
                    );
                    JobOutcome::Failed(message)
                }
            };

            let stopped = outcome == JobOutcome::Completed(CompletionReason::Stopped);
            summary.jobs.push(JobSummary {
                stream,
                collected,
                total,
                outcome,
            });
            if stopped {
                break;
            }
        }

        Ok(summary)
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_deref()
    }

    async fn run_job(
        &mut self,
        job: &dyn CollectionJob,
        since: DateTime<Utc>,
    ) -> Result<CompletionReason, HarvestError> {
        let stream = job.stream();
        let target = self.options.target(stream);
        let collected = self.checkpoint.items_collected(stream.as_str());
        let on_progress = self.on_progress.as_deref();

        if collected >= target {
            tracing::info!(stream = %stream, collected, target, "Already at limit");
            emit(
                on_progress,
                HarvestProgress::AlreadyAtLimit {
                    stream,
                    collected,
                    target,
                },
            );
            return Ok(CompletionReason::AlreadyAtLimit);
        }

        tracing::info!(stream = %stream, collected, target, "Starting job");
        emit(
            on_progress,
            HarvestProgress::JobStarted {
                stream,
                collected,
                target,
            },
        );

        let mut batch = Batch::default();
        let mut cx = JobContext {
            client: &self.client,
            options: &self.options,
            checkpoint: &mut self.checkpoint,
            batch: &mut batch,
            on_progress,
            since,
        };
        let shutdown_flag = self.shutdown_flag.as_deref();

        let result = collect(job, &mut cx, target, shutdown_flag).await;
        let flushed = flush(job, &mut batch, &mut self.sink, on_progress);

        match (result, flushed) {
            (result, Ok(())) => result,
            (Ok(_), Err(e)) => Err(e),
            (Err(job_error), Err(e)) => {
                tracing::error!(stream = %stream, error = %job_error, "Job failed before flush");
                Err(e)
            }
        }
    }
}

/// Drive one job until its target, the end of the listing, the cutoff or a
/// shutdown request.
async fn collect(
    job: &dyn CollectionJob,
    cx: &mut JobContext<'_>,
    target: usize,
    shutdown_flag: Option<&AtomicBool>,
) -> Result<CompletionReason, HarvestError> {
    let stream = job.stream();
    let client = cx.client;
    let mut collected = cx.checkpoint.items_collected(stream.as_str());
    let mut pages = client.paginate(job.initial_request(cx), None);

    loop {
        if shutdown_flag.is_some_and(|f| f.load(Ordering::Relaxed)) {
            tracing::info!(stream = %stream, collected, "Stopping job on shutdown request");
            return Ok(CompletionReason::Stopped);
        }
        if collected >= target {
            return Ok(CompletionReason::TargetReached);
        }
        let Some(item) = pages.next_item().await? else {
            return Ok(CompletionReason::Exhausted);
        };

        let Some(key) = job.item_key(&item) else {
            tracing::debug!(stream = %stream, "Skipping item without required fields");
            emit(
                cx.on_progress,
                HarvestProgress::ItemSkipped {
                    stream,
                    key: None,
                    reason: "missing required fields".to_string(),
                },
            );
            continue;
        };

        if job.is_past_cutoff(&item, cx.since) {
            tracing::info!(stream = %stream, key = %key, since = %cx.since, "Reached lookback cutoff");
            emit(
                cx.on_progress,
                HarvestProgress::CutoffReached { stream, key },
            );
            return Ok(CompletionReason::CutoffReached);
        }

        if job.is_collected(&key, cx) {
            tracing::debug!(stream = %stream, key = %key, "Already collected");
            emit(
                cx.on_progress,
                HarvestProgress::ItemSkipped {
                    stream,
                    key: Some(key),
                    reason: "already collected".to_string(),
                },
            );
            continue;
        }

        match job.process(cx, &key, &item).await? {
            ItemOutcome::Collected => {
                collected =
                    cx.checkpoint
                        .advance_with(stream.as_str(), key.as_str(), job.committed_set())?;
                tracing::debug!(stream = %stream, key = %key, collected, target, "Collected item");
                emit(
                    cx.on_progress,
                    HarvestProgress::ItemCollected {
                        stream,
                        key,
                        collected,
                        target,
                    },
                );
            }
            ItemOutcome::Skipped(reason) => {
                emit(
                    cx.on_progress,
                    HarvestProgress::ItemSkipped {
                        stream,
                        key: Some(key),
                        reason,
                    },
                );
            }
        }
    }
}

/// Write each of the job's tables once. Empty tables are not touched.
fn flush<S: RecordSink + ?Sized>(
    job: &dyn CollectionJob,
    batch: &mut Batch,
    sink: &mut S,
    on_progress: Option<&ProgressCallback>,
) -> Result<(), HarvestError> {
    for &table in job.tables() {
        let records = batch.take(table);
        if records.is_empty() {
            continue;
        }
        let count = sink.append(table, &records)?;
        tracing::info!(table = %table, count, "Wrote batch");
        emit(on_progress, HarvestProgress::BatchWritten { table, count });
    }
    Ok(())
}
