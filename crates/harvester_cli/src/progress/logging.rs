use harvester::HarvestProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: HarvestProgress) {
        match event {
            HarvestProgress::JobStarted {
                stream,
                collected,
                target,
            } => {
                tracing::info!(stream = %stream, collected, target, "Starting job");
            }

            HarvestProgress::AlreadyAtLimit {
                stream,
                collected,
                target,
            } => {
                tracing::info!(stream = %stream, collected, target, "Already at limit, skipping job");
            }

            HarvestProgress::ItemCollected {
                stream,
                key,
                collected,
                target,
            } => {
                tracing::debug!(stream = %stream, key = %key, collected, target, "Collected");
            }

            HarvestProgress::ItemSkipped {
                stream,
                key,
                reason,
            } => {
                tracing::debug!(stream = %stream, key = ?key, reason = %reason, "Skipped");
            }

            HarvestProgress::EntityError { stream, key, error } => {
                tracing::warn!(stream = %stream, key = %key, error = %error, "Entity failed");
            }

            HarvestProgress::CutoffReached { stream, key } => {
                tracing::info!(stream = %stream, key = %key, "Reached lookback cutoff");
            }

            HarvestProgress::RateLimitWait { wait_secs } => {
                tracing::warn!(wait_secs, "Rate limit exhausted, waiting for reset");
            }

            HarvestProgress::RateLimitRetry { url, attempt } => {
                tracing::warn!(url = %url, attempt, "Rate limited, retrying");
            }

            HarvestProgress::BatchWritten { table, count } => {
                tracing::info!(table = %table, count, "Wrote batch");
            }

            HarvestProgress::JobCompleted {
                stream,
                collected,
                total,
                reason,
            } => {
                tracing::info!(stream = %stream, collected, total, reason = %reason, "Job complete");
            }

            HarvestProgress::JobFailed { stream, error } => {
                tracing::error!(stream = %stream, error = %error, "Job failed");
            }

            HarvestProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
