use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use harvester::sync::CompletionReason;
use harvester::{HarvestProgress, Stream};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Bars and counters, kept under one lock.
#[derive(Default)]
struct ProgressState {
    /// One bar per stream, created when its job starts.
    job_bars: HashMap<Stream, ProgressBar>,
    /// Spinner shown while waiting for a rate-limit reset.
    wait_bar: Option<ProgressBar>,
    /// Items skipped per stream in this run.
    skipped: HashMap<Stream, usize>,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn job_bar(&self, stream: Stream, collected: usize, target: usize) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(target as u64));
        pb.set_style(Self::bar_style());
        pb.set_prefix(format!("{:14}", stream.as_str()));
        pb.set_position(collected.min(target) as u64);
        pb
    }

    fn println(&self, line: String) {
        self.multi.println(line).ok();
    }

    pub fn handle(&self, event: HarvestProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Any event other than a wait means the wait is over.
        if !matches!(event, HarvestProgress::RateLimitWait { .. })
            && let Some(pb) = state.wait_bar.take()
        {
            pb.finish_and_clear();
        }

        match event {
            HarvestProgress::JobStarted {
                stream,
                collected,
                target,
            } => {
                let pb = self.job_bar(stream, collected, target);
                if collected > 0 {
                    pb.set_message(format!("resuming from {collected}"));
                } else {
                    pb.set_message("starting...");
                }
                state.job_bars.insert(stream, pb);
            }

            HarvestProgress::AlreadyAtLimit {
                stream,
                collected,
                target,
            } => {
                let pb = self.job_bar(stream, collected, target);
                pb.finish_with_message(format!("{}", style("already at limit").dim()));
                state.job_bars.insert(stream, pb);
            }

            HarvestProgress::ItemCollected {
                stream,
                key,
                collected,
                ..
            } => {
                if let Some(pb) = state.job_bars.get(&stream) {
                    pb.set_position(collected as u64);
                    pb.set_message(key);
                }
            }

            HarvestProgress::ItemSkipped { stream, .. } => {
                *state.skipped.entry(stream).or_default() += 1;
            }

            HarvestProgress::EntityError { stream, key, error } => {
                self.println(format!(
                    "{} {stream} {key}: {error}",
                    style("warning:").yellow().bold()
                ));
            }

            HarvestProgress::CutoffReached { stream, key } => {
                if let Some(pb) = state.job_bars.get(&stream) {
                    pb.set_message(format!("{key} is past the lookback window"));
                }
            }

            HarvestProgress::RateLimitWait { wait_secs } => {
                let pb = state.wait_bar.take().unwrap_or_else(|| {
                    let bar = self.multi.add(ProgressBar::new_spinner());
                    bar.set_style(Self::spinner_style());
                    bar.set_prefix(format!("{:14}", "rate limit"));
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                pb.set_message(format!("waiting {wait_secs}s for reset..."));
                state.wait_bar = Some(pb);
            }

            HarvestProgress::RateLimitRetry { attempt, .. } => {
                self.println(format!(
                    "{} request rejected, retry #{attempt}",
                    style("rate limited:").yellow().bold()
                ));
            }

            HarvestProgress::BatchWritten { .. } => {}

            HarvestProgress::JobCompleted {
                stream,
                collected,
                total,
                reason,
            } => {
                let skipped = state.skipped.get(&stream).copied().unwrap_or(0);
                if let Some(pb) = state.job_bars.get(&stream) {
                    let detail = match reason {
                        CompletionReason::Stopped => style("stopped").yellow().to_string(),
                        other => other.to_string(),
                    };
                    pb.finish_with_message(format!(
                        "+{collected} ({total} total, {skipped} skipped) {detail}"
                    ));
                }
            }

            HarvestProgress::JobFailed { stream, error } => {
                if let Some(pb) = state.job_bars.get(&stream) {
                    pb.abandon_with_message(format!("{}", style(error).red()));
                }
            }

            HarvestProgress::Warning { message } => {
                self.println(format!("{} {message}", style("warning:").yellow().bold()));
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = state.wait_bar.take() {
            pb.finish_and_clear();
        }
        for pb in state.job_bars.values() {
            if !pb.is_finished() {
                pb.finish();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.yellow} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> InteractiveReporter {
        let reporter = InteractiveReporter::new();
        reporter
            .multi
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        reporter
    }

    #[test]
    fn job_bar_tracks_collected_count() {
        let reporter = reporter();
        reporter.handle(HarvestProgress::JobStarted {
            stream: Stream::Commits,
            collected: 3,
            target: 10,
        });
        reporter.handle(HarvestProgress::ItemCollected {
            stream: Stream::Commits,
            key: "abc".to_string(),
            collected: 4,
            target: 10,
        });

        let state = reporter.state.lock().unwrap();
        let pb = &state.job_bars[&Stream::Commits];
        assert_eq!(pb.position(), 4);
        assert_eq!(pb.length(), Some(10));
    }

    #[test]
    fn wait_spinner_is_cleared_by_next_event() {
        let reporter = reporter();
        reporter.handle(HarvestProgress::RateLimitWait { wait_secs: 30 });
        assert!(reporter.state.lock().unwrap().wait_bar.is_some());

        reporter.handle(HarvestProgress::ItemSkipped {
            stream: Stream::Developers,
            key: None,
            reason: "no login".to_string(),
        });
        let state = reporter.state.lock().unwrap();
        assert!(state.wait_bar.is_none());
        assert_eq!(state.skipped[&Stream::Developers], 1);
    }

    #[test]
    fn completed_job_finishes_its_bar() {
        let reporter = reporter();
        reporter.handle(HarvestProgress::JobStarted {
            stream: Stream::PullRequests,
            collected: 0,
            target: 5,
        });
        reporter.handle(HarvestProgress::JobCompleted {
            stream: Stream::PullRequests,
            collected: 2,
            total: 2,
            reason: CompletionReason::CutoffReached,
        });

        let state = reporter.state.lock().unwrap();
        assert!(state.job_bars[&Stream::PullRequests].is_finished());
    }
}
