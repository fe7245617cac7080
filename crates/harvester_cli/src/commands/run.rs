use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Duration;
use harvester::sync::{JobOutcome, JobSummary};
use harvester::{CheckpointStore, CsvSink, HarvestOptions, Harvester, RunSummary, Stream};
use tabled::Tabled;

use crate::RunArgs;
use crate::commands::shared::{github_client, resolve_target};
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Build harvest options from config, with flags taking precedence.
pub(crate) fn harvest_options(
    args: &RunArgs,
    config: &Config,
    repository: harvester::RepoSlug,
) -> HarvestOptions {
    let defaults = &config.harvest;
    let mut options = HarvestOptions::new(repository);
    options.lookback = Duration::days(args.lookback_days.unwrap_or(defaults.lookback_days));
    options.max_commits = args.max_commits.unwrap_or(defaults.max_commits);
    options.max_pull_requests = args
        .max_pull_requests
        .unwrap_or(defaults.max_pull_requests);
    options.max_developers = args.max_developers.unwrap_or(defaults.max_developers);
    options.max_following = args.max_following.unwrap_or(defaults.max_following);
    options.per_page = defaults.per_page;
    options
}

/// Streams in run order, without duplicates. Empty means all of them.
pub(crate) fn selected_streams(requested: &[Stream]) -> Vec<Stream> {
    Stream::ALL
        .into_iter()
        .filter(|s| requested.is_empty() || requested.contains(s))
        .collect()
}

pub(crate) async fn handle_run(
    args: RunArgs,
    config: &Config,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = resolve_target(&args.target, config)?;
    let options = harvest_options(&args, config, target.repository.clone());
    let streams = selected_streams(&args.streams);

    tracing::info!(
        repository = %target.repository,
        output_dir = %target.output_dir.display(),
        checkpoint = %target.checkpoint_path.display(),
        "Starting harvest"
    );

    let reporter = Arc::new(ProgressReporter::new());
    let on_progress = reporter.as_callback();

    let checkpoint = CheckpointStore::load(&target.checkpoint_path)?;
    let client = github_client(config).with_progress(Arc::clone(&on_progress));
    let mut harvester = Harvester::new(
        client,
        options,
        checkpoint,
        CsvSink::new(&target.output_dir),
    )
    .with_progress(on_progress)
    .with_shutdown_flag(shutdown_flag);

    let result = harvester.run(&streams).await;
    reporter.finish();

    let summary = result?;
    print_summary(&summary);
    println!("Output: {}", target.output_dir.display());

    if summary.failed() > 0 {
        return Err(format!("{} of {} jobs failed", summary.failed(), summary.jobs.len()).into());
    }
    Ok(())
}

/// One row of the end-of-run table.
#[derive(Debug, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Stream")]
    stream: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "This run")]
    collected: usize,
    #[tabled(rename = "Total")]
    total: usize,
}

impl From<&JobSummary> for SummaryRow {
    fn from(job: &JobSummary) -> Self {
        let outcome = match &job.outcome {
            JobOutcome::Completed(reason) => reason.to_string(),
            JobOutcome::Failed(error) => format!("failed: {error}"),
        };
        Self {
            stream: job.stream.to_string(),
            outcome,
            collected: job.collected,
            total: job.total,
        }
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.jobs.is_empty() {
        println!("No jobs ran.");
        return;
    }
    let rows: Vec<SummaryRow> = summary.jobs.iter().map(SummaryRow::from).collect();
    let mut table = tabled::Table::new(rows);
    table.with(tabled::settings::Style::rounded());
    println!("{table}");
    println!(
        "Collected {} items across {} jobs",
        summary.collected(),
        summary.jobs.len()
    );
}
