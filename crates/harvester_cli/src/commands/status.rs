use harvester::{CheckpointState, CheckpointStore, Stream};
use tabled::Tabled;

use crate::TargetArgs;
use crate::commands::shared::resolve_target;
use crate::config::Config;

#[derive(Debug, Tabled)]
struct StatusRow {
    #[tabled(rename = "Stream")]
    stream: String,
    #[tabled(rename = "Collected")]
    collected: usize,
    #[tabled(rename = "Last cursor")]
    last_cursor: String,
    #[tabled(rename = "Processed sets")]
    processed: String,
}

fn status_rows(state: &CheckpointState) -> Vec<StatusRow> {
    Stream::ALL
        .iter()
        .map(|stream| {
            let record = state.streams.get(stream.as_str());
            let processed = record
                .map(|r| {
                    r.processed
                        .iter()
                        .map(|(set, keys)| format!("{set}: {}", keys.len()))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            StatusRow {
                stream: stream.to_string(),
                collected: record.map_or(0, |r| r.items_collected),
                last_cursor: record
                    .and_then(|r| r.last_cursor.clone())
                    .unwrap_or_else(|| "-".to_string()),
                processed: if processed.is_empty() {
                    "-".to_string()
                } else {
                    processed
                },
            }
        })
        .collect()
}

pub(crate) fn handle_status(
    target: &TargetArgs,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = resolve_target(target, config)?;
    let store = CheckpointStore::load(&target.checkpoint_path)?;

    println!("Repository: {}", target.repository);
    println!("Checkpoint: {}", target.checkpoint_path.display());
    match store.state().last_run_at {
        Some(at) => println!("Last saved: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last saved: never"),
    }

    let mut table = tabled::Table::new(status_rows(store.state()));
    table.with(tabled::settings::Style::rounded());
    println!("{table}");
    Ok(())
}
