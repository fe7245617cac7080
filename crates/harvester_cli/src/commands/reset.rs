use harvester::{CheckpointStore, Stream};

use crate::TargetArgs;
use crate::commands::shared::resolve_target;
use crate::config::Config;

pub(crate) fn handle_reset(
    stream: Option<Stream>,
    target: &TargetArgs,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = resolve_target(target, config)?;
    let mut store = CheckpointStore::load(&target.checkpoint_path)?;

    store.reset(stream.map(Stream::as_str))?;

    match stream {
        Some(stream) => {
            tracing::info!(stream = %stream, checkpoint = %target.checkpoint_path.display(), "Reset stream");
            println!("Reset {stream} in {}", target.checkpoint_path.display());
        }
        None => {
            tracing::info!(checkpoint = %target.checkpoint_path.display(), "Reset all streams");
            println!("Reset all streams in {}", target.checkpoint_path.display());
        }
    }
    println!("Existing CSV tables were left in place; remove them to avoid duplicate rows.");
    Ok(())
}
