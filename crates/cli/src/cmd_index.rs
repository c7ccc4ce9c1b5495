use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::args::{GlobalArgs, IndexArgs};

/// The index database's well-known path within a repository's internal directory (§6),
/// overridable via `--index-path` for testing and for the `debug` subcommand.
fn default_index_path(repo: &Path) -> PathBuf {
    repo.join(".spatialidx").join("feature_envelopes.db")
}

pub fn run(global_args: &GlobalArgs, args: &IndexArgs) -> Result<()> {
    let objdb = spatialidx_objectdb::open(&args.repo)?;

    let index_path = args
        .index_path
        .clone()
        .unwrap_or_else(|| default_index_path(&args.repo));
    if let Some(parent) = index_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut store = spatialidx_store::Store::open(&index_path, global_args.advanced.sqlite_cache_size)
        .with_context(|| format!("Failed to open index database at {}", index_path.display()))?;

    let mut progress = progress::Progress::new_countup_spinner("features indexed", global_args.use_progress());

    let outcome = spatialidx_core::run(
        &objdb,
        &mut store,
        &args.commitishes,
        args.clear_existing,
        args.dry_run,
        &mut progress,
    )?;

    progress.finish();

    match outcome {
        spatialidx_core::RunOutcome::UpToDate => {
            info!("index is already up to date");
        }
        spatialidx_core::RunOutcome::DryRun { effective_start, stop } => {
            let start_hex: Vec<String> = effective_start.iter().map(|o| o.hex()).collect();
            let stop_hex: Vec<String> = stop.iter().map(|o| o.hex()).collect();
            println!("Would index from {start_hex:?} up to {stop_hex:?}");
        }
        spatialidx_core::RunOutcome::Completed { features_indexed, elapsed } => {
            println!("Indexed {features_indexed} features in {:.1}s", elapsed.as_secs_f64());
        }
    }

    Ok(())
}
