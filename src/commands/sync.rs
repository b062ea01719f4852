//! Sync command handler: resumable metadata harvest.

use anyhow::Result;
use papercache_core::{HarvestError, HarvestOptions, PaperCache};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::SyncArgs;

pub async fn run_sync_command(
    cache: &PaperCache,
    args: &SyncArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let options = HarvestOptions {
        set: args.set.clone(),
        from: args.from,
        until: args.until,
        ..cache.harvest_options()
    };

    match cache.harvester().run(&options, cancel).await {
        Ok(report) => {
            let mode = if report.resumed { "resumed" } else { "fresh" };
            println!(
                "Harvest complete ({mode}): {} records over {} pages",
                report.records, report.pages
            );
            Ok(())
        }
        Err(HarvestError::Cancelled) => {
            warn!("harvest interrupted; rerun `sync` to resume");
            Err(HarvestError::Cancelled.into())
        }
        Err(e) => {
            warn!("progress saved; rerun `sync` to resume");
            Err(e.into())
        }
    }
}
