//! CLI command handlers.

mod artifacts;
mod citations;
mod maintenance;
mod search;
mod sync;

use anyhow::Result;
use papercache_core::PaperCache;
use tokio_util::sync::CancellationToken;

use crate::cli::Command;

pub use artifacts::{
    run_category_command, run_download_command, run_fetch_command, run_queue_command,
};
pub use citations::{run_cited_by_command, run_graph_command, run_refs_command};
pub use maintenance::{run_rebuild_citations_command, run_rebuild_index_command, run_stats_command};
pub use search::{run_search_command, run_search_text_command};
pub use sync::run_sync_command;

/// Runs one parsed command against an open cache.
pub async fn dispatch(
    command: &Command,
    cache: &PaperCache,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Sync(args) => run_sync_command(cache, args, cancel).await,
        Command::Fetch(args) => run_fetch_command(cache, args, cancel).await,
        Command::Download(args) => run_download_command(cache, args, cancel).await,
        Command::Category(args) => run_category_command(cache, args, cancel).await,
        Command::Queue(args) => run_queue_command(cache, args, cancel).await,
        Command::Search(args) => run_search_command(cache, args).await,
        Command::SearchText(args) => run_search_text_command(cache, args, cancel).await,
        Command::Refs(args) => run_refs_command(cache, args, cancel).await,
        Command::CitedBy(args) => run_cited_by_command(cache, args).await,
        Command::Graph(args) => run_graph_command(cache, args).await,
        Command::RebuildCitations => run_rebuild_citations_command(cache, cancel).await,
        Command::RebuildIndex => run_rebuild_index_command(cache).await,
        Command::Stats => run_stats_command(cache).await,
    }
}
