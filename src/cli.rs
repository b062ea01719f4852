//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use papercache_core::Config;

/// Local cache of arXiv metadata, PDFs, sources and citations.
///
/// Metadata is harvested in bulk or fetched on demand; artifacts are
/// downloaded once and indexed for search and citation queries.
#[derive(Parser, Debug)]
#[command(name = "papercache")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/papercache/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the index and artifacts
    #[arg(short = 'd', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum delay between requests to the catalog in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, global = true, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest metadata from the catalog, resuming an interrupted run.
    Sync(SyncArgs),

    /// Show papers, fetching missing metadata (and optionally artifacts).
    Fetch(FetchArgs),

    /// Queue artifact downloads for later processing by `queue`.
    Download(DownloadArgs),

    /// Download missing artifacts for every stored paper in a category.
    Category(CategoryArgs),

    /// Process the persistent download queue.
    Queue(QueueArgs),

    /// Full-text search over titles and abstracts.
    Search(SearchArgs),

    /// Search the text of downloaded PDFs.
    SearchText(SearchTextArgs),

    /// List the papers a paper cites.
    Refs(RefsArgs),

    /// List stored papers citing a paper.
    CitedBy(CitedByArgs),

    /// Print the citation graph around a paper as JSON.
    Graph(GraphArgs),

    /// Re-extract references from every downloaded source tree.
    RebuildCitations,

    /// Rebuild the full-text index from the papers table.
    RebuildIndex,

    /// Show cache statistics.
    Stats,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Catalog set to harvest, e.g. `cs` or `physics:hep-th`
    #[arg(long)]
    pub set: Option<String>,

    /// Harvest records changed on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Harvest records changed on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Records committed per transaction (1-10000)
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub batch_size: Option<u64>,
}

/// Which artifacts a command should make available.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct ArtifactFlags {
    /// Include the PDF
    #[arg(long)]
    pub pdf: bool,

    /// Include the source archive
    #[arg(long)]
    pub source: bool,

    /// Include both PDF and source
    #[arg(long)]
    pub all: bool,
}

impl ArtifactFlags {
    #[must_use]
    pub fn want_pdf(self) -> bool {
        self.pdf || self.all
    }

    #[must_use]
    pub fn want_source(self) -> bool {
        self.source || self.all
    }

    #[must_use]
    pub fn any(self) -> bool {
        self.want_pdf() || self.want_source()
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Paper identifiers (e.g. 2301.00001, hep-th/9901001v2)
    #[arg(required = true)]
    pub ids: Vec<String>,

    #[command(flatten)]
    pub artifacts: ArtifactFlags,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Paper identifiers
    #[arg(required = true)]
    pub ids: Vec<String>,

    // Both kinds when neither is given.
    #[command(flatten)]
    pub artifacts: ArtifactFlags,

    /// Queue priority; higher runs first
    #[arg(short = 'p', long, default_value_t = 0)]
    pub priority: i64,
}

#[derive(Args, Debug)]
pub struct CategoryArgs {
    /// Category, e.g. `cs.LG`
    pub category: String,

    /// Maximum papers to process
    #[arg(short = 'n', long, default_value_t = 100)]
    pub limit: i64,

    // Both kinds when neither is given.
    #[command(flatten)]
    pub artifacts: ArtifactFlags,
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum queue entries to process
    #[arg(short = 'n', long, default_value_t = 100)]
    pub limit: i64,

    /// Skip entries that already failed this many times
    #[arg(long, default_value_t = 5)]
    pub max_attempts: i64,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search terms
    #[arg(required = true)]
    pub query: Vec<String>,

    /// Only papers in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Maximum results
    #[arg(short = 'n', long, default_value_t = papercache_core::DEFAULT_SEARCH_LIMIT)]
    pub limit: i64,
}

#[derive(Args, Debug)]
pub struct SearchTextArgs {
    /// Text to look for
    #[arg(required = true)]
    pub query: Vec<String>,

    /// Accept near matches
    #[arg(long)]
    pub fuzzy: bool,

    /// Maximum results
    #[arg(short = 'n', long, default_value_t = papercache_core::DEFAULT_PDF_SEARCH_LIMIT)]
    pub limit: usize,

    /// Extract text of downloaded PDFs that have none stored yet
    #[arg(long)]
    pub extract: bool,
}

#[derive(Args, Debug)]
pub struct RefsArgs {
    /// Citing paper
    pub id: String,

    /// Fetch titles of referenced papers that are not cached
    #[arg(long)]
    pub prefetch: bool,
}

#[derive(Args, Debug)]
pub struct CitedByArgs {
    /// Cited paper
    pub id: String,

    /// Maximum results
    #[arg(short = 'n', long, default_value_t = papercache_core::DEFAULT_CITED_BY_LIMIT)]
    pub limit: i64,
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Center paper
    pub id: String,

    /// Print the combined reference/citing list instead of nodes and edges
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// Applies global flag overrides on top of file configuration.
    #[must_use]
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit_ms = rate_limit;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = u32::from(max_retries);
        }
        if let Command::Queue(QueueArgs {
            concurrency: Some(concurrency),
            ..
        }) = &self.command
        {
            config.concurrency = usize::from(*concurrency);
        }
        if let Command::Sync(SyncArgs {
            batch_size: Some(batch_size),
            ..
        }) = &self.command
        {
            config.batch_size = usize::try_from(*batch_size).unwrap_or(config.batch_size);
        }
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_stats_parses() {
        let cli = Cli::try_parse_from(["papercache", "stats"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["papercache", "-v", "stats"]).unwrap();
        assert_eq!(cli.verbose, 1);

        let cli = Cli::try_parse_from(["papercache", "stats", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_missing_command_rejected() {
        let err = Cli::try_parse_from(["papercache"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["papercache", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["papercache", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Cli::try_parse_from(["papercache", "stats", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_sync_dates_parse() {
        let cli = Cli::try_parse_from([
            "papercache",
            "sync",
            "--set",
            "cs",
            "--from",
            "2024-01-31",
        ])
        .unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.set.as_deref(), Some("cs"));
        assert_eq!(args.from, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(args.until, None);

        let err = Cli::try_parse_from(["papercache", "sync", "--from", "31/01/2024"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_fetch_artifact_flags() {
        let cli = Cli::try_parse_from(["papercache", "fetch", "2301.00001", "--all"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert!(args.artifacts.want_pdf() && args.artifacts.want_source());

        let cli = Cli::try_parse_from(["papercache", "fetch", "2301.00001", "--pdf"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert!(args.artifacts.want_pdf() && !args.artifacts.want_source());

        let err = Cli::try_parse_from(["papercache", "fetch"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_queue_concurrency_range() {
        let cli = Cli::try_parse_from(["papercache", "queue", "-c", "100"]).unwrap();
        let Command::Queue(args) = &cli.command else {
            panic!("expected queue");
        };
        assert_eq!(args.concurrency, Some(100));

        for bad in ["0", "101"] {
            let err = Cli::try_parse_from(["papercache", "queue", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_rate_limit_over_max_rejected() {
        let err = Cli::try_parse_from(["papercache", "-l", "60001", "stats"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_search_text_subcommand_name() {
        let cli =
            Cli::try_parse_from(["papercache", "search-text", "attention", "--fuzzy"]).unwrap();
        let Command::SearchText(args) = cli.command else {
            panic!("expected search-text");
        };
        assert!(args.fuzzy);
        assert_eq!(args.limit, 50);
    }

    #[test]
    fn test_apply_overrides_wins_over_file() {
        let cli = Cli::try_parse_from([
            "papercache",
            "--data-dir",
            "/tmp/pc",
            "-l",
            "0",
            "-r",
            "1",
            "queue",
            "-c",
            "8",
        ])
        .unwrap();
        let config = cli.apply_overrides(Config::default());

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/pc")));
        assert_eq!(config.rate_limit_ms, 0);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.batch_size, 1000);
    }
}
