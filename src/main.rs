//! gh-census main entry point
//!
//! This is the command-line interface for the gh-census population crawler.

use clap::{Parser, Subcommand};
use gh_census::config::{load_config_with_hash, Config};
use gh_census::crawler::{build_engine, CrawlEngine, PageFetcher};
use gh_census::{CensusError, CrawlRange, Cursor, EntityKind, GitHubFetcher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// gh-census: enumerate GitHub users, organizations and repositories
///
/// gh-census walks the `since`-cursor list endpoints page by page, waits out
/// exhausted rate-limit quotas, and writes every record as a JSON line to
/// stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "gh-census")]
#[command(version)]
#[command(about = "A rate-limit aware GitHub population crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Validate config and show the effective settings without calling the API
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate every record of one or more listings
    Crawl {
        /// Listing to crawl; repeat to crawl several concurrently
        #[arg(long, short, required = true, value_parser = parse_kind)]
        kind: Vec<EntityKind>,

        /// Cursor to start from (exclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Stop once the cursor reaches this value
        #[arg(long)]
        end: Option<u64>,
    },

    /// Estimate the highest identifier in use without enumerating
    Estimate {
        #[arg(long, short, required = true, value_parser = parse_kind)]
        kind: Vec<EntityKind>,
    },

    /// Show the current API quota
    Quota,
}

fn parse_kind(raw: &str) -> Result<EntityKind, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, cli.command.as_ref());
        return Ok(());
    }

    let Some(command) = cli.command else {
        return Err("no command given; use `crawl`, `estimate` or `quota`".into());
    };

    let engine = Arc::new(build_engine(&config)?);
    watch_for_interrupt(&engine);

    match command {
        Command::Crawl { kind, start, end } => {
            let range = match end {
                Some(end) => CrawlRange::bounded(start, end),
                None => CrawlRange::starting_at(start),
            };
            handle_crawl(engine, kind, range).await
        }
        Command::Estimate { kind } => handle_estimate(engine, kind).await,
        Command::Quota => handle_quota(&engine).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs are written to stderr so stdout carries only crawl output.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gh_census=info,warn"),
            1 => EnvFilter::new("gh_census=debug,info"),
            2 => EnvFilter::new("gh_census=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels every running crawl on the first Ctrl+C
fn watch_for_interrupt<F: PageFetcher>(engine: &CrawlEngine<F>) {
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next poll");
            cancel.cancel();
        }
    });
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config, command: Option<&Command>) {
    println!("=== gh-census Dry Run ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Timeout: {}s", config.api.timeout_secs);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nCrawl:");
    println!("  Page size: {}", config.crawl.page_size);
    println!("  Progress every: {} records", config.crawl.progress_every);
    println!("  Skip forks: {}", config.crawl.skip_forks);

    println!("\nBackoff:");
    println!("  Poll interval: {}s", config.backoff.poll_interval_secs);
    println!("  Cool-down: {}s", config.backoff.cool_down_secs);

    println!("\nEstimate:");
    println!("  Initial probe: {}", config.estimate.initial_probe);

    println!("\n✓ Configuration is valid");
    match command {
        Some(Command::Crawl { kind, start, end }) => println!(
            "✓ Would crawl {} from cursor {} to {}",
            join_kinds(kind),
            start,
            end.map_or_else(|| "the end".to_string(), |e| e.to_string())
        ),
        Some(Command::Estimate { kind }) => {
            println!("✓ Would estimate {}", join_kinds(kind))
        }
        Some(Command::Quota) => println!("✓ Would read the current quota"),
        None => {}
    }
}

fn join_kinds(kinds: &[EntityKind]) -> String {
    kinds
        .iter()
        .map(EntityKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Handles the crawl command, one task per listing
async fn handle_crawl(
    engine: Arc<CrawlEngine<GitHubFetcher>>,
    kinds: Vec<EntityKind>,
    range: CrawlRange,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tasks = JoinSet::new();
    for kind in dedup(kinds) {
        let engine = engine.clone();
        tasks.spawn(async move { (kind, engine.crawl_all(kind, range).await) });
    }

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        let (kind, result) = joined?;
        match result {
            Ok(outcome) => {
                let mut stdout = std::io::stdout().lock();
                for record in &outcome.records {
                    serde_json::to_writer(&mut stdout, &record.attributes)?;
                    writeln!(stdout)?;
                }
                stdout.flush()?;
                tracing::info!(
                    "{} crawl completed: {} records, resume with --start {}",
                    kind,
                    outcome.records.len(),
                    outcome.last_cursor
                );
            }
            Err(e) => {
                report_failure(kind, &e);
                failed = true;
            }
        }
    }

    if failed {
        return Err("one or more crawls failed".into());
    }
    Ok(())
}

/// Handles the estimate command
async fn handle_estimate(
    engine: Arc<CrawlEngine<GitHubFetcher>>,
    kinds: Vec<EntityKind>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tasks = JoinSet::new();
    for kind in dedup(kinds) {
        let engine = engine.clone();
        tasks.spawn(async move { (kind, engine.estimate_population(kind).await) });
    }

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        let (kind, result) = joined?;
        match result {
            Ok(estimate) => println!(
                "{}: ~{} (highest id; {} probes, {} quota waits)",
                kind,
                estimate.boundary,
                estimate.probes(),
                estimate.quota_waits
            ),
            Err(e) => {
                report_failure(kind, &e);
                failed = true;
            }
        }
    }

    if failed {
        return Err("one or more estimates failed".into());
    }
    Ok(())
}

/// Handles the quota command
async fn handle_quota(
    engine: &CrawlEngine<GitHubFetcher>,
) -> Result<(), Box<dyn std::error::Error>> {
    let quota = engine.fetcher().fetch_quota().await?;
    let reset = quota
        .reset
        .parse()
        .map_or_else(|_| quota.reset.to_string(), |at| at.to_rfc3339());

    println!(
        "Remaining: {} of {}",
        quota.remaining,
        quota.limit.map_or_else(|| "?".to_string(), |l| l.to_string())
    );
    println!("Resets at: {}", reset);
    Ok(())
}

fn report_failure(kind: EntityKind, error: &CensusError) {
    match error.resume_cursor() {
        Some(Cursor(cursor)) => {
            tracing::error!("{} failed: {} (resume with --start {})", kind, error, cursor)
        }
        None => tracing::error!("{} failed: {}", kind, error),
    }
}

fn dedup(mut kinds: Vec<EntityKind>) -> Vec<EntityKind> {
    let mut seen = Vec::with_capacity(kinds.len());
    kinds.retain(|kind| {
        if seen.contains(kind) {
            false
        } else {
            seen.push(*kind);
            true
        }
    });
    kinds
}
