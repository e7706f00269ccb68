//! Kumo-Fetch main entry point
//!
//! Command-line interface for the Kumo-Fetch crawl scheduler.

use clap::Parser;
use kumo_fetch::config::load_config_with_hash;
use kumo_fetch::crawler::run_crawl;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Kumo-Fetch: a polite fetch scheduler
///
/// Kumo-Fetch turns a flat fetch list into polite, concurrency-bounded
/// fetch traffic, respecting per-host delays and robots.txt, and writes
/// every finished URL to a results database.
#[derive(Parser, Debug)]
#[command(name = "kumo-fetch")]
#[command(version = "1.0.0")]
#[command(about = "A polite fetch scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the results database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        run_crawl(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_fetch=info,warn"),
            1 => EnvFilter::new("kumo_fetch=debug,info"),
            2 => EnvFilter::new("kumo_fetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and previews the fetch list
fn handle_dry_run(config: &kumo_fetch::Config) -> Result<(), Box<dyn std::error::Error>> {
    use kumo_fetch::crawler::{FetchSource, FileSource};
    use std::path::Path;

    println!("=== Kumo-Fetch Dry Run ===\n");

    println!("Scheduler Configuration:");
    println!("  Fetch workers: {}", config.scheduler.fetch_threads);
    println!("  Output workers: {}", config.scheduler.output_threads);
    println!("  Server delay: {}ms", config.scheduler.server_delay_ms);
    println!(
        "  Max requests per host: {}",
        config.scheduler.max_requests_per_host
    );
    println!(
        "  Max queued requests: {}",
        config.scheduler.max_queued_requests
    );
    println!("  Max hosts: {}", config.scheduler.max_hosts);
    println!(
        "  Retry ceiling: {} errors, {} redirects",
        config.scheduler.max_errors_per_url, config.scheduler.max_redirects_per_url
    );

    println!("\nUser Agent:");
    println!("  {}", config.user_agent_string());
    println!("  Robots agents: {}", config.robots_agent_names().join(", "));

    if config.throttle.enabled {
        println!("\nThrottle:");
        println!(
            "  {} B/s over {}s windows",
            config.throttle.max_bytes_per_sec, config.throttle.window_secs
        );
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Marker: {}", config.output.marker_path);

    println!("\nFetch list: {}", config.source.fetch_list_path);
    let mut source = FileSource::open(Path::new(&config.source.fetch_list_path))?;
    let mut shown = 0;
    let mut total = 0;
    while let Some(entry) = source.next_entry()? {
        total += 1;
        if shown < 10 {
            let marker = if entry.should_fetch { " " } else { "!" };
            println!("  {} {}", marker, entry.url);
            shown += 1;
        }
    }
    if total > shown {
        println!("  ... and {} more", total - shown);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would fetch up to {} URLs", total);

    Ok(())
}

/// Handles the --stats mode: shows statistics from the results database
fn handle_stats(config: &kumo_fetch::Config) -> Result<(), Box<dyn std::error::Error>> {
    use kumo_fetch::output::SqliteSink;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let sink = SqliteSink::new(Path::new(&config.output.database_path))?;

    let total = sink.count_results()?;
    let succeeded = sink.count_successes()?;
    println!("Total records: {}", total);
    println!("Succeeded: {}", succeeded);
    println!("Failed: {}", total - succeeded);

    let summary = sink.failure_summary()?;
    if !summary.is_empty() {
        println!("\nFailure reasons:");
        for (reason, count) in summary {
            println!("  {:<24} {}", reason, count);
        }
    }

    Ok(())
}
