//! Ripple main entry point
//!
//! Command-line interface for the Ripple crawl engine.

use anyhow::Context;
use clap::Parser;
use ripple_engine::config::{load_config_with_hash, EngineConfig};
use ripple_engine::{Engine, EngineError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ripple: a polite, pluggable crawl engine
///
/// Crawls the seeds listed in the configuration file, honoring per-domain
/// rate limits and delays, retrying transient failures and skipping URLs
/// it has already seen.
#[derive(Parser, Debug)]
#[command(name = "ripple")]
#[command(version)]
#[command(about = "A polite, pluggable crawl engine", long_about = None)]
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

    /// Validate config and show the effective settings without crawling
    #[arg(long)]
    dry_run: bool,

    /// Extra URL to crawl (repeatable)
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config, &cli.urls);
        return Ok(());
    }

    handle_crawl(config, &cli.urls).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_engine=info,ripple=info,warn"),
            1 => EnvFilter::new("ripple_engine=debug,ripple=debug,info"),
            2 => EnvFilter::new("ripple_engine=trace,ripple=trace,debug"),
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

/// Handles the --dry-run mode: prints the effective settings
fn handle_dry_run(config: &EngineConfig, urls: &[String]) {
    println!("=== Ripple Dry Run ===\n");

    let scheduler = &config.scheduler;
    println!("Scheduler:");
    println!("  Concurrency: {}", scheduler.concurrency);
    println!("  Max queue size: {}", scheduler.max_queue_size);
    println!("  Priority levels: {}", scheduler.priority_levels);
    println!("  Poll interval: {}ms", scheduler.poll_interval);

    let limits = &scheduler.resource_limits;
    println!("\nResource limits:");
    println!("  Memory: {} bytes", limits.max_memory_usage);
    println!("  CPU: {:.1}%", limits.max_cpu_usage);
    println!("  Active connections: {}", limits.max_active_connections);
    println!("  Check interval: {}ms", limits.check_interval);

    println!("\nPlugins:");
    println!(
        "  Duplicate filter: {} (cache {})",
        on_off(config.duplicate_filter.enabled),
        config.duplicate_filter.max_cache_size
    );
    println!(
        "  Rate limiter: {} ({} tokens, {}/s global; {} tokens, {}/s per domain; {} overrides)",
        on_off(config.rate_limit.enabled),
        config.rate_limit.capacity,
        config.rate_limit.refill_rate,
        config.rate_limit.per_domain.capacity,
        config.rate_limit.per_domain.refill_rate,
        config.rate_limit.domains.len()
    );
    println!(
        "  Delay controller: {} ({}ms default, {} overrides)",
        on_off(config.delay.enabled),
        config.delay.default_delay,
        config.delay.domains.len()
    );
    println!(
        "  Retry controller: {} (max {} retries, {}-{}ms)",
        on_off(config.retry.enabled),
        config.retry.max_retries,
        config.retry.base_delay,
        config.retry.max_delay
    );

    println!("\nUser-Agent: {}", config.user_agent.header_value());

    println!("\nSeeds ({}):", config.seeds.len() + urls.len());
    for seed in &config.seeds {
        println!(
            "  - {} (priority {}, depth {})",
            seed.url, seed.priority, seed.max_depth
        );
    }
    for url in urls {
        println!("  - {} (command line)", url);
    }

    println!("\n✓ Configuration is valid");
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Handles the main crawl operation
async fn handle_crawl(config: EngineConfig, urls: &[String]) -> anyhow::Result<()> {
    let engine = Engine::new(config).context("Failed to build the crawl engine")?;

    let mut queued = engine.add_seeds().await?;
    for url in urls {
        match engine.add_url(url).await {
            Ok(_) => queued += 1,
            Err(EngineError::Pipeline(e)) => tracing::warn!("Skipping {}: {}", url, e),
            Err(e) => return Err(e.into()),
        }
    }

    if queued == 0 {
        anyhow::bail!("Nothing to crawl: add [[seeds]] to the configuration or pass --url");
    }
    tracing::info!("Queued {} start URLs", queued);

    let summary = engine.run().await.context("Crawl failed")?;
    engine.shutdown().await?;

    println!("=== Crawl Summary ===\n{}", summary);
    Ok(())
}
