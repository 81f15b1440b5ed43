use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use hybridfeed::cache::CacheStore;
use hybridfeed::config::Config;
use hybridfeed::feed::{Aggregator, FeedFetcher};
use hybridfeed::util::parse_feed_url;

#[derive(Parser, Debug)]
#[command(
    name = "hybridfeed",
    version,
    about = "Merge RSS/Atom feeds into one Atom feed, newest entries first"
)]
struct Args {
    /// Refetch feeds whose cached copy is older than this many seconds
    /// [default: 3600, or HYBRIDFEED_MAX_AGE]
    #[arg(long, value_name = "SECONDS")]
    max_age: Option<u64>,

    /// Cache directory [default: ./cache, or HYBRIDFEED_CACHE]
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Optional TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fetch at most this many feeds at once (default: all at once)
    #[arg(long, value_name = "N")]
    max_concurrency: Option<usize>,

    /// Delete cache files older than the max age before aggregating
    #[arg(long)]
    prune: bool,

    /// Feed URLs to merge
    #[arg(required = true, value_name = "URL", value_parser = parse_feed_url)]
    urls: Vec<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    }
    .apply_env(|key| std::env::var(key).ok())
    .context("Invalid environment configuration")?;

    if let Some(max_age) = args.max_age {
        config.max_age_secs = max_age;
    }
    if let Some(ref dir) = args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if args.max_concurrency.is_some() {
        config.max_concurrency = args.max_concurrency;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the feed
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    tracing::debug!(?config, "Effective configuration");

    let cache = CacheStore::new(&config.cache_dir).with_context(|| {
        format!(
            "Failed to open cache directory '{}'",
            config.cache_dir.display()
        )
    })?;

    if args.prune {
        let removed = cache
            .prune(config.max_age())
            .context("Failed to prune cache")?;
        tracing::info!(removed = removed, "Pruned stale cache entries");
    }

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .context("Failed to build HTTP client")?;

    let fetcher = FeedFetcher::new(client, cache)
        .with_request_timeout(config.request_timeout())
        .with_max_feed_bytes(config.max_feed_bytes);
    let aggregator = Aggregator::new(fetcher).with_max_concurrency(config.max_concurrency);

    let atom = aggregator
        .generate(args.urls.as_slice(), config.max_age())
        .await
        .context("Failed to build hybrid feed")?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", atom).context("Failed to write feed to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;

    Ok(())
}
