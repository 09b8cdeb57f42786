//! Ripple-Crawl main entry point
//!
//! Runs the crawl engine over seed URLs given on the command line, using the
//! built-in `page` processor.

use anyhow::Context;
use clap::Parser;
use ripple_crawl::config::{load_config_with_hash, Config};
use ripple_crawl::processor::Item;
use ripple_crawl::queue::open_queue;
use ripple_crawl::{ConfigError, DownloadResult, Engine, HttpDownloader, ProcessOutput, Task};
use scraper::{Html, Selector};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

/// Key of the built-in processor
const PAGE_PROCESSOR: &str = "page";

/// Ripple-Crawl: a concurrent crawl engine
///
/// Fetches every seed URL and reports status, size and title of each page as
/// one JSON line on stdout. If the first argument is an http(s) URL it is
/// taken as a seed, not as a config file.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version)]
#[command(about = "A concurrent crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Seed URLs to fetch
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long, conflicts_with = "dry_run")]
    dump_config: bool,

    /// Validate config and seeds without fetching anything
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    /// Splits the positional arguments into a config path and seed URLs
    fn into_inputs(self) -> (Option<PathBuf>, Vec<String>) {
        let mut urls = self.urls;
        let config = match self.config {
            Some(path) if looks_like_url(&path.to_string_lossy()) => {
                urls.insert(0, path.to_string_lossy().into_owned());
                None
            }
            other => other,
        };
        (config, urls)
    }
}

fn looks_like_url(arg: &str) -> bool {
    arg.starts_with("http://") || arg.starts_with("https://")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (verbose, quiet, dump, dry_run) = (cli.verbose, cli.quiet, cli.dump_config, cli.dry_run);
    let (config_path, urls) = cli.into_inputs();

    let config = match &config_path {
        Some(path) => {
            let (config, hash) = load_config_with_hash(path).with_context(|| {
                format!("Failed to load configuration from {}", path.display())
            })?;
            setup_logging(&config, verbose, quiet)?;
            tracing::info!(
                "Configuration loaded from {} (hash: {})",
                path.display(),
                hash
            );
            config
        }
        None => {
            let config = Config::default();
            setup_logging(&config, verbose, quiet)?;
            tracing::info!("No configuration file given, using defaults");
            config
        }
    };

    if dump {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let seeds = parse_seeds(&urls)?;

    if dry_run {
        handle_dry_run(&config, &seeds);
        return Ok(());
    }

    if seeds.is_empty() {
        anyhow::bail!("No seed URLs given, nothing to crawl");
    }

    handle_crawl(config, seeds, quiet).await
}

/// Sets up the logging/tracing subscriber
///
/// `-q` and `-v` take precedence over the configured level. Lines go to
/// stderr unless `logging.console` is off, and are also appended to
/// `logging.file-path` when one is set.
fn setup_logging(config: &Config, verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new(&config.logging.level),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let console = config.logging.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
    });

    let file = config
        .logging
        .open_file()
        .context("Failed to set up file logging")?
        .map(|file| {
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

fn parse_seeds(urls: &[String]) -> Result<Vec<Task>, ConfigError> {
    urls.iter()
        .map(|raw| {
            let url = Url::parse(raw)
                .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))?;
            match url.scheme() {
                "http" | "https" => Ok(Task::get(url.as_str(), PAGE_PROCESSOR)),
                other => Err(ConfigError::InvalidUrl(format!(
                    "{}: unsupported scheme '{}'",
                    raw, other
                ))),
            }
        })
        .collect()
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config, seeds: &[Task]) {
    println!("=== Ripple-Crawl Dry Run ===\n");

    println!("Request:");
    println!("  User agent: {}", config.request.user_agent);
    println!("  Timeout: {}ms", config.request.timeout);
    println!("  Max retries: {}", config.request.max_retries);
    println!("  Follow redirects: {}", config.request.follow_redirects);
    println!("  Concurrency: {}", config.request.concurrency);

    println!("\nQueue:");
    println!("  Backend: {:?}", config.queue.backend);
    println!("  Dedup scope: {:?}", config.queue.dedup_scope);
    println!("  Queue id: {}", config.queue.queue_id);

    println!("\nSeeds ({}):", seeds.len());
    for seed in seeds {
        println!("  - {}", seed.url);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, seeds: Vec<Task>, quiet: bool) -> anyhow::Result<()> {
    let queue = open_queue(&config.queue).await?;
    let downloader = HttpDownloader::new(&config.request)?;
    let (items, mut received) = mpsc::unbounded_channel::<Item>();

    let engine = Engine::builder(&config)
        .queue(queue)
        .downloader(Arc::new(downloader))
        .processor(&[PAGE_PROCESSOR], page)
        .item_sink(items)
        .build()?;

    let accepted = engine.add_tasks(&seeds).await;
    tracing::info!("Queued {} of {} seed URLs", accepted, seeds.len());

    let printer = tokio::spawn(async move {
        while let Some(item) = received.recv().await {
            println!("{}", item);
        }
    });

    let stats = engine.run().await;
    // The engine holds the item sender; dropping it ends the printer.
    drop(engine);
    if let Err(e) = printer.await {
        tracing::warn!("Item printer stopped abnormally: {}", e);
    }

    if !quiet {
        eprintln!(
            "Crawl finished: {} dispatched, {} succeeded, {} download failures, \
             {} processor failures, {} retried, {} rescheduled, {} dropped",
            stats.dispatched,
            stats.succeeded,
            stats.download_failures,
            stats.processor_failures,
            stats.retried,
            stats.rescheduled,
            stats.dropped
        );
    }
    Ok(())
}

/// Built-in processor reporting status, size and title of a page
fn page(result: &DownloadResult) -> anyhow::Result<ProcessOutput> {
    let status = result.status.unwrap_or_default();
    let title = extract_title(&result.text());

    tracing::info!(
        "{} -> {} ({} bytes){}",
        result.task.url,
        status,
        result.body.len(),
        title
            .as_deref()
            .map(|t| format!(" \"{}\"", t))
            .unwrap_or_default()
    );

    Ok(ProcessOutput::new().with_item(json!({
        "url": result.task.url,
        "status": status,
        "size": result.body.len(),
        "title": title,
    })))
}

fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}
