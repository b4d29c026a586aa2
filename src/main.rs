//! Ripple-Crawl main entry point
//!
//! This is the command-line interface for the Ripple-Crawl orchestration engine.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ripple_crawl::batch::BatchController;
use ripple_crawl::cache::{CacheParams, ContentCache, ListFilter};
use ripple_crawl::config::{load_config_with_hash, Config};
use ripple_crawl::crawler::{CrawlScheduler, CrawlStrategy, CrawlTask};
use ripple_crawl::output::{
    print_batch_summary, print_crawl_summary, BatchOutput, CrawlOutput, EntryOptions, EntryOutput,
};
use ripple_crawl::render::{
    ContentFilter, HttpRenderClient, RenderClient, RenderConfig, WaitCondition,
};
use ripple_crawl::session::SessionManager;
use ripple_crawl::storage::{open_storage, SharedStorage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Ripple-Crawl: a policy-driven crawl orchestration engine
///
/// Ripple-Crawl decides which pages get fetched, in what order, under what
/// concurrency and memory ceiling and with which login sessions, and keeps
/// every result in a content cache for later retrieval.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version)]
#[command(about = "A policy-driven crawl orchestration engine", long_about = None)]
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

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the link graph from a start URL
    Crawl {
        /// Start URL (overrides crawler.start-url)
        #[arg(long)]
        start_url: Option<String>,

        /// Traversal strategy: bfs, dfs or best_first
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<CrawlStrategy>,

        #[arg(long)]
        max_depth: Option<u32>,

        #[arg(long)]
        max_pages: Option<u32>,

        /// Keyword for best-first scoring (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        #[command(flatten)]
        render: RenderArgs,

        /// Print the result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Fetch a list of URLs concurrently
    Batch {
        /// URLs to fetch
        urls: Vec<String>,

        /// File with one URL per line
        #[arg(long)]
        input: Option<PathBuf>,

        /// Store new entries even if an identical request is cached
        #[arg(long)]
        bypass_cache: bool,

        #[command(flatten)]
        render: RenderArgs,

        #[arg(long)]
        json: bool,
    },

    /// Show a cached entry by id
    Get {
        id: String,

        #[arg(long)]
        include_html: bool,

        /// Include screenshot and PDF bytes (hex-encoded)
        #[arg(long)]
        include_screenshot: bool,

        /// Add the page text relevant to this query (BM25)
        #[arg(long)]
        filter_query: Option<String>,

        /// Minimum BM25 score a text block needs to be kept
        #[arg(long, default_value_t = 0.3)]
        filter_threshold: f64,

        /// Add the page text blocks with at least this many words
        #[arg(long, conflicts_with = "filter_query")]
        min_words: Option<usize>,
    },

    /// List cached entries, newest first
    List {
        /// Keep entries whose URL contains this text
        #[arg(long)]
        url_contains: Option<String>,

        /// RFC 3339 lower bound on creation time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// RFC 3339 upper bound on creation time
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and show what it would do
    Validate,
}

/// Per-request render options shared by `crawl` and `batch`
#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// CSS selector to wait for before a page counts as loaded
    #[arg(long)]
    wait_for: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Extra request header as NAME:VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

impl RenderArgs {
    fn to_render_config(&self) -> RenderConfig {
        RenderConfig {
            wait_for: self.wait_for.clone().map(WaitCondition::Selector),
            timeout_ms: self.timeout_ms,
            headers: self.headers.iter().cloned().collect(),
            ..Default::default()
        }
    }
}

fn parse_strategy(raw: &str) -> Result<CrawlStrategy, String> {
    match raw.trim().to_lowercase().as_str() {
        "bfs" => Ok(CrawlStrategy::Bfs),
        "dfs" => Ok(CrawlStrategy::Dfs),
        "best_first" | "best-first" => Ok(CrawlStrategy::BestFirst),
        other => Err(format!("unknown strategy '{}' (expected bfs, dfs or best_first)", other)),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got '{}'", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl {
            start_url,
            strategy,
            max_depth,
            max_pages,
            keywords,
            render,
            json,
        } => {
            let mut config = config;
            if let Some(start_url) = start_url {
                config.crawler.start_url = Some(start_url);
            }
            if let Some(strategy) = strategy {
                config.crawler.strategy = strategy;
            }
            if let Some(max_depth) = max_depth {
                config.crawler.max_depth = max_depth;
            }
            if let Some(max_pages) = max_pages {
                config.crawler.max_pages = max_pages;
            }
            if !keywords.is_empty() {
                config.crawler.keyword_focus = keywords;
            }
            ripple_crawl::config::validate(&config).context("Invalid crawl options")?;
            handle_crawl(&config, render.to_render_config(), json).await
        }
        Command::Batch {
            urls,
            input,
            bypass_cache,
            render,
            json,
        } => {
            let mut urls = urls;
            if let Some(input) = input {
                urls.extend(read_url_list(&input)?);
            }
            handle_batch(&config, urls, render.to_render_config(), bypass_cache, json).await
        }
        Command::Get {
            id,
            include_html,
            include_screenshot,
            filter_query,
            filter_threshold,
            min_words,
        } => {
            let filter = match (filter_query, min_words) {
                (Some(query), _) => Some(ContentFilter::Bm25 {
                    query,
                    threshold: filter_threshold,
                }),
                (None, Some(min_words)) => Some(ContentFilter::Pruning { min_words }),
                (None, None) => None,
            };
            handle_get(
                &config,
                &id,
                EntryOptions {
                    include_html,
                    include_screenshot,
                    filter,
                },
            )
        }
        Command::List {
            url_contains,
            since,
            until,
            limit,
            json,
        } => handle_list(
            &config,
            ListFilter {
                url_contains,
                since,
                until,
                limit,
            },
            json,
        ),
        Command::Validate => {
            handle_validate(&config, &config_hash);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawl=info,warn"),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything a crawl or batch run needs, wired from the configuration
struct Engine {
    cache: Arc<ContentCache>,
    controller: BatchController,
}

fn open_cache_storage(config: &Config) -> anyhow::Result<Option<SharedStorage>> {
    config
        .cache
        .database_path
        .as_deref()
        .map(|path| {
            open_storage(Path::new(path))
                .with_context(|| format!("Failed to open database {}", path))
        })
        .transpose()
}

fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let storage = open_cache_storage(config)?;
    let client: Arc<dyn RenderClient> = Arc::new(
        HttpRenderClient::new(config.render.clone()).context("Failed to build HTTP client")?,
    );

    let mut controller = BatchController::new(Arc::clone(&client), &config.batch);
    if !config.auth.is_empty() {
        let sessions = SessionManager::from_config(Arc::clone(&client), &config.auth, storage.clone())?;
        tracing::info!("Loaded credentials for {} auth sites", config.auth.len());
        controller = controller.with_sessions(Arc::new(sessions));
    }

    Ok(Engine {
        cache: Arc::new(ContentCache::new(&config.cache, storage)),
        controller,
    })
}

/// Cancels `token` on Ctrl-C so runs stop admitting work and return what they have
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight fetches");
            token.cancel();
        }
    });
}

/// Handles the `crawl` command
async fn handle_crawl(config: &Config, render: RenderConfig, json: bool) -> anyhow::Result<()> {
    let Some(start_url) = config.crawler.start_url.clone() else {
        bail!("No start URL: set crawler.start-url or pass --start-url");
    };

    let engine = build_engine(config)?;
    let scheduler = CrawlScheduler::new(engine.controller, &config.crawler)?
        .with_cache(Arc::clone(&engine.cache))
        .with_render_config(render);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let report = scheduler.run(&start_url, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&CrawlOutput::new(&report))?);
    } else {
        print_crawl_summary(&report.summary);
    }
    Ok(())
}

/// Handles the `batch` command
async fn handle_batch(
    config: &Config,
    urls: Vec<String>,
    render: RenderConfig,
    bypass_cache: bool,
    json: bool,
) -> anyhow::Result<()> {
    if urls.is_empty() {
        bail!("No URLs given: pass them as arguments or with --input");
    }

    let engine = build_engine(config)?;
    let tasks: Vec<CrawlTask> = urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| CrawlTask::new(i as u64, url.trim().to_string(), 0, None))
        .collect();

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    tracing::info!("Fetching {} URLs", tasks.len());
    let report = engine.controller.run(tasks, &render, &cancel).await;

    let mut content_ids = HashMap::new();
    for outcome in &report.outcomes {
        if let Ok(result) = &outcome.result {
            let params = CacheParams {
                bypass: bypass_cache,
                ..CacheParams::new(outcome.task.url.clone(), render.clone())
            };
            match engine.cache.put(&params, result.clone()) {
                Ok(id) => {
                    content_ids.insert(outcome.task.id, id);
                }
                Err(e) => tracing::warn!("Failed to cache {}: {}", outcome.task.url, e),
            }
        }
    }

    if json {
        let output = BatchOutput::new(&report, &content_ids);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_batch_summary(&report);
    }
    Ok(())
}

/// Opens the persistent cache; `get` and `list` are useless without one
fn persistent_cache(config: &Config) -> anyhow::Result<ContentCache> {
    match open_cache_storage(config)? {
        Some(storage) => Ok(ContentCache::new(&config.cache, Some(storage))),
        None => bail!("cache.database-path must be set to read cached entries"),
    }
}

/// Handles the `get` command
fn handle_get(config: &Config, id: &str, options: EntryOptions) -> anyhow::Result<()> {
    let cache = persistent_cache(config)?;
    let entry = cache.get(id)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&EntryOutput::new(&entry, options))?
    );
    Ok(())
}

/// Handles the `list` command
fn handle_list(config: &Config, filter: ListFilter, json: bool) -> anyhow::Result<()> {
    let cache = persistent_cache(config)?;
    let entries = cache.list(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Cached entries ({}):", entries.len());
    for entry in &entries {
        println!(
            "  {}  {}  [{}] {} ({} links)",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status,
            entry.source_url,
            entry.links_found
        );
    }
    Ok(())
}

/// Handles the `validate` command: shows what the configuration would do
fn handle_validate(config: &Config, config_hash: &str) {
    println!("=== Ripple-Crawl Configuration ===\n");
    println!("Config hash: {}\n", config_hash);

    let crawler = &config.crawler;
    println!("Crawler:");
    println!(
        "  Start URL: {}",
        crawler.start_url.as_deref().unwrap_or("(none)")
    );
    println!("  Strategy: {}", crawler.strategy);
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Max pages: {}", crawler.max_pages);
    if !crawler.allowed_domains.is_empty() {
        println!("  Allowed domains: {}", crawler.allowed_domains.join(", "));
    }
    if !crawler.keyword_focus.is_empty() {
        println!("  Keyword focus: {}", crawler.keyword_focus.join(", "));
    }
    for pattern in &crawler.include_patterns {
        println!("  Include: {}", pattern);
    }
    for pattern in &crawler.exclude_patterns {
        println!("  Exclude: {}", pattern);
    }

    let batch = &config.batch;
    println!("\nBatch:");
    println!("  Max concurrent: {}", batch.max_concurrent);
    println!("  Memory threshold: {}%", batch.memory_threshold_percent);
    println!("  Retry budget: {}", batch.retry_budget);
    if batch.batch_timeout_ms > 0 {
        println!("  Batch timeout: {}ms", batch.batch_timeout_ms);
    }

    println!("\nCache:");
    println!(
        "  Database: {}",
        config.cache.database_path.as_deref().unwrap_or("(memory only)")
    );
    println!(
        "  Dedup: {} (window {}s)",
        config.cache.dedup, config.cache.dedup_window_secs
    );
    if let Some(capacity) = config.cache.capacity {
        println!("  Capacity: {}", capacity);
    }

    println!("\nAuth sites ({}):", config.auth.len());
    for entry in &config.auth {
        println!(
            "  - {} as {} (login: {})",
            entry.site,
            entry.username,
            entry.login_url.as_deref().unwrap_or("start URL")
        );
    }

    println!("\n✓ Configuration is valid");
}

fn read_url_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
