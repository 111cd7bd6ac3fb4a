//! spendcache - command-line driver for the expense tracker's offline cache.
//!
//! Installs the application shell of a running origin into a disk-backed
//! cache and routes individual requests through the same policies the
//! browser worker applies, so cache behaviour can be inspected offline.

mod format;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spendcache_core::{
    CacheStorage, Clients, Config, Destination, DiskStorage, FetchOutcome, HttpFetcher, Method,
    OfflineCacheManager, Registration, Request, RequestMode, Url,
};

use format::{format_bytes, truncate_string};

/// Width of the URL column in `status` output
const URL_COLUMN_WIDTH: usize = 60;

#[derive(Parser, Debug)]
#[command(name = "spendcache", version, about = "Offline asset cache for the expense tracker")]
struct Cli {
    /// Config file (defaults to ~/.config/spendcache/config.json)
    #[arg(long, global = true, env = "SPENDCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Origin serving the expense tracker
    #[arg(long, global = true, env = "SPENDCACHE_ORIGIN")]
    origin: Option<String>,

    /// Cache version tag, e.g. v2
    #[arg(long = "version-tag", global = true, env = "SPENDCACHE_VERSION")]
    version_tag: Option<String>,

    /// Directory holding the cache buckets
    #[arg(long, global = true, env = "SPENDCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Also write logs to this file (rotated daily)
    #[arg(long, global = true, env = "SPENDCACHE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cache the static assets and activate the configured version
    Install,
    /// Route one request through the cache
    Fetch(FetchArgs),
    /// List cache buckets and their entries
    Status,
    /// Check how the cache handles a control message (e.g. skipWaiting).
    /// Nothing is kept between runs, so only `install` can act on it.
    Message { text: String },
    /// Trigger a background sync tag
    Sync { tag: String },
    /// Show the notification a push event would display
    Push {
        #[arg(long)]
        payload: Option<String>,
    },
    /// Delete every cache bucket
    Clear,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Absolute URL, or a path resolved against the origin
    url: String,

    #[arg(long, default_value = "GET")]
    method: String,

    /// Treat the request as a page navigation
    #[arg(long, conflicts_with = "mode")]
    navigate: bool,

    /// Request mode: navigate, same-origin, no-cors or cors
    #[arg(long)]
    mode: Option<RequestMode>,

    /// Request expects a document
    #[arg(long)]
    document: bool,

    /// Print the response body
    #[arg(long)]
    body: bool,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    info!("spendcache starting");

    let config = load_config(&cli)?;

    match cli.command {
        Command::Install => run_install(config).await,
        Command::Fetch(args) => run_fetch(config, args).await,
        Command::Status => run_status(config).await,
        Command::Message { text } => {
            let manager = build_manager(config, Arc::new(Clients::new()))?;
            println!("{}", message_reply(&text, manager.handle_message(&text)));
            Ok(())
        }
        Command::Sync { tag } => {
            let manager = build_manager(config, Arc::new(Clients::new()))?;
            if manager.handle_sync(&tag) {
                println!("{}: sync triggered", tag);
            } else {
                println!("{}: no handler for this tag", tag);
            }
            Ok(())
        }
        Command::Push { payload } => {
            let manager = build_manager(config, Arc::new(Clients::new()))?;
            let notification = manager.handle_push(payload.as_deref());
            println!("{}", serde_json::to_string_pretty(&notification)?);
            Ok(())
        }
        Command::Clear => run_clear(config).await,
    }
}

/// The CLI keeps no waiting version between runs, so a recognised message
/// has nothing to release.
fn message_reply(text: &str, recognised: bool) -> String {
    if recognised {
        format!(
            "{}: recognised, but no version is waiting; each run starts fresh and `spendcache install` activates immediately",
            text
        )
    } else {
        format!("{}: not a recognised message", text)
    }
}

/// File values first, then environment and flags on top.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(ref origin) = cli.origin {
        config.origin = origin.clone();
    }
    if let Some(ref version) = cli.version_tag {
        config.version = version.clone();
    }
    if let Some(ref dir) = cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_storage(config: &Config) -> Result<Arc<DiskStorage>> {
    let cache_dir = config.cache_dir()?;
    let storage = DiskStorage::new(cache_dir.clone())
        .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
    Ok(Arc::new(storage))
}

fn build_manager(config: Config, clients: Arc<Clients>) -> Result<Arc<OfflineCacheManager>> {
    let storage = open_storage(&config)?;
    let fetcher = HttpFetcher::with_timeout(config.request_timeout())
        .context("Failed to build HTTP client")?;
    let manager = OfflineCacheManager::new(config, storage, Arc::new(fetcher), clients)?;
    Ok(Arc::new(manager))
}

async fn run_install(config: Config) -> Result<()> {
    let clients = Arc::new(Clients::new());
    let manager = build_manager(config, clients.clone())?;
    let name = manager.cache_name().to_string();
    let assets = manager.config().static_assets.len();

    let mut registration = Registration::new(clients);
    let report = registration
        .register(manager)
        .await
        .with_context(|| format!("Failed to install {}", name))?;

    match report {
        Some(report) => {
            println!("Installed {} ({} assets)", name, assets);
            if !report.deleted.is_empty() {
                println!("Removed stale caches: {}", report.deleted.join(", "));
            }
            for failed in &report.failed {
                println!("Could not remove stale cache: {}", failed);
            }
        }
        None => println!("Installed {}; waiting for open pages to close", name),
    }
    Ok(())
}

fn resolve_url(origin: &Url, input: &str) -> Result<Url> {
    Url::parse(input)
        .or_else(|_| origin.join(input))
        .with_context(|| format!("Invalid URL: {}", input))
}

async fn run_fetch(config: Config, args: FetchArgs) -> Result<()> {
    let clients = Arc::new(Clients::new());
    let manager = build_manager(config, clients.clone())?;

    let mut registration = Registration::new(clients);
    if !registration.restore(manager.clone()).await? {
        anyhow::bail!(
            "No installed cache {}; run `spendcache install` first",
            manager.cache_name()
        );
    }

    let url = resolve_url(&manager.config().origin_url()?, &args.url)?;
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", args.method))?;
    let target = url.to_string();

    let mut request = if args.navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    if let Some(mode) = args.mode {
        request = request.with_mode(mode);
    }
    if args.document {
        request = request.with_destination(Destination::Document);
    }
    let request = request.with_method(method);

    let outcome = registration.fetch(request).await;
    manager.wait_until_idle().await;

    match outcome {
        FetchOutcome::Passthrough => {
            println!("{}: not intercepted, default network handling applies", target);
        }
        FetchOutcome::Served { response, source } => {
            println!(
                "{} {} from {} ({})",
                response.status,
                response.status_text,
                source,
                format_bytes(response.body.len())
            );
            if let Some(content_type) = response.header("content-type") {
                println!("Content-Type: {}", content_type);
            }
            if args.body {
                println!();
                println!("{}", response.text());
            }
        }
        FetchOutcome::Unavailable => {
            anyhow::bail!("No response available for {}", target);
        }
    }
    Ok(())
}

async fn run_status(config: Config) -> Result<()> {
    let current = config.cache_name();
    let storage = open_storage(&config)?;
    let buckets = storage.keys().await?;

    if buckets.is_empty() {
        println!("No caches in {}", storage.cache_dir().display());
        return Ok(());
    }

    for bucket in buckets {
        let entries = storage.entries(&bucket).await?;
        let marker = if bucket == current { " (current)" } else { "" };
        println!("{}{} - {} entries", bucket, marker, entries.len());
        for (key, cached) in entries {
            println!(
                "  {:<width$} {:>4} {:>9}  {}",
                truncate_string(key.url(), URL_COLUMN_WIDTH),
                cached.data.status,
                format_bytes(cached.data.body.len()),
                cached.age_display(),
                width = URL_COLUMN_WIDTH
            );
        }
    }
    Ok(())
}

async fn run_clear(config: Config) -> Result<()> {
    let storage = open_storage(&config)?;
    let mut removed = 0;
    for bucket in storage.keys().await? {
        match storage.delete(&bucket).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(cache = %bucket, error = %e, "Failed to delete cache"),
        }
    }
    println!("Removed {} cache(s)", removed);
    Ok(())
}
