//! larder - an offline-first restaurant directory on the command line.
//!
//! Reads come from the local JSON cache while it is fresh and fall back to
//! it when the remote API is unreachable.

mod credentials;
mod display;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use larder_core::config::ENV_BASE_URL;
use larder_core::{
    CacheEntry, CacheStore, Clock, Config, FetchCoordinator, HttpRemoteSource,
    JsonFileCacheStore, Key, Repository, Restaurant, SystemClock,
};

use credentials::StoredToken;

/// Fallback token source when nothing is stored in the keychain
const ENV_TOKEN: &str = "LARDER_TOKEN";

/// Default polling interval for `watch`, in seconds.
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "larder", version, about = "Offline-first restaurant directory")]
struct Cli {
    /// Serve reads from the local cache only
    #[arg(long, global = true)]
    offline: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show one restaurant
    Get { id: String },
    /// List cached restaurants
    List,
    /// Replace the cache with the full remote collection
    Refresh,
    /// Create or update a restaurant
    Save {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        cuisine: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        rating: Option<f32>,
    },
    /// Delete a restaurant
    Delete { id: String },
    /// Print changes as they reach the cache, refreshing periodically
    Watch {
        id: Option<String>,
        #[arg(long, default_value_t = DEFAULT_WATCH_INTERVAL_SECS)]
        interval: u64,
    },
    /// Show configuration and cache freshness
    Status,
    /// Store an API token in the OS keychain
    Login {
        #[arg(long)]
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove the stored API token
    Logout,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
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

    let mut config = Config::load()?;
    config.apply_env()?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Login { username, token } => login(&username, token),
        Command::Logout => logout(&config),
        command => {
            let cache: Arc<JsonFileCacheStore<Restaurant>> =
                Arc::new(JsonFileCacheStore::open(config.cache_dir()?, &config.collection)?);
            if cli.offline {
                run_offline(command, &cache, &config).await
            } else {
                let repo = build_repository(&config, Arc::clone(&cache))?;
                run_online(command, &repo, &cache, &config).await
            }
        }
    }
}

fn resolve_token(config: &Config) -> Option<String> {
    if let Some(ref username) = config.last_username {
        match StoredToken::for_user(username).and_then(|stored| stored.load()) {
            Ok(Some(token)) => return Some(token),
            Ok(None) => debug!(username = %username, "No keychain token, trying environment"),
            Err(e) => debug!(error = %e, "Keychain unavailable, trying environment"),
        }
    }
    std::env::var(ENV_TOKEN).ok()
}

fn build_repository(
    config: &Config,
    cache: Arc<JsonFileCacheStore<Restaurant>>,
) -> Result<Repository<Restaurant>> {
    let base_url = config.base_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!(
            "No remote configured. Set base_url in {} or {}, or use --offline",
            Config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".to_string()),
            ENV_BASE_URL
        )
    })?;

    let mut remote: HttpRemoteSource<Restaurant> =
        HttpRemoteSource::with_timeout(base_url, &config.collection, config.request_timeout())?;
    if let Some(token) = resolve_token(config) {
        remote = remote.with_token(token);
    }

    Ok(Repository::new(
        cache,
        Arc::new(remote),
        Arc::new(FetchCoordinator::new()),
        config.staleness(),
    ))
}

async fn run_online(
    command: Command,
    repo: &Repository<Restaurant>,
    cache: &JsonFileCacheStore<Restaurant>,
    config: &Config,
) -> Result<()> {
    let now = || SystemClock.now();
    match command {
        Command::Get { id } => {
            let entry = repo.get_entry(&Key::from(id)).await?;
            println!("{}", display::detail(&entry, now()));
        }
        Command::List => print_list(cache).await,
        Command::Refresh => {
            let refreshed = repo.refresh_all().await?;
            println!("Refreshed {} restaurants", refreshed.len());
        }
        Command::Save {
            id,
            name,
            cuisine,
            address,
            rating,
        } => {
            let restaurant = Restaurant {
                id,
                name,
                cuisine,
                address,
                rating,
            };
            let saved = repo.save(restaurant).await?;
            println!("Saved {} ({})", saved.name, saved.id);
        }
        Command::Delete { id } => {
            repo.delete(&Key::from(id.as_str())).await?;
            println!("Deleted {}", id);
        }
        Command::Watch { id, interval } => watch(repo, id, interval).await?,
        Command::Status => print_status(cache, config).await,
        Command::Login { .. } | Command::Logout => {}
    }
    Ok(())
}

async fn run_offline(
    command: Command,
    cache: &JsonFileCacheStore<Restaurant>,
    config: &Config,
) -> Result<()> {
    match command {
        Command::Get { id } => match cache.get(&Key::from(id.as_str())).await {
            Some(entry) => println!("{}", display::detail(&entry, SystemClock.now())),
            None => anyhow::bail!("{} is not cached", id),
        },
        Command::List => print_list(cache).await,
        Command::Status => print_status(cache, config).await,
        _ => anyhow::bail!("This command needs the remote; drop --offline"),
    }
    Ok(())
}

async fn print_list(cache: &JsonFileCacheStore<Restaurant>) {
    let restaurants = cache.observe_all().next().await.unwrap_or_default();
    if restaurants.is_empty() {
        println!("Cache is empty. Run `larder refresh` to populate it.");
        return;
    }
    println!("{}", display::header());
    for r in &restaurants {
        println!("{}", display::row(r));
    }
}

async fn print_status(cache: &JsonFileCacheStore<Restaurant>, config: &Config) {
    let staleness = config.staleness();
    let now = SystemClock.now();
    let restaurants = cache.observe_all().next().await.unwrap_or_default();

    let mut stale = 0;
    let mut newest: Option<CacheEntry<Restaurant>> = None;
    for r in &restaurants {
        if let Some(entry) = cache.get(&Key::from(r.id.as_str())).await {
            if larder_core::is_stale(Some(&entry), &staleness, now) {
                stale += 1;
            }
            if newest.as_ref().map_or(true, |n| entry.cached_at > n.cached_at) {
                newest = Some(entry);
            }
        }
    }

    println!("Remote:     {}", config.base_url.as_deref().unwrap_or("(not configured)"));
    println!("Collection: {}", config.collection);
    println!("Cache file: {}", cache.path().display());
    println!("Max age:    {}m", config.max_age_minutes);
    println!("Cached:     {} ({} stale)", restaurants.len(), stale);
    println!(
        "Updated:    {}",
        newest.map_or_else(|| "never".to_string(), |e| e.age_display(now))
    );
}

/// Print every cache change for one key (or the whole collection) while a
/// background ticker keeps the cache refreshed.
async fn watch(repo: &Repository<Restaurant>, id: Option<String>, interval: u64) -> Result<()> {
    let key = id.map(Key::from);
    let ticker = {
        let repo = repo.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tick.tick().await;
                let result = match key {
                    Some(ref key) => repo.get(key).await.map(|_| ()),
                    None => repo.refresh_all().await.map(|_| ()),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Watch refresh failed");
                }
            }
        })
    };

    info!("Watching for changes, Ctrl-C to stop");
    let now = || SystemClock.now();
    match key {
        Some(key) => {
            let mut updates = repo.observe(&key);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    update = updates.next() => match update {
                        Some(Some(entry)) => println!("{}\n", display::detail(&entry, now())),
                        Some(None) => println!("{} is not cached\n", key),
                        None => break,
                    },
                }
            }
        }
        None => {
            let mut updates = repo.observe_all();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    update = updates.next() => match update {
                        Some(list) => println!("{} restaurants cached", list.len()),
                        None => break,
                    },
                }
            }
        }
    }

    ticker.abort();
    Ok(())
}

fn read_token_from_stdin() -> Result<String> {
    eprint!("Token: ");
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read token from stdin")?;
    Ok(line)
}

fn login(username: &str, token: Option<String>) -> Result<()> {
    let raw = match token {
        Some(token) => token,
        None => read_token_from_stdin()?,
    };
    let token = credentials::normalize_token(&raw)?;
    StoredToken::for_user(username)?.save(&token)?;
    Config::store_last_username(Some(username))?;
    println!("Token stored for {}", username);
    Ok(())
}

fn logout(config: &Config) -> Result<()> {
    let Some(ref username) = config.last_username else {
        println!("Not logged in");
        return Ok(());
    };
    match StoredToken::for_user(username).and_then(|stored| stored.forget()) {
        Ok(true) => {}
        Ok(false) => debug!(username = %username, "No keychain token to remove"),
        Err(e) => warn!(error = %e, "Failed to remove keychain entry"),
    }
    Config::store_last_username(None)?;
    println!("Logged out {}", username);
    Ok(())
}
