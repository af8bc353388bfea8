//! Command-line driver for the shellcache engine.
//!
//! Runs worker lifecycle events against a persistent SQLite store, so a site
//! can be installed once and then served from cache, offline included.
//!
//! ## Usage
//!
//! ```bash
//! # Install (and activate) the configured version
//! shellcache --config site.json install
//!
//! # Fetch through the cache
//! shellcache fetch /sa.html --navigate
//!
//! # Report the active version
//! shellcache version
//!
//! # Delete buckets from older versions
//! shellcache cleanup
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use shellcache_common::logging::init_logging;
use shellcache_common::{OptionExt, ShellCacheError};
use shellcache_net::{Request, ResourceLoader};
use shellcache_sw::{
    CacheStorage, MessageTarget, ServiceWorkerContainer, ServiceWorkerEvent, SqliteBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Offline-first cache engine for a static site")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache store location
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both manifests and activate the configured version
    Install,

    /// Answer one request the way a controlled page would get it
    Fetch {
        /// Site-relative path or absolute URL
        path: String,
        /// Treat as a document navigation
        #[arg(long)]
        navigate: bool,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// Ask the active version for its release and cache name
    Version,

    /// Run the cleanup sync: delete buckets of other versions
    Cleanup,

    /// List stored buckets
    Buckets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(ref store) = cli.store {
        config.store_path = store.clone();
    }
    init_logging(config.log_config(cli.verbose));

    let result = run(cli.command, &config).await;
    if let Err(ref err) = result {
        report(err);
    }
    result
}

async fn run(command: Commands, config: &CliConfig) -> anyhow::Result<()> {
    debug!(store = %config.store_path.display(), "Opening cache store");

    let backend = SqliteBackend::open(&config.store_path)?;
    let loader = Arc::new(ResourceLoader::new(config.loader_config())?);
    let (container, mut events) = ServiceWorkerContainer::new(CacheStorage::new(backend), loader);

    match command {
        Commands::Install => {
            let id = container
                .register(config.cache.clone())
                .await
                .map_err(ShellCacheError::from)?;
            println!(
                "Installed {} as {} ({})",
                config.cache.core_cache_name(),
                id,
                config.cache.pages_cache_name()
            );
        }

        Commands::Fetch {
            path,
            navigate,
            body,
        } => {
            resume(&container, config).await?;
            let url = config.cache.resolve(&path).map_err(ShellCacheError::from)?;
            let request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };

            let outcome = container.handle_fetch(request).await;
            match outcome.disposition.as_ref().and_then(|d| d.response().map(|r| (r, d.source()))) {
                Some((response, source)) => {
                    println!("{} {}", response.status.as_u16(), response.status_text);
                    if let Some(source) = source {
                        println!("source: {:?}", source);
                    }
                    if let Some(content_type) = response.content_type() {
                        println!("content-type: {}", content_type);
                    }
                    println!("length: {}", response.body().len());
                    if body {
                        println!();
                        println!("{}", String::from_utf8_lossy(response.body()));
                    }
                }
                None => println!("passthrough: not handled by the cache"),
            }
            outcome.settled().await.map_err(ShellCacheError::from)?;
        }

        Commands::Version => {
            resume(&container, config).await?;
            let (tx, rx) = oneshot::channel();
            container
                .post_message(MessageTarget::Active, json!({ "type": "GET_VERSION" }), Some(tx))
                .await
                .map_err(ShellCacheError::from)?;
            let reply = rx.await.ok().ok_or_not_found("version reply")?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }

        Commands::Cleanup => {
            resume(&container, config).await?;
            container
                .sync(&config.cache.cleanup_sync_tag)
                .await
                .map_err(ShellCacheError::from)?;
            let deleted = deleted_buckets(&mut events);
            if deleted.is_empty() {
                println!("Nothing to delete");
            }
            for name in deleted {
                println!("Deleted {}", name);
            }
        }

        Commands::Buckets => {
            let caches = container.caches();
            let mut caches = caches.write().await;
            for name in caches.keys()? {
                let marker = if config.cache.is_current_bucket(&name) {
                    "*"
                } else {
                    " "
                };
                let entries = caches.open(&name)?.len()?;
                println!("{} {} ({} entries)", marker, name, entries);
            }
        }
    }

    Ok(())
}

/// The engine error behind a failed command, if there is one.
fn engine_error(err: &anyhow::Error) -> Option<&ShellCacheError> {
    err.chain().find_map(|e| e.downcast_ref::<ShellCacheError>())
}

fn report(err: &anyhow::Error) {
    let Some(cause) = engine_error(err) else {
        error!("{:#}", err);
        return;
    };

    error!(
        category = cause.category(),
        retryable = cause.is_retryable(),
        "{:#}",
        err
    );
    if cause.is_retryable() {
        eprintln!("This failure is transient; run the command again.");
    }
}

async fn resume(container: &ServiceWorkerContainer, config: &CliConfig) -> anyhow::Result<()> {
    container
        .resume(config.cache.clone())
        .await
        .map_err(ShellCacheError::from)
        .with_context(|| format!("run `shellcache install` first ({})", config.store_path.display()))?;
    info!(cache = %config.cache.core_cache_name(), "Serving installed version");
    Ok(())
}

fn deleted_buckets(events: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<String> {
    let mut deleted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ServiceWorkerEvent::CachesDeleted { names } = event {
            deleted.extend(names);
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellcache_net::NetError;
    use shellcache_sw::CacheError;

    #[test]
    fn test_engine_error_found_through_context() {
        let err = Err::<(), _>(CacheError::Network {
            url: "https://arabsad.com/style.css".into(),
            source: NetError::Offline,
        })
        .map_err(ShellCacheError::from)
        .context("run `shellcache install` first")
        .unwrap_err();

        let cause = engine_error(&err).unwrap();
        assert_eq!(cause.category(), "network");
        assert!(cause.is_retryable());
    }

    #[test]
    fn test_failed_install_is_not_retryable() {
        let err = anyhow::Error::from(ShellCacheError::from(CacheError::BadStatus {
            url: "https://arabsad.com/favicon.ico".into(),
            status: 404,
        }));

        let cause = engine_error(&err).unwrap();
        assert_eq!(cause.category(), "install");
        assert!(!cause.is_retryable());
    }

    #[test]
    fn test_foreign_errors_have_no_category() {
        let err = anyhow::anyhow!("stdout closed");
        assert!(engine_error(&err).is_none());
    }
}
