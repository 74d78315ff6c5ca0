//! vitrine: text-to-image product search
//!
//! Vitrine ranks a catalog of product images against a free-text query using
//! pre-computed embeddings stored in S3, and serves the results as a small
//! web page.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vitrine_search::{
    Catalog, Gallery, HttpEncoder, HttpFetcher, S3Presigner, SearchResponse, SearchResultItem,
    SearchServer, ServerConfig, SharedFetcher, SharedResolver, TableCache, TableLoader,
    UrlResolver, caption_for,
};

use crate::config::Config;

/// Text-to-image product search over pre-computed embeddings
#[derive(Parser)]
#[command(name = "vitrine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .vitrine directory or config file (default: search for .vitrine/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the catalog and model, then serve the search page
    Serve {
        /// Host to bind to (default: [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (default: [server] port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run a single query and print the ranked results
    Search {
        /// Query text
        query: String,

        /// Number of results (default: [ui] default_k)
        #[arg(short)]
        k: Option<usize>,

        /// Print JSON with presigned image URLs
        #[arg(long)]
        json: bool,
    },

    /// Print a presigned GET URL for an s3:// location
    Presign {
        /// Object location (s3://bucket/key)
        location: String,

        /// URL lifetime in seconds (default: [catalog] url_expiration_secs)
        #[arg(long)]
        expires: Option<u64>,
    },

    /// Initialize a new .vitrine directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging for one-shot commands.
/// Logs to stderr so stdout stays clean for results.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging for the server.
/// Logs to rotating files in .vitrine/logs/ with daily rotation.
fn init_file_logging(vitrine_dir: &std::path::Path, verbose: bool) {
    let logs_dir = vitrine_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        // Fall back to stderr logging
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "vitrine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load config from an explicit path or auto-discover `.vitrine/config.toml`.
///
/// Returns the config and the `.vitrine` directory it came from, if any.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(config::CONFIG_FILE)
        } else {
            path.clone()
        };
        let vitrine_dir = config_file.parent().unwrap_or(path).to_path_buf();
        let config = Config::from_file(&config_file)?;
        return Ok((config, Some(vitrine_dir)));
    }

    match Config::find_and_load() {
        Ok(Some((config, vitrine_dir))) => Ok((config, Some(vitrine_dir))),
        Ok(None) => Ok((Config::default(), None)),
        Err(e) => Err(e.context("Error searching for .vitrine/config.toml")),
    }
}

/// Fail with every validation error at once.
fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        tracing::error!(field = %error.field, "{}", error.message);
    }
    let summary: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    anyhow::bail!("Invalid configuration:\n  {}", summary.join("\n  "))
}

/// Storage plumbing shared by every command.
struct Storage {
    resolver: SharedResolver,
    fetcher: SharedFetcher,
}

impl Storage {
    fn from_config(config: &Config) -> Result<Self> {
        let presigner = S3Presigner::new(config.storage.presign_config())
            .context("Failed to configure storage presigner")?;
        let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
        Ok(Self {
            resolver: Arc::new(presigner),
            fetcher: Arc::new(fetcher),
        })
    }

    fn table_cache(&self, config: &Config) -> TableCache {
        TableCache::new(
            TableLoader::new(self.resolver.clone(), self.fetcher.clone())
                .with_layout(config.catalog.layout())
                .with_expiration(config.catalog.url_expiration()),
        )
    }

    fn gallery(&self, config: &Config) -> Gallery {
        Gallery::new(self.resolver.clone(), self.fetcher.clone())
            .with_expiration(config.catalog.url_expiration())
    }
}

/// Load the table and the model. Either failing is fatal.
/// Result count for `search`, held to the same bounds as the HTTP API.
fn search_k(config: &Config, k: Option<usize>) -> Result<usize> {
    Ok(config.ui.check_k(k)?)
}

async fn load_catalog(config: &Config, tables: &TableCache) -> Result<Catalog> {
    let table = tables
        .load(&config.catalog.table)
        .await
        .with_context(|| format!("Failed to load embedding table {}", config.catalog.table))?;

    let encoder = HttpEncoder::load(config.model.encoder_config())
        .await
        .context("Failed to load text encoder")?;

    let catalog = Catalog::new(table, Arc::new(encoder))
        .context("Text encoder does not match the embedding table")?;
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_dir) = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let vitrine_dir = config_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(config::VITRINE_DIR));
            init_file_logging(&vitrine_dir, cli.verbose);

            match &config_dir {
                Some(dir) => info!("Loaded config from {}", dir.display()),
                None => info!("No .vitrine/config.toml found, using defaults"),
            }
            ensure_valid(&config)?;

            let addr = config.server.bind_addr(host.as_deref(), port)?;
            let storage = Storage::from_config(&config)?;
            let tables = Arc::new(storage.table_cache(&config));

            // Table and model load before the listener binds.
            let catalog = load_catalog(&config, &tables).await?;
            info!(
                rows = catalog.table().len(),
                dim = catalog.table().dim(),
                model = catalog.encoder().name(),
                "Catalog ready"
            );

            let server_config = ServerConfig::new(addr)
                .with_cors(config.server.enable_cors)
                .with_ui(config.ui.clone());
            let server = SearchServer::new(
                server_config,
                config.catalog.table.clone(),
                tables,
                catalog.encoder().clone(),
                storage.gallery(&config),
            );

            println!("Vitrine listening on http://{}", addr);
            server
                .run_with_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await
                .context("Search server failed")?;
            info!("Search server stopped");
        }

        Commands::Search { query, k, json } => {
            init_logging(cli.verbose);
            ensure_valid(&config)?;

            let k = search_k(&config, k)?;
            let storage = Storage::from_config(&config)?;
            let tables = storage.table_cache(&config);
            let catalog = load_catalog(&config, &tables).await?;
            let matches = catalog.query(&query, k).await?;

            if json {
                let gallery = storage.gallery(&config);
                let results = matches
                    .into_iter()
                    .enumerate()
                    .map(|(position, m)| SearchResultItem {
                        rank: position + 1,
                        index: m.index,
                        caption: caption_for(&m.id).to_string(),
                        url: gallery.link(&m.id).ok(),
                        id: m.id,
                        score: m.score,
                    })
                    .collect();
                let response = SearchResponse { query, k, results };
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("Top products found for you:");
                for (position, m) in matches.iter().enumerate() {
                    println!(
                        "{:>3}. {:.3}  {:<20} {}",
                        position + 1,
                        m.score,
                        caption_for(&m.id),
                        m.id
                    );
                }
            }
        }

        Commands::Presign { location, expires } => {
            init_logging(cli.verbose);

            let presigner = S3Presigner::new(config.storage.presign_config())
                .context("Failed to configure storage presigner")?;
            let expires = expires
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.catalog.url_expiration());
            let url = presigner
                .resolve(&location, expires)
                .with_context(|| format!("Failed to presign {}", location))?;
            println!("{}", url);
        }

        Commands::Init { force } => {
            init_logging(cli.verbose);
            use config::{CONFIG_FILE, DEFAULT_CONFIG, VITRINE_DIR};

            let vitrine_dir = PathBuf::from(VITRINE_DIR);
            let config_path = vitrine_dir.join(CONFIG_FILE);

            if config_path.exists() && !force {
                anyhow::bail!(".vitrine/config.toml already exists. Use --force to overwrite.");
            }

            if !vitrine_dir.exists() {
                std::fs::create_dir_all(&vitrine_dir)?;
                info!("Created {}/", vitrine_dir.display());
            }

            std::fs::write(&config_path, DEFAULT_CONFIG)?;
            info!("Created {}", config_path.display());

            println!("\nNext steps:");
            println!("  1. Edit .vitrine/config.toml to point [catalog] table at your embeddings");
            println!("  2. Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY");
            println!("  3. Start an embeddings server for [model] id");
            println!("  4. Run: vitrine serve");
        }
    }

    Ok(())
}
