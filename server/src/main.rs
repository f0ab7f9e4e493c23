//! # assetcat-server
//!
//! Runs the catalog source loader.
//!
//! Every replica parses and watches the configured source files. Unless
//! started with `--read-only`, the replica also competes for leadership and,
//! while leader, reconciles the asset store against the sources.
//!
//! ## Usage
//!
//! ```bash
//! # Watch and reconcile model and MCP server sources
//! assetcat-server --model-config base.yaml --model-config overrides.yaml \
//!     --mcp-config mcp.yaml serve
//!
//! # Print the merged source view
//! assetcat-server --model-config base.yaml,overrides.yaml sources
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use assetcat::provider::{AssetKind, ProviderRegistry};
use assetcat::sources::{merge_all, read_sources, CatalogSource};
use assetcat::store::{default_database_path, AssetStore, MemoryAssetStore, SqliteAssetStore};
use assetcat::{run_leader_election, ChangeMonitor, Loader, LoaderConfig, StandaloneLock, SubLoader};

#[derive(Debug, Parser)]
#[command(name = "assetcat-server")]
#[command(about = "Watches catalog sources and reconciles assets while leader")]
#[command(version)]
struct Args {
    /// Model source file; later files override earlier ones.
    #[arg(
        long = "model-config",
        env = "ASSETCAT_MODEL_CONFIG",
        value_delimiter = ',',
        global = true
    )]
    model_config: Vec<PathBuf>,

    /// MCP server source file; later files override earlier ones.
    #[arg(long = "mcp-config", env = "ASSETCAT_MCP_CONFIG", value_delimiter = ',', global = true)]
    mcp_config: Vec<PathBuf>,

    /// SQLite database file. Defaults to ~/.assetcat/data/assetcat.db.
    #[arg(long, env = "ASSETCAT_DATABASE", conflicts_with = "in_memory")]
    database: Option<PathBuf>,

    /// Keep assets in memory instead of SQLite.
    #[arg(long)]
    in_memory: bool,

    /// Never attempt leadership; only keep the source views current.
    #[arg(long, env = "ASSETCAT_READ_ONLY")]
    read_only: bool,

    /// Leadership poll interval in milliseconds.
    #[arg(long, default_value = "1000")]
    leader_poll_ms: u64,

    /// Bound on waiting for in-flight writes, in milliseconds.
    #[arg(long, default_value = "10000")]
    drain_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the loader (default).
    Serve,
    /// Print the merged sources of the given files as YAML.
    Sources,
}

impl Args {
    fn config_paths(&self) -> Vec<(AssetKind, Vec<PathBuf>)> {
        [
            (AssetKind::Model, &self.model_config),
            (AssetKind::McpServer, &self.mcp_config),
        ]
        .into_iter()
        .filter(|(_, paths)| !paths.is_empty())
        .map(|(kind, paths)| (kind, paths.clone()))
        .collect()
    }
}

fn init_logging(format: LogFormat) -> Result<()> {
    tracing_log::LogTracer::init().context("Failed to bridge log records")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_target(false)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        ),
    };
    installed.context("Failed to install tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    let kinds = args.config_paths();
    if kinds.is_empty() {
        bail!("No source files given; pass --model-config and/or --mcp-config");
    }

    match args.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => serve(&args, kinds).await,
        Commands::Sources => print_sources(kinds),
    }
}

fn print_sources(kinds: Vec<(AssetKind, Vec<PathBuf>)>) -> Result<()> {
    let mut view: BTreeMap<&str, Vec<CatalogSource>> = BTreeMap::new();
    for (kind, paths) in kinds {
        let merged: BTreeMap<String, CatalogSource> =
            merge_all(&paths, read_sources).into_iter().collect();
        view.insert(kind.catalog_key(), merged.into_values().collect());
    }
    print!("{}", serde_yaml::to_string(&view)?);
    Ok(())
}

/// Opens the store, builds one sub-loader per kind and loads every source
/// file in read-only mode. `database` of `None` selects the in-memory store.
async fn start_loader(
    args: &Args,
    kinds: Vec<(AssetKind, Vec<PathBuf>)>,
    database: Option<&Path>,
) -> assetcat::Result<(Arc<ChangeMonitor>, Loader)> {
    let monitor = Arc::new(ChangeMonitor::new()?);

    let store: Arc<dyn AssetStore> = match database {
        Some(path) => {
            info!(path = %path.display(), "Opening asset database");
            Arc::new(SqliteAssetStore::open(path)?)
        }
        None => {
            info!("Using in-memory asset store");
            Arc::new(MemoryAssetStore::new())
        }
    };

    let subs = kinds
        .into_iter()
        .map(|(kind, paths)| {
            let providers = ProviderRegistry::with_defaults(kind, Some(Arc::clone(&monitor)));
            SubLoader::new(kind, paths, providers, Arc::clone(&store))
        })
        .collect();
    let loader = Loader::new(
        Arc::clone(&monitor),
        subs,
        LoaderConfig {
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
        },
    );

    if let Err(e) = loader.start_read_only().await {
        monitor.close();
        return Err(e.into());
    }
    Ok((monitor, loader))
}

async fn serve(args: &Args, kinds: Vec<(AssetKind, Vec<PathBuf>)>) -> Result<()> {
    let database = if args.in_memory {
        None
    } else {
        match args.database.clone().or_else(default_database_path) {
            Some(path) => Some(path),
            None => bail!("Cannot determine a home directory; pass --database"),
        }
    };

    let (monitor, loader) = start_loader(args, kinds, database.as_deref())
        .await
        .context("Failed to start loader")?;
    info!(state = %loader.state(), "Loader started");

    let shutdown = CancellationToken::new();
    let election = if args.read_only {
        info!("Read-only mode, not competing for leadership");
        None
    } else {
        Some(tokio::spawn(run_leader_election(
            loader.clone(),
            Arc::new(StandaloneLock::new()),
            Duration::from_millis(args.leader_poll_ms),
            shutdown.clone(),
        )))
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    shutdown.cancel();
    loader.shutdown().await;
    if let Some(election) = election {
        let _ = election.await;
    }
    monitor.close();
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_split_comma_delimited_paths() {
        let args = Args::try_parse_from([
            "assetcat-server",
            "--model-config",
            "a.yaml,b.yaml",
            "--model-config",
            "c.yaml",
            "sources",
        ])
        .unwrap();
        assert_eq!(args.model_config.len(), 3);
        assert!(matches!(args.command, Some(Commands::Sources)));

        let kinds = args.config_paths();
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].0, AssetKind::Model);
    }

    #[test]
    fn test_database_conflicts_with_in_memory() {
        let result = Args::try_parse_from([
            "assetcat-server",
            "--mcp-config",
            "m.yaml",
            "--database",
            "x.db",
            "--in-memory",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_loader_reports_bad_source_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let sources = dir.path().join("sources.yaml");
        std::fs::write(&sources, "catalogs: [").unwrap();

        let args = Args::try_parse_from(["assetcat-server", "--in-memory"]).unwrap();
        let err = start_loader(&args, vec![(AssetKind::Model, vec![sources])], None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, assetcat::CatalogError::Loader(_)));
    }

    #[tokio::test]
    async fn test_start_loader_in_memory() {
        let dir = tempfile::TempDir::new().unwrap();
        let sources = dir.path().join("sources.yaml");
        std::fs::write(&sources, "catalogs:\n  - id: s1\n    type: yaml\n").unwrap();

        let args = Args::try_parse_from(["assetcat-server", "--in-memory"]).unwrap();
        let (monitor, loader) = start_loader(&args, vec![(AssetKind::Model, vec![sources])], None)
            .await
            .unwrap();
        assert!(loader.sources(AssetKind::Model).contains_key("s1"));

        loader.shutdown().await;
        monitor.close();
    }
}
