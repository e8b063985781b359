//! shelfctl - command-line driver for the Shelf sync engine
//!
//! Syncs the local library database against the selected backend, switches
//! backends, and prints per-backend sync status.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use shelf::{
    Backend, BackendCredentials, EngineSelector, EntitySyncStats, LibraryStore, ManagedBackend,
    RestBackend, SqliteLibraryStore, StoredSession, SyncCoordinator, SyncError, SyncOptions,
    SyncOutcome, SyncSettings,
};
use std::sync::Arc;

/// Library database filename in the Shelf config directory
const LIBRARY_FILE: &str = "library.sqlite";

#[derive(Parser)]
#[command(name = "shelfctl")]
#[command(version)]
#[command(about = "Sync your saved titles and reading progress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync with the selected backend
    Sync {
        /// Compare complete key sets instead of exchanging recent changes
        #[arg(long)]
        full: bool,

        /// Skip the pass if the last one finished within the cooldown
        #[arg(long)]
        if_due: bool,
    },

    /// Select the sync backend
    Use {
        #[arg(value_enum)]
        backend: BackendChoice,
    },

    /// Show the selected backend and when each kind last synced
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Rest,
    Managed,
    /// Stop syncing
    None,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = SyncSettings::load()?;
    let path = config::config_path(LIBRARY_FILE).context("Could not determine config directory")?;
    let store: Arc<dyn LibraryStore> = Arc::new(SqliteLibraryStore::new(&path)?);

    let backends = configured_backends(&settings)?;
    let selector = Arc::new(EngineSelector::new(store.clone()));
    if let Some(id) = selector.restore(backends.clone())? {
        info!("Restored backend selection: {}", id);
    }

    let coordinator = SyncCoordinator::new(
        store.clone(),
        selector.clone(),
        SyncOptions {
            parallel: settings.parallel,
        },
    );

    match cli.command {
        Commands::Sync { full, if_due } => {
            let outcome = if full {
                coordinator.reconcile()
            } else if if_due {
                match coordinator.sync_if_due(settings.cooldown_secs)? {
                    Some(outcome) => outcome,
                    None => {
                        println!("Synced recently; skipping");
                        return Ok(());
                    }
                }
            } else {
                coordinator.sync()
            };
            print_outcome(&outcome)
        }
        Commands::Use { backend } => {
            let chosen = match backend {
                BackendChoice::None => None,
                BackendChoice::Rest => Some(find_backend(&backends, RestBackend::ID)?),
                BackendChoice::Managed => Some(find_backend(&backends, ManagedBackend::ID)?),
            };
            selector.select(chosen)?;
            match selector.active_id() {
                Some(id) => println!("Using backend: {}", id),
                None => println!("Sync disabled"),
            }
            Ok(())
        }
        Commands::Status => {
            match selector.active_id() {
                Some(id) => {
                    println!("Backend: {}", id);
                    match coordinator.last_synced_at(&id)? {
                        Some(at) => println!("Last synced: {}", at.to_rfc3339()),
                        None => println!("Last synced: never"),
                    }
                }
                None => println!("Backend: none"),
            }
            for cursor in store.list_sync_cursors()? {
                let last = cursor
                    .last_sync_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "pending".to_string());
                println!("  {} {}: {}", cursor.backend_id, cursor.kind, last);
            }
            Ok(())
        }
    }
}

/// Build every backend with endpoints in the config
fn configured_backends(settings: &SyncSettings) -> Result<Vec<Arc<dyn Backend>>> {
    let credentials = BackendCredentials::load()?;
    if !credentials.is_available() {
        if let Some(path) = BackendCredentials::default_path() {
            warn!(
                "No sync backend configured. Either:\n\
                 1. Place backend endpoints at: {}\n\
                 2. Or set SHELF_REST_URL, or SHELF_MANAGED_URL and SHELF_MANAGED_KEY",
                path.display()
            );
        }
    }

    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
    if let Some(rest) = &credentials.rest {
        let session = StoredSession::new(RestBackend::ID, rest.refresh_endpoint())?;
        backends.push(Arc::new(RestBackend::with_page_size(
            &rest.url,
            Arc::new(session),
            settings.rest_page_size,
        )));
    }
    if let Some(managed) = &credentials.managed {
        let session = StoredSession::new(ManagedBackend::ID, managed.refresh_endpoint())?
            .with_api_key(&managed.api_key);
        backends.push(Arc::new(ManagedBackend::with_page_size(
            &managed.url,
            &managed.api_key,
            Arc::new(session),
            settings.managed_page_size,
        )));
    }
    Ok(backends)
}

fn find_backend(backends: &[Arc<dyn Backend>], id: &str) -> Result<Arc<dyn Backend>> {
    match backends.iter().find(|b| b.id() == id) {
        Some(backend) => Ok(backend.clone()),
        None => bail!("Backend '{}' has no endpoint configured", id),
    }
}

fn print_outcome(outcome: &SyncOutcome) -> Result<()> {
    let report = match outcome {
        SyncOutcome::NotConfigured => {
            println!("No backend selected; run `shelfctl use <backend>` first");
            return Ok(());
        }
        SyncOutcome::Completed(report) => report,
    };

    println!("Synced with {}", report.backend);
    print_kind("saved", &report.saved);
    print_kind("progress", &report.progress);

    if !report.is_success() {
        bail!("{} of 2 kinds failed", report.errors().len());
    }
    Ok(())
}

fn print_kind(label: &str, result: &Result<EntitySyncStats, SyncError>) {
    match result {
        Ok(stats) => println!(
            "  {:<9} {:?}: fetched {}, pushed {}, applied {}, removed {} ({}ms)",
            label,
            stats.mode,
            stats.fetched,
            stats.pushed,
            stats.applied,
            stats.deleted_locally,
            stats.duration_ms
        ),
        Err(SyncError::AuthExpired) => println!("  {:<9} session expired; sign in again", label),
        Err(e) => println!("  {:<9} failed: {}", label, e),
    }
}
