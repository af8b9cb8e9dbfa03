use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use cmisync_engine::{SyncEvents, SyncWorker};
use cmisync_remote::RemoteConnector;

mod config;

use config::{Config, FolderEntry};

#[derive(Parser)]
#[command(name = "cmisync")]
#[command(about = "Two-way folder synchronization with CMIS content repositories", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a folder for synchronization
    Add {
        /// Name to register the folder under
        name: String,

        /// Local directory to keep in sync
        #[arg(long)]
        path: PathBuf,

        /// AtomPub endpoint URL
        #[arg(long)]
        url: String,

        /// Repository user
        #[arg(long)]
        user: String,

        /// Repository password
        #[arg(long)]
        password: String,

        /// Repository id
        #[arg(long, default_value = "-default-")]
        repository: String,

        /// Remote folder path to sync against
        #[arg(long, default_value = "/")]
        remote_path: String,

        /// Push local additions and modifications to the remote
        #[arg(long)]
        bidirectional: bool,
    },

    /// Unregister a folder
    Remove {
        /// Registered folder name
        name: String,
    },

    /// List registered folders
    List,

    /// Run one sync pass for a registered folder
    Sync {
        /// Registered folder name
        name: String,
    },

    /// Run continuous sync for every registered folder
    Daemon,
}

/// Conflict notifications for a terminal user.
struct CliEvents;

impl SyncEvents for CliEvents {
    fn on_conflict(&self, local_path: &Path, saved_as: &Path) {
        eprintln!(
            "CONFLICT: {} was modified both locally and remotely.\n\
             Your version was saved as {}; the remote version won the original name.\n\
             Please merge the two by hand.",
            local_path.display(),
            saved_as.display()
        );
    }
}

/// The wire-level AtomPub binding ships as a separate crate; a session
/// factory must be wired here before the sync commands work outside of
/// library embeddings.
fn atompub_connector() -> Result<Arc<dyn RemoteConnector>> {
    // TODO: wire the AtomPub binding crate's connector once it is published.
    bail!("no AtomPub connector is bundled with this build")
}

fn worker_for(entry: &FolderEntry) -> Result<Arc<SyncWorker>> {
    if !entry.local_path.is_dir() {
        bail!(
            "Local path {} does not exist or is not a directory",
            entry.local_path.display()
        );
    }
    let connector = atompub_connector()?;
    Ok(Arc::new(SyncWorker::new(
        entry.to_sync_config(),
        connector,
        Arc::new(CliEvents),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Add {
            name,
            path,
            url,
            user,
            password,
            repository,
            remote_path,
            bidirectional,
        } => {
            let local_path = path
                .canonicalize()
                .with_context(|| format!("Local path {} not found", path.display()))?;
            if !local_path.is_dir() {
                bail!("{} is not a directory", local_path.display());
            }

            let mut config = Config::load()?;
            config.add_folder(FolderEntry {
                canonical_name: name.clone(),
                local_path,
                remote_folder_path: remote_path,
                url,
                user,
                password,
                repository_id: repository,
                bidirectional,
                poll_interval_secs: 300,
            })?;
            config.save()?;
            println!("Registered folder '{name}'");
        }

        Commands::Remove { name } => {
            let mut config = Config::load()?;
            let removed = config.remove_folder(&name)?;
            config.save()?;
            println!(
                "Unregistered folder '{name}' ({})",
                removed.local_path.display()
            );
        }

        Commands::List => {
            let config = Config::load()?;
            if config.folders.is_empty() {
                println!("No folders registered");
            }
            for folder in &config.folders {
                println!(
                    "{}: {} <-> {}{} ({})",
                    folder.canonical_name,
                    folder.local_path.display(),
                    folder.url,
                    folder.remote_folder_path,
                    if folder.bidirectional {
                        "bidirectional"
                    } else {
                        "download-only"
                    }
                );
            }
        }

        Commands::Sync { name } => {
            let config = Config::load()?;
            let entry = config
                .folder(&name)
                .with_context(|| format!("No folder named '{name}' is registered"))?;
            let worker = worker_for(entry)?;
            let summary = worker.sync_once().await?;
            println!(
                "Synced '{name}': {} downloaded, {} uploaded, {} updated, \
                 {} deleted locally, {} deleted remotely, {} conflicts",
                summary.downloaded,
                summary.uploaded,
                summary.updated,
                summary.local_deleted,
                summary.remote_deleted,
                summary.conflicts
            );
        }

        Commands::Daemon => {
            let config = Config::load()?;
            if config.folders.is_empty() {
                bail!("No folders registered; add one first");
            }

            let mut handles = Vec::new();
            for entry in &config.folders {
                match worker_for(entry) {
                    Ok(worker) => {
                        let interval = Duration::from_secs(entry.poll_interval_secs);
                        handles.push(tokio::spawn(worker.run(interval)));
                    }
                    Err(e) => {
                        warn!(folder = %entry.canonical_name, error = %e, "skipping folder");
                    }
                }
            }
            if handles.is_empty() {
                bail!("No folder could be started");
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    Ok(())
}
