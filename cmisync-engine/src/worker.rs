//! Background sync worker
//!
//! One worker per registered folder. Triggers collapse through a
//! single-flight flag: however often `sync_in_background` fires, at most one
//! pass runs at a time, and a trigger during a pass is simply dropped (the
//! next trigger starts a fresh pass). Session creation retries indefinitely
//! with a fixed back-off; an established session is cached across passes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cmisync_db::ShadowDatabase;
use cmisync_remote::{RemoteConnector, RemoteRepository, SessionParams};

use crate::errors::{Result, SyncError};
use crate::events::SyncEvents;
use crate::reconciler::{Reconciler, SyncSummary};

/// Everything the worker needs to know about one registered folder.
#[derive(Debug, Clone)]
pub struct SyncFolderConfig {
    pub canonical_name: String,
    pub local_path: PathBuf,
    pub remote_folder_path: String,
    pub session: SessionParams,
    /// When disabled the engine only downloads; local additions and
    /// modifications stay local.
    pub bidirectional: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Back-off between failed session attempts.
    pub retry_delay: Duration,
    /// Override for the shadow database location; defaults to the sibling
    /// `<localRoot>.cmissync` file.
    pub database_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
            database_path: None,
        }
    }
}

/// Background worker owning one folder's session and shadow database.
pub struct SyncWorker {
    folder: SyncFolderConfig,
    config: WorkerConfig,
    connector: Arc<dyn RemoteConnector>,
    events: Arc<dyn SyncEvents>,
    syncing: AtomicBool,
    cancel: AtomicBool,
    session: Mutex<Option<Arc<dyn RemoteRepository>>>,
    db: Mutex<Option<ShadowDatabase>>,
}

impl SyncWorker {
    pub fn new(
        folder: SyncFolderConfig,
        connector: Arc<dyn RemoteConnector>,
        events: Arc<dyn SyncEvents>,
    ) -> Self {
        Self::with_config(folder, WorkerConfig::default(), connector, events)
    }

    pub fn with_config(
        folder: SyncFolderConfig,
        config: WorkerConfig,
        connector: Arc<dyn RemoteConnector>,
        events: Arc<dyn SyncEvents>,
    ) -> Self {
        Self {
            folder,
            config,
            connector,
            events,
            syncing: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            session: Mutex::new(None),
            db: Mutex::new(None),
        }
    }

    pub fn folder(&self) -> &SyncFolderConfig {
        &self.folder
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Ask the running pass to stop at its next iteration boundary.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Spawn one pass in the background unless one is already running.
    /// Returns whether a pass was started.
    pub fn sync_in_background(self: Arc<Self>) -> bool {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!(folder = %self.folder.canonical_name, "sync already in progress, trigger dropped");
            return false;
        }

        let worker = self;
        tokio::spawn(async move {
            worker.events.started();
            match worker.sync_once().await {
                Ok(summary) => {
                    info!(folder = %worker.folder.canonical_name, ?summary, "sync pass finished")
                }
                Err(e) => {
                    warn!(folder = %worker.folder.canonical_name, error = %e, "sync pass aborted")
                }
            }
            worker.events.stopped();
            worker.syncing.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Run one reconciliation pass on the caller's task.
    pub async fn sync_once(&self) -> Result<SyncSummary> {
        let repo = self.connect().await?;

        match repo.change_capability().await {
            Ok(capability) if capability.supports_feed() => {
                debug!(?capability, "repository has a change log");
                // TODO: incremental change-log sync (initial full copy plus
                // change-token persistence); the crawl pass below stays
                // authoritative until that lands.
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "change-log capability probe failed"),
        }

        let result = self.crawl(repo.as_ref()).await;

        self.cancel.store(false, Ordering::SeqCst);
        if matches!(result, Err(SyncError::Remote(_))) {
            // The session may be stale; re-establish it on the next trigger.
            self.session.lock().await.take();
        }
        result
    }

    async fn crawl(&self, repo: &dyn RemoteRepository) -> Result<SyncSummary> {
        let root = repo.folder_by_path(&self.folder.remote_folder_path).await?;

        let mut db_guard = self.db.lock().await;
        if db_guard.is_none() {
            *db_guard = Some(match &self.config.database_path {
                Some(path) => ShadowDatabase::open_at(&self.folder.local_path, path)?,
                None => ShadowDatabase::open(&self.folder.local_path)?,
            });
        }
        let db = db_guard.as_mut().expect("shadow database initialized above");

        let reconciler = Reconciler::new(db, self.folder.bidirectional, self.events.clone(), &self.cancel);
        reconciler.sync(root.as_ref()).await
    }

    /// Establish (or reuse) the repository session, retrying runtime
    /// failures indefinitely with the configured back-off.
    async fn connect(&self) -> Result<Arc<dyn RemoteRepository>> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }

        loop {
            match self.connector.open_session(&self.folder.session).await {
                Ok(session) => {
                    info!(folder = %self.folder.canonical_name, "session established");
                    *cached = Some(session.clone());
                    return Ok(session);
                }
                Err(e) if e.is_runtime() => {
                    warn!(
                        folder = %self.folder.canonical_name,
                        error = %e,
                        delay = ?self.config.retry_delay,
                        "session creation failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Periodic trigger loop for daemon mode. Extra ticks during a pass
    /// collapse into the single-flight guard.
    pub async fn run(self: Arc<Self>, trigger_interval: Duration) {
        let mut interval = tokio::time::interval(trigger_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            folder = %self.folder.canonical_name,
            interval = ?trigger_interval,
            "sync worker running"
        );
        loop {
            interval.tick().await;
            self.clone().sync_in_background();
        }
    }
}
