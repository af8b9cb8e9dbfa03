//! Crawl-and-compare reconciliation
//!
//! One pass walks the remote tree depth-first and, for every entry, decides
//! between download, upload, update, delete, or conflict by consulting three
//! states: the remote listing, the local filesystem, and the shadow database
//! of last-synced metadata. The shadow record is what disambiguates "new on
//! one side" from "deleted on the other side".
//!
//! Per directory the pass runs three phases:
//! - crawl remote children (downloads, remote-wins updates, conflicts,
//!   local-deletion propagation),
//! - crawl local files not seen remotely (remote-deletion propagation,
//!   uploads when bidirectional),
//! - crawl local folders not seen remotely (same, for directories).
//!
//! Error policy: remote failures abort the pass (every action is idempotent,
//! so the next trigger retries from scratch); local I/O failures log and
//! continue with the next entry; shadow-database failures are swallowed one
//! layer down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use cmisync_db::ShadowDatabase;
use cmisync_remote::{ContentStream, RemoteDocument, RemoteEntry, RemoteFolder};

use crate::conflict::conflict_path;
use crate::errors::{Result, SyncError};
use crate::events::SyncEvents;

/// Counts of the actions one pass performed.
///
/// A pass over already-convergent trees reports all zeros (except possibly
/// `skipped`), which is how the idempotence property is asserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Documents written to the local tree (includes conflict re-downloads).
    pub downloaded: u32,
    /// Documents and folders created on the remote.
    pub uploaded: u32,
    /// Remote documents whose content was replaced from a local change.
    pub updated: u32,
    /// Local files and folders deleted because the remote side won.
    pub local_deleted: u32,
    /// Remote documents and folders deleted because the local side won.
    pub remote_deleted: u32,
    /// Conflicts parked as `_your-version` siblings.
    pub conflicts: u32,
    /// Remote documents ignored (no content stream or no stream filename).
    pub skipped: u32,
}

impl SyncSummary {
    /// True when the pass changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.downloaded == 0
            && self.uploaded == 0
            && self.updated == 0
            && self.local_deleted == 0
            && self.remote_deleted == 0
            && self.conflicts == 0
    }
}

/// One reconciliation pass over a synced folder.
pub struct Reconciler<'a> {
    db: &'a mut ShadowDatabase,
    local_root: PathBuf,
    bidirectional: bool,
    events: Arc<dyn SyncEvents>,
    cancel: &'a AtomicBool,
    summary: SyncSummary,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        db: &'a mut ShadowDatabase,
        bidirectional: bool,
        events: Arc<dyn SyncEvents>,
        cancel: &'a AtomicBool,
    ) -> Self {
        let local_root = db.local_root().to_path_buf();
        Self {
            db,
            local_root,
            bidirectional,
            events,
            cancel,
            summary: SyncSummary::default(),
        }
    }

    /// Run the pass to completion (or until a remote failure propagates, or
    /// cancellation is observed between remote children).
    pub async fn sync(mut self, remote_root: &dyn RemoteFolder) -> Result<SyncSummary> {
        let local_root = self.local_root.clone();
        self.sync_folder(remote_root, &local_root).await?;
        Ok(self.summary)
    }

    fn cancelled(&self) -> bool {
        let cancelled = self.cancel.load(Ordering::SeqCst);
        if cancelled {
            info!("sync pass cancelled, stopping at iteration boundary");
        }
        cancelled
    }

    fn sync_folder<'s>(
        &'s mut self,
        remote: &'s dyn RemoteFolder,
        local: &'s Path,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let mut remote_file_names: HashSet<String> = HashSet::new();
            let mut remote_subfolder_names: HashSet<String> = HashSet::new();

            for entry in remote.children().await? {
                if self.cancelled() {
                    return Ok(());
                }
                match entry {
                    RemoteEntry::Folder(folder) => {
                        self.sync_remote_folder(folder.as_ref(), local, &mut remote_subfolder_names)
                            .await?
                    }
                    RemoteEntry::Document(doc) => {
                        self.sync_remote_document(doc.as_ref(), local, &mut remote_file_names)
                            .await?
                    }
                }
            }

            if self.cancelled() {
                return Ok(());
            }

            allow_local_io(self.crawl_local_files(remote, local, &remote_file_names).await)?;
            allow_local_io(self.crawl_local_folders(remote, local, &remote_subfolder_names).await)?;
            Ok(())
        })
    }

    /// Phase R, folder child.
    async fn sync_remote_folder(
        &mut self,
        remote: &dyn RemoteFolder,
        local_parent: &Path,
        remote_subfolder_names: &mut HashSet<String>,
    ) -> Result<()> {
        let name = remote.name().to_string();
        remote_subfolder_names.insert(name.clone());
        let local_sub = local_parent.join(&name);

        if local_sub.is_dir() {
            return self.sync_folder(remote, &local_sub).await;
        }

        if local_sub.is_file() {
            // A remote folder shadows a local file of the same name; the
            // remote kind wins.
            info!(path = %local_sub.display(), "local file shadowed by remote folder, removing");
            allow_local_io((|| -> Result<()> {
                std::fs::remove_file(&local_sub)?;
                self.db.remove_file(&local_sub);
                self.summary.local_deleted += 1;
                Ok(())
            })())?;
            return Ok(());
        }

        if self.db.contains_folder(&local_sub) {
            // We synced this folder before and it is gone locally: the user
            // deleted it, so the remote subtree goes too.
            info!(path = %local_sub.display(), "locally deleted folder, removing remote subtree");
            remote.delete_tree(true).await?;
            self.db.remove_folder(&local_sub);
            self.summary.remote_deleted += 1;
            return Ok(());
        }

        // New remote folder: mirror it locally and pull the whole subtree.
        debug!(path = %local_sub.display(), "new remote folder");
        allow_local_io(async {
            std::fs::create_dir_all(&local_sub)?;
            self.db.add_folder(&local_sub, remote.last_mod_time());
            self.download_children(remote, &local_sub).await
        }
        .await)
    }

    /// Phase D: pull every child of a freshly discovered remote folder.
    fn download_children<'s>(
        &'s mut self,
        remote: &'s dyn RemoteFolder,
        local: &'s Path,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            for entry in remote.children().await? {
                match entry {
                    RemoteEntry::Folder(folder) => {
                        let sub = local.join(folder.name());
                        allow_local_io(async {
                            std::fs::create_dir_all(&sub)?;
                            self.db.add_folder(&sub, folder.last_mod_time());
                            self.download_children(folder.as_ref(), &sub).await
                        }
                        .await)?;
                    }
                    RemoteEntry::Document(doc) => {
                        allow_local_io(self.download_document(doc.as_ref(), local).await)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Write a remote document into a local directory and record it.
    async fn download_document(
        &mut self,
        doc: &dyn RemoteDocument,
        local_parent: &Path,
    ) -> Result<()> {
        let Some(name) = doc.content_stream_file_name() else {
            warn!(document = doc.name(), "document has no content stream filename, skipping");
            self.summary.skipped += 1;
            return Ok(());
        };
        let target = local_parent.join(name);

        let Some(mut content) = doc.content().await? else {
            warn!(document = doc.name(), "document has no content stream, skipping");
            self.summary.skipped += 1;
            return Ok(());
        };

        // A directory squatting on the target path loses to the remote file.
        if target.is_dir() {
            info!(path = %target.display(), "local folder shadowed by remote document, removing");
            std::fs::remove_dir_all(&target)?;
            self.db.remove_folder(&target);
        }

        debug!(path = %target.display(), modified_by = ?doc.last_modified_by(), "downloading");
        let mut file = tokio::fs::File::create(&target).await?;
        tokio::io::copy(&mut content.reader, &mut file).await?;

        self.db.add_file(&target, doc.last_mod_time());
        self.summary.downloaded += 1;
        Ok(())
    }

    /// Phase R, document child.
    async fn sync_remote_document(
        &mut self,
        doc: &dyn RemoteDocument,
        local_parent: &Path,
        remote_file_names: &mut HashSet<String>,
    ) -> Result<()> {
        let Some(name) = doc.content_stream_file_name() else {
            // Not added to the remote name set either: the local-crawl phase
            // must not mistake an unrelated file for this document.
            warn!(document = doc.name(), "document has no content stream filename, skipping");
            self.summary.skipped += 1;
            return Ok(());
        };
        let name = name.to_string();
        remote_file_names.insert(name.clone());
        let file_path = local_parent.join(&name);

        if file_path.is_file() {
            let Some(db_mod_time) = self.db.server_mod_time(&file_path) else {
                // Present locally but unknown to us: take the remote version.
                debug!(path = %file_path.display(), "file unknown to shadow database, downloading");
                return allow_local_io(self.download_document(doc, local_parent).await);
            };

            if let Some(remote_mod_time) = doc.last_mod_time() {
                if remote_mod_time > db_mod_time {
                    if self.db.local_file_has_changed(&file_path) {
                        allow_local_io(self.handle_conflict(doc, local_parent, &file_path).await)?;
                    } else {
                        debug!(path = %file_path.display(), "remote changed, downloading");
                        allow_local_io(self.download_document(doc, local_parent).await)?;
                    }
                    // Either branch recorded the new server mod time via the
                    // download's shadow upsert.
                }
                // remote_mod_time <= db_mod_time: nothing to do server-side;
                // a local change is handled by the local-files phase.
            }
            return Ok(());
        }

        if self.db.contains_file(&file_path) {
            // We synced this file before and it is gone locally: the user
            // deleted it, so the remote document goes too.
            info!(path = %file_path.display(), "locally deleted file, removing remote document");
            doc.delete_all_versions().await?;
            self.db.remove_file(&file_path);
            self.summary.remote_deleted += 1;
            return Ok(());
        }

        debug!(path = %file_path.display(), "new remote document");
        allow_local_io(self.download_document(doc, local_parent).await)
    }

    /// Both sides changed: park the local copy, take the remote, notify.
    async fn handle_conflict(
        &mut self,
        doc: &dyn RemoteDocument,
        local_parent: &Path,
        file_path: &Path,
    ) -> Result<()> {
        let saved_as = conflict_path(file_path);
        std::fs::rename(file_path, &saved_as)?;
        warn!(
            path = %file_path.display(),
            saved_as = %saved_as.display(),
            "conflict: local copy parked, taking remote version"
        );

        self.download_document(doc, local_parent).await?;
        self.summary.conflicts += 1;
        self.events.on_conflict(file_path, &saved_as);
        Ok(())
    }

    /// Phase LF: local files the remote listing did not mention.
    async fn crawl_local_files(
        &mut self,
        remote: &dyn RemoteFolder,
        local: &Path,
        remote_file_names: &HashSet<String>,
    ) -> Result<()> {
        for entry in std::fs::read_dir(local)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if !remote_file_names.contains(&name) {
                if self.db.contains_file(&path) {
                    // Known to us, gone remotely: the remote delete wins.
                    info!(path = %path.display(), "remotely deleted file, removing local copy");
                    allow_local_io((|| -> Result<()> {
                        std::fs::remove_file(&path)?;
                        self.db.remove_file(&path);
                        self.summary.local_deleted += 1;
                        Ok(())
                    })())?;
                } else if self.bidirectional {
                    allow_local_io(self.upload_file(remote, &path).await)?;
                }
            } else if self.bidirectional && self.db.local_file_has_changed(&path) {
                allow_local_io(self.update_file(remote, &path, &name).await)?;
            }
        }
        Ok(())
    }

    /// Upload a local file as a new remote document.
    async fn upload_file(&mut self, remote: &dyn RemoteFolder, path: &Path) -> Result<()> {
        let content = match ContentStream::from_file(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file vanished before upload");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let name = content.file_name.clone();

        debug!(path = %path.display(), mime = %content.mime_type, "uploading new document");
        match remote.create_document(content).await {
            Ok(doc) => {
                self.db.add_file(path, doc.last_mod_time());
                self.summary.uploaded += 1;
                Ok(())
            }
            Err(e) if e.is_local_vanished() => {
                warn!(path = %path.display(), "file vanished during upload, reverting");
                self.revert_partial_create(remote, &name).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The local file disappeared mid-upload; if the server kept a partial
    /// document, delete all its versions so nothing half-written survives.
    async fn revert_partial_create(&mut self, remote: &dyn RemoteFolder, name: &str) -> Result<()> {
        for entry in remote.children().await? {
            if let RemoteEntry::Document(doc) = entry {
                if doc.name() == name {
                    doc.delete_all_versions().await?;
                    debug!(name, "partial document reverted");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Push changed local content into the matching remote document.
    async fn update_file(
        &mut self,
        remote: &dyn RemoteFolder,
        path: &Path,
        name: &str,
    ) -> Result<()> {
        let mut target: Option<Box<dyn RemoteDocument>> = None;
        for entry in remote.children().await? {
            if let RemoteEntry::Document(doc) = entry {
                if doc.content_stream_file_name() == Some(name) {
                    target = Some(doc);
                    break;
                }
            }
        }
        let Some(doc) = target else {
            // Listing raced a remote delete; the next cycle sorts it out.
            debug!(path = %path.display(), "document no longer listed remotely, leaving for next cycle");
            return Ok(());
        };

        let content = match ContentStream::from_file(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file vanished before update");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "uploading changed content");
        match doc.set_content(content, true).await {
            Ok(new_mod_time) => {
                self.db.add_file(path, new_mod_time);
                self.summary.updated += 1;
                Ok(())
            }
            Err(e) if e.is_local_vanished() => {
                debug!(path = %path.display(), "file vanished during update");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Phase LD: local directories the remote listing did not mention.
    async fn crawl_local_folders(
        &mut self,
        remote: &dyn RemoteFolder,
        local: &Path,
        remote_subfolder_names: &HashSet<String>,
    ) -> Result<()> {
        for entry in std::fs::read_dir(local)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if remote_subfolder_names.contains(&name) {
                continue;
            }

            if self.db.contains_folder(&path) {
                // Known to us, gone remotely: the remote delete wins.
                info!(path = %path.display(), "remotely deleted folder, removing local copy");
                allow_local_io((|| -> Result<()> {
                    std::fs::remove_dir_all(&path)?;
                    self.db.remove_folder(&path);
                    self.summary.local_deleted += 1;
                    Ok(())
                })())?;
            } else if self.bidirectional {
                debug!(path = %path.display(), "creating remote folder");
                let created = remote.create_folder(&name).await?;
                self.db.add_folder(&path, created.last_mod_time());
                self.summary.uploaded += 1;
                // The subtree's contents go up on the next cycle.
            }
        }
        Ok(())
    }
}

/// Local disk trouble with one entry must not kill the pass.
fn allow_local_io(result: Result<()>) -> Result<()> {
    match result {
        Err(SyncError::Io(e)) => {
            warn!(error = %e, "local I/O error, continuing with next entry");
            Ok(())
        }
        other => other,
    }
}
