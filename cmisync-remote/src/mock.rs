//! In-memory repository for testing
//!
//! Backs the engine's integration tests: a folder/document tree behind a
//! mutex, a deterministic logical clock for server modification timestamps,
//! and a counter of every write the engine performs through the traits
//! (test-helper mutations bypass it, so "zero writes on the second pass" is
//! directly observable).

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::AsyncReadExt;

use crate::errors::{RemoteError, Result};
use crate::repository::{
    ChangeCapability, ContentStream, RemoteConnector, RemoteDocument, RemoteEntry, RemoteFolder,
    RemoteRepository,
};
use crate::session::SessionParams;

const ROOT_ID: u64 = 0;
const CLOCK_EPOCH: i64 = 1_700_000_000;

struct Node {
    parent: Option<u64>,
    name: String,
    mod_time: DateTime<Utc>,
    kind: NodeKind,
}

enum NodeKind {
    Folder { children: Vec<u64> },
    Document {
        content: Option<Vec<u8>>,
        stream_name: Option<String>,
        modified_by: String,
    },
}

struct MockState {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    clock: i64,
    write_ops: u64,
    capability: ChangeCapability,
    failing_uploads: u32,
}

impl MockState {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            Node {
                parent: None,
                name: String::new(),
                mod_time: Utc.timestamp_opt(CLOCK_EPOCH, 0).unwrap(),
                kind: NodeKind::Folder { children: Vec::new() },
            },
        );
        Self {
            nodes,
            next_id: 1,
            clock: 0,
            write_ops: 0,
            capability: ChangeCapability::None,
            failing_uploads: 0,
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(CLOCK_EPOCH + self.clock, 0).unwrap()
    }

    fn resolve(&self, path: &str) -> Option<u64> {
        let mut id = ROOT_ID;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            id = self.child_by_name(id, segment)?;
        }
        Some(id)
    }

    fn child_by_name(&self, folder: u64, name: &str) -> Option<u64> {
        match &self.nodes.get(&folder)?.kind {
            NodeKind::Folder { children } => children
                .iter()
                .copied()
                .find(|id| self.nodes.get(id).map(|n| n.name.as_str()) == Some(name)),
            NodeKind::Document { .. } => None,
        }
    }

    fn insert(&mut self, parent: u64, name: String, mod_time: DateTime<Utc>, kind: NodeKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, Node { parent: Some(parent), name, mod_time, kind });
        if let Some(Node { kind: NodeKind::Folder { children }, .. }) = self.nodes.get_mut(&parent) {
            children.push(id);
        }
        id
    }

    fn detach(&mut self, id: u64) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(Node { kind: NodeKind::Folder { children }, .. }) = self.nodes.get_mut(&parent) {
                children.retain(|c| *c != id);
            }
        }
    }

    fn remove_subtree(&mut self, id: u64) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                if let NodeKind::Folder { children } = node.kind {
                    stack.extend(children);
                }
            }
        }
    }

    fn path_of(&self, id: u64) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = &self.nodes[&c];
            if c != ROOT_ID {
                segments.push(node.name.clone());
            }
            current = node.parent;
        }
        segments.reverse();
        segments.join("/")
    }
}

/// In-memory remote repository.
#[derive(Clone)]
pub struct MockRepository {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRepository {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(MockState::new())) }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Create a folder (and any missing parents). Test setup only; does not
    /// count as an engine write.
    pub fn add_folder(&self, path: &str) {
        let mut state = self.lock();
        let mut id = ROOT_ID;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            id = match state.child_by_name(id, segment) {
                Some(existing) => existing,
                None => {
                    let t = state.tick();
                    state.insert(id, segment.to_string(), t, NodeKind::Folder { children: Vec::new() })
                }
            };
        }
    }

    /// Create a document with content, stream name = basename.
    pub fn add_document(&self, path: &str, content: &[u8]) {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        self.add_document_full(path, Some(content), Some(&name));
    }

    /// Create a document with explicit content and stream-name knobs
    /// (`stream_name: None` models servers that expose no content filename).
    pub fn add_document_full(&self, path: &str, content: Option<&[u8]>, stream_name: Option<&str>) {
        let (parent_path, name) = match path.rfind('/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => ("", path),
        };
        self.add_folder(parent_path);
        let mut state = self.lock();
        let parent = state.resolve(parent_path).expect("parent just created");
        let t = state.tick();
        state.insert(
            parent,
            name.to_string(),
            t,
            NodeKind::Document {
                content: content.map(|c| c.to_vec()),
                stream_name: stream_name.map(|s| s.to_string()),
                modified_by: "tester".to_string(),
            },
        );
    }

    /// Replace a document's content, bumping its server mod time. Simulates
    /// a remote-side edit.
    pub fn set_document_content(&self, path: &str, content: &[u8]) {
        let mut state = self.lock();
        let id = state.resolve(path).expect("document exists");
        let t = state.tick();
        let node = state.nodes.get_mut(&id).unwrap();
        node.mod_time = t;
        if let NodeKind::Document { content: c, .. } = &mut node.kind {
            *c = Some(content.to_vec());
        }
    }

    /// Remove an entry (and its subtree). Simulates a remote-side delete.
    pub fn remove(&self, path: &str) {
        let mut state = self.lock();
        if let Some(id) = state.resolve(path) {
            state.detach(id);
            state.remove_subtree(id);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().resolve(path).is_some()
    }

    pub fn document_content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let id = state.resolve(path)?;
        match &state.nodes.get(&id)?.kind {
            NodeKind::Document { content, .. } => content.clone(),
            NodeKind::Folder { .. } => None,
        }
    }

    pub fn mod_time(&self, path: &str) -> Option<DateTime<Utc>> {
        let state = self.lock();
        let id = state.resolve(path)?;
        Some(state.nodes.get(&id)?.mod_time)
    }

    /// Every entry path in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        let state = self.lock();
        let mut paths: Vec<String> = state
            .nodes
            .keys()
            .filter(|id| **id != ROOT_ID)
            .map(|id| state.path_of(*id))
            .collect();
        paths.sort();
        paths
    }

    /// Number of mutations performed through the remote traits.
    pub fn write_ops(&self) -> u64 {
        self.lock().write_ops
    }

    pub fn set_change_capability(&self, capability: ChangeCapability) {
        self.lock().capability = capability;
    }

    /// Make the next `n` document content transfers fail as if the local
    /// file vanished mid-upload, leaving the partially created document
    /// behind.
    pub fn fail_uploads(&self, n: u32) {
        self.lock().failing_uploads = n;
    }

    pub fn advance_clock(&self, secs: i64) {
        self.lock().clock += secs;
    }

    fn folder_handle(&self, id: u64) -> Result<Box<dyn RemoteFolder>> {
        let state = self.lock();
        let node = state
            .nodes
            .get(&id)
            .ok_or_else(|| RemoteError::Base("object no longer exists".to_string()))?;
        Ok(Box::new(MockFolder {
            repo: self.clone(),
            id,
            name: node.name.clone(),
            mod_time: node.mod_time,
        }))
    }
}

#[async_trait]
impl RemoteRepository for MockRepository {
    async fn folder_by_path(&self, path: &str) -> Result<Box<dyn RemoteFolder>> {
        let id = {
            let state = self.lock();
            let id = state
                .resolve(path)
                .ok_or_else(|| RemoteError::Base(format!("no such folder: {path}")))?;
            match state.nodes[&id].kind {
                NodeKind::Folder { .. } => id,
                NodeKind::Document { .. } => {
                    return Err(RemoteError::Base(format!("not a folder: {path}")))
                }
            }
        };
        self.folder_handle(id)
    }

    async fn change_capability(&self) -> Result<ChangeCapability> {
        Ok(self.lock().capability)
    }
}

/// Folder handle; metadata is a snapshot from fetch time.
pub struct MockFolder {
    repo: MockRepository,
    id: u64,
    name: String,
    mod_time: DateTime<Utc>,
}

#[async_trait]
impl RemoteFolder for MockFolder {
    fn name(&self) -> &str {
        &self.name
    }

    fn last_mod_time(&self) -> Option<DateTime<Utc>> {
        Some(self.mod_time)
    }

    async fn children(&self) -> Result<Vec<RemoteEntry>> {
        let state = self.repo.lock();
        let node = state
            .nodes
            .get(&self.id)
            .ok_or_else(|| RemoteError::Base("folder no longer exists".to_string()))?;
        let NodeKind::Folder { children } = &node.kind else {
            return Err(RemoteError::Base("not a folder".to_string()));
        };

        let mut ids: Vec<u64> = children.clone();
        ids.sort_by_key(|id| state.nodes[id].name.clone());

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let child = &state.nodes[&id];
            match &child.kind {
                NodeKind::Folder { .. } => entries.push(RemoteEntry::Folder(Box::new(MockFolder {
                    repo: self.repo.clone(),
                    id,
                    name: child.name.clone(),
                    mod_time: child.mod_time,
                }))),
                NodeKind::Document { content, stream_name, modified_by } => {
                    entries.push(RemoteEntry::Document(Box::new(MockDocument {
                        repo: self.repo.clone(),
                        id,
                        name: child.name.clone(),
                        stream_name: stream_name.clone(),
                        mod_time: child.mod_time,
                        modified_by: modified_by.clone(),
                        has_content: content.is_some(),
                    })))
                }
            }
        }
        Ok(entries)
    }

    async fn create_folder(&self, name: &str) -> Result<Box<dyn RemoteFolder>> {
        let id = {
            let mut state = self.repo.lock();
            if state.child_by_name(self.id, name).is_some() {
                return Err(RemoteError::Base(format!("name already exists: {name}")));
            }
            let t = state.tick();
            let id = state.insert(self.id, name.to_string(), t, NodeKind::Folder { children: Vec::new() });
            state.write_ops += 1;
            id
        };
        self.repo.folder_handle(id)
    }

    async fn create_document(&self, mut content: ContentStream) -> Result<Box<dyn RemoteDocument>> {
        // Register the (empty) document before transferring content, so a
        // failed transfer leaves a partial document behind, as real servers
        // do.
        let (id, fail) = {
            let mut state = self.repo.lock();
            if state.child_by_name(self.id, &content.file_name).is_some() {
                return Err(RemoteError::Base(format!(
                    "name already exists: {}",
                    content.file_name
                )));
            }
            let t = state.tick();
            let id = state.insert(
                self.id,
                content.file_name.clone(),
                t,
                NodeKind::Document {
                    content: Some(Vec::new()),
                    stream_name: Some(content.file_name.clone()),
                    modified_by: "cmisync".to_string(),
                },
            );
            state.write_ops += 1;
            let fail = if state.failing_uploads > 0 {
                state.failing_uploads -= 1;
                true
            } else {
                false
            };
            (id, fail)
        };

        if fail {
            return Err(RemoteError::LocalContent(io::Error::new(
                io::ErrorKind::NotFound,
                "local file vanished during upload",
            )));
        }

        let mut buf = Vec::new();
        if let Err(e) = content.reader.read_to_end(&mut buf).await {
            return Err(RemoteError::LocalContent(e));
        }

        let handle = {
            let mut state = self.repo.lock();
            let node = state.nodes.get_mut(&id).unwrap();
            if let NodeKind::Document { content: c, .. } = &mut node.kind {
                *c = Some(buf);
            }
            MockDocument {
                repo: self.repo.clone(),
                id,
                name: content.file_name.clone(),
                stream_name: Some(content.file_name),
                mod_time: node.mod_time,
                modified_by: "cmisync".to_string(),
                has_content: true,
            }
        };
        Ok(Box::new(handle))
    }

    async fn delete_tree(&self, _continue_on_failure: bool) -> Result<()> {
        let mut state = self.repo.lock();
        if !state.nodes.contains_key(&self.id) {
            return Err(RemoteError::Base("folder no longer exists".to_string()));
        }
        state.detach(self.id);
        state.remove_subtree(self.id);
        state.write_ops += 1;
        Ok(())
    }
}

/// Document handle; metadata is a snapshot from fetch time.
pub struct MockDocument {
    repo: MockRepository,
    id: u64,
    name: String,
    stream_name: Option<String>,
    mod_time: DateTime<Utc>,
    modified_by: String,
    has_content: bool,
}

#[async_trait]
impl RemoteDocument for MockDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_stream_file_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    fn last_mod_time(&self) -> Option<DateTime<Utc>> {
        Some(self.mod_time)
    }

    fn last_modified_by(&self) -> Option<&str> {
        Some(&self.modified_by)
    }

    async fn content(&self) -> Result<Option<ContentStream>> {
        if !self.has_content {
            return Ok(None);
        }
        let state = self.repo.lock();
        let node = state
            .nodes
            .get(&self.id)
            .ok_or_else(|| RemoteError::Base("document no longer exists".to_string()))?;
        let NodeKind::Document { content, stream_name, .. } = &node.kind else {
            return Err(RemoteError::Base("not a document".to_string()));
        };
        let Some(bytes) = content.clone() else {
            return Ok(None);
        };
        let file_name = stream_name.clone().unwrap_or_else(|| node.name.clone());
        Ok(Some(ContentStream::from_bytes(
            file_name,
            "application/octet-stream",
            bytes,
        )))
    }

    async fn set_content(
        &self,
        mut content: ContentStream,
        _overwrite: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        let fail = {
            let mut state = self.repo.lock();
            if state.failing_uploads > 0 {
                state.failing_uploads -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(RemoteError::LocalContent(io::Error::new(
                io::ErrorKind::NotFound,
                "local file vanished during upload",
            )));
        }

        let mut buf = Vec::new();
        if let Err(e) = content.reader.read_to_end(&mut buf).await {
            return Err(RemoteError::LocalContent(e));
        }

        let mut state = self.repo.lock();
        let t = state.tick();
        let node = state
            .nodes
            .get_mut(&self.id)
            .ok_or_else(|| RemoteError::Base("document no longer exists".to_string()))?;
        node.mod_time = t;
        if let NodeKind::Document { content: c, .. } = &mut node.kind {
            *c = Some(buf);
        }
        state.write_ops += 1;
        Ok(Some(t))
    }

    async fn delete_all_versions(&self) -> Result<()> {
        let mut state = self.repo.lock();
        if !state.nodes.contains_key(&self.id) {
            return Err(RemoteError::Base("document no longer exists".to_string()));
        }
        state.detach(self.id);
        state.remove_subtree(self.id);
        state.write_ops += 1;
        Ok(())
    }
}

/// Connector that optionally refuses the first N attempts with a runtime
/// error, for exercising the connect retry loop.
pub struct MockConnector {
    repo: Arc<MockRepository>,
    failures_remaining: AtomicU32,
}

impl MockConnector {
    pub fn new(repo: Arc<MockRepository>) -> Self {
        Self { repo, failures_remaining: AtomicU32::new(0) }
    }

    pub fn failing(repo: Arc<MockRepository>, failures: u32) -> Self {
        Self { repo, failures_remaining: AtomicU32::new(failures) }
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn open_session(&self, _params: &SessionParams) -> Result<Arc<dyn RemoteRepository>> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteError::Runtime("connection refused".to_string()));
        }
        Ok(self.repo.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tree_building_and_listing() {
        let repo = MockRepository::new();
        repo.add_document("A/x.txt", b"hello");
        repo.add_folder("A/B");

        let root = repo.folder_by_path("/").await.unwrap();
        let children = root.children().await.unwrap();
        assert_eq!(children.len(), 1);

        let a = repo.folder_by_path("/A").await.unwrap();
        let children = a.children().await.unwrap();
        assert_eq!(children.len(), 2);

        assert_eq!(repo.document_content("A/x.txt").unwrap(), b"hello");
        assert_eq!(repo.write_ops(), 0);
    }

    #[tokio::test]
    async fn test_create_document_counts_writes() {
        let repo = MockRepository::new();
        let root = repo.folder_by_path("/").await.unwrap();
        let doc = root
            .create_document(ContentStream::from_bytes("new.txt", "text/plain", b"data".to_vec()))
            .await
            .unwrap();
        assert_eq!(doc.name(), "new.txt");
        assert_eq!(repo.document_content("new.txt").unwrap(), b"data");
        assert_eq!(repo.write_ops(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_partial_document() {
        let repo = MockRepository::new();
        repo.fail_uploads(1);
        let root = repo.folder_by_path("/").await.unwrap();
        let result = root
            .create_document(ContentStream::from_bytes("new.txt", "text/plain", b"data".to_vec()))
            .await;
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected create_document to fail"),
        };
        assert!(err.is_local_vanished());
        // The half-created document is still listed, like a real server.
        assert!(repo.contains("new.txt"));
    }

    #[tokio::test]
    async fn test_delete_tree_removes_subtree() {
        let repo = MockRepository::new();
        repo.add_document("A/B/deep.txt", b"d");
        let a = repo.folder_by_path("/A").await.unwrap();
        a.delete_tree(true).await.unwrap();
        assert!(!repo.contains("A"));
        assert!(!repo.contains("A/B/deep.txt"));
    }

    #[tokio::test]
    async fn test_remote_edit_bumps_mod_time() {
        let repo = MockRepository::new();
        repo.add_document("x.txt", b"v1");
        let before = repo.mod_time("x.txt").unwrap();
        repo.set_document_content("x.txt", b"v2");
        assert!(repo.mod_time("x.txt").unwrap() > before);
    }

    #[tokio::test]
    async fn test_connector_fails_then_succeeds() {
        let repo = Arc::new(MockRepository::new());
        let connector = MockConnector::failing(repo, 2);
        let params = SessionParams::new("http://localhost/atom", "u", "p", "repo");
        match connector.open_session(&params).await {
            Err(e) => assert!(e.is_runtime()),
            Ok(_) => panic!("expected open_session to fail"),
        }
        match connector.open_session(&params).await {
            Err(e) => assert!(e.is_runtime()),
            Ok(_) => panic!("expected open_session to fail"),
        }
        assert!(connector.open_session(&params).await.is_ok());
    }
}
