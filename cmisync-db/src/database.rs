//! Persistent mapping of normalized paths to last-synced metadata
//!
//! One database file per synced folder, created lazily next to the folder as
//! `<localRoot>.cmissync`. Two tables: `files` (path, server modification
//! date, checksum) and `folders` (path, server modification date). A path is
//! present in at most one of the two at any time.
//!
//! Write failures are logged and swallowed; the pass continues and the next
//! cycle re-attempts. Read failures are logged and answered with the
//! conservative default (`None` / `false`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::checksum::checksum_file;
use crate::errors::{Result, ShadowDbError};
use crate::normalize::normalize;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    serverSideModificationDate DATE,
    checksum TEXT
);
CREATE TABLE IF NOT EXISTS folders (
    path TEXT PRIMARY KEY,
    serverSideModificationDate DATE
);
"#;

/// Shadow database handle.
///
/// Owns its SQLite connection exclusively; all access happens on the sync
/// worker that opened it. The same database file must never be opened by two
/// workers.
pub struct ShadowDatabase {
    conn: Connection,
    local_root: PathBuf,
}

impl ShadowDatabase {
    /// Open (creating on first use) the database for a synced folder at its
    /// default location, `<localRoot>.cmissync`.
    pub fn open(local_root: impl Into<PathBuf>) -> Result<Self> {
        let local_root = local_root.into();
        let db_path = Self::default_path(&local_root);
        Self::open_at(local_root, &db_path)
    }

    /// Open the database at an explicit path.
    pub fn open_at(local_root: impl Into<PathBuf>, db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self {
            conn,
            local_root: local_root.into(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory(local_root: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            local_root: local_root.into(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Sibling file the database lives in for a given sync root.
    pub fn default_path(local_root: &Path) -> PathBuf {
        let mut os = local_root.as_os_str().to_os_string();
        os.push(".cmissync");
        PathBuf::from(os)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        debug!(root = %self.local_root.display(), "shadow database ready");
        Ok(())
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    fn key(&self, absolute: &Path) -> Result<String> {
        normalize(&self.local_root, absolute)
    }

    /// Record a file as synchronized: hash its current content and upsert the
    /// row with the server's modification timestamp.
    pub fn add_file(&mut self, absolute: &Path, server_mod_time: Option<DateTime<Utc>>) {
        if let Err(e) = self.try_add_file(absolute, server_mod_time) {
            warn!(path = %absolute.display(), error = %e, "failed to record file");
        }
    }

    fn try_add_file(&mut self, absolute: &Path, server_mod_time: Option<DateTime<Utc>>) -> Result<()> {
        let key = self.key(absolute)?;
        let checksum = checksum_file(absolute)?;
        let tx = self.conn.transaction()?;
        // A path lives in at most one of the two tables.
        tx.execute("DELETE FROM folders WHERE path = ?1", params![key])?;
        tx.execute(
            r#"
            INSERT INTO files (path, serverSideModificationDate, checksum)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                serverSideModificationDate = excluded.serverSideModificationDate,
                checksum = excluded.checksum
            "#,
            params![key, server_mod_time.map(|t| t.to_rfc3339()), checksum],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record a folder as synchronized.
    pub fn add_folder(&mut self, absolute: &Path, server_mod_time: Option<DateTime<Utc>>) {
        if let Err(e) = self.try_add_folder(absolute, server_mod_time) {
            warn!(path = %absolute.display(), error = %e, "failed to record folder");
        }
    }

    fn try_add_folder(&mut self, absolute: &Path, server_mod_time: Option<DateTime<Utc>>) -> Result<()> {
        let key = self.key(absolute)?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![key])?;
        tx.execute(
            r#"
            INSERT INTO folders (path, serverSideModificationDate)
            VALUES (?1, ?2)
            ON CONFLICT(path) DO UPDATE SET
                serverSideModificationDate = excluded.serverSideModificationDate
            "#,
            params![key, server_mod_time.map(|t| t.to_rfc3339())],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Forget a file. No-op when the row is absent.
    pub fn remove_file(&mut self, absolute: &Path) {
        if let Err(e) = self.try_remove_file(absolute) {
            warn!(path = %absolute.display(), error = %e, "failed to remove file record");
        }
    }

    fn try_remove_file(&mut self, absolute: &Path) -> Result<()> {
        let key = self.key(absolute)?;
        self.conn
            .execute("DELETE FROM files WHERE path = ?1", params![key])?;
        Ok(())
    }

    /// Forget a folder and cascade over everything beneath it: every file and
    /// folder row whose key starts with `key + "/"` goes in the same
    /// transaction.
    pub fn remove_folder(&mut self, absolute: &Path) {
        if let Err(e) = self.try_remove_folder(absolute) {
            warn!(path = %absolute.display(), error = %e, "failed to remove folder record");
        }
    }

    fn try_remove_folder(&mut self, absolute: &Path) -> Result<()> {
        let key = self.key(absolute)?;
        let pattern = descendant_pattern(&key);
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM folders WHERE path = ?1", params![key])?;
        tx.execute(
            r"DELETE FROM folders WHERE path LIKE ?1 ESCAPE '\'",
            params![pattern],
        )?;
        tx.execute(
            r"DELETE FROM files WHERE path LIKE ?1 ESCAPE '\'",
            params![pattern],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Last-known server modification timestamp for a file, or `None` when
    /// the file was never synced (or the read fails).
    pub fn server_mod_time(&self, absolute: &Path) -> Option<DateTime<Utc>> {
        match self.try_server_mod_time(absolute) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %absolute.display(), error = %e, "failed to read server mod time");
                None
            }
        }
    }

    fn try_server_mod_time(&self, absolute: &Path) -> Result<Option<DateTime<Utc>>> {
        let key = self.key(absolute)?;
        let stored: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT serverSideModificationDate FROM files WHERE path = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match stored.flatten() {
            None => Ok(None),
            Some(s) => {
                let parsed = DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| ShadowDbError::InvalidTimestamp(s))?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
        }
    }

    /// Update the stored server modification timestamp of an existing file
    /// row. No-op when the row is absent.
    pub fn set_file_server_mod_time(&mut self, absolute: &Path, server_mod_time: Option<DateTime<Utc>>) {
        let result = self.key(absolute).and_then(|key| {
            self.conn
                .execute(
                    "UPDATE files SET serverSideModificationDate = ?2 WHERE path = ?1",
                    params![key, server_mod_time.map(|t| t.to_rfc3339())],
                )
                .map_err(ShadowDbError::from)
        });
        if let Err(e) = result {
            warn!(path = %absolute.display(), error = %e, "failed to update server mod time");
        }
    }

    pub fn contains_file(&self, absolute: &Path) -> bool {
        self.contains(absolute, "files")
    }

    pub fn contains_folder(&self, absolute: &Path) -> bool {
        self.contains(absolute, "folders")
    }

    fn contains(&self, absolute: &Path, table: &str) -> bool {
        let result = self.key(absolute).and_then(|key| {
            self.conn
                .query_row(
                    &format!("SELECT 1 FROM {table} WHERE path = ?1"),
                    params![key],
                    |_| Ok(()),
                )
                .optional()
                .map_err(ShadowDbError::from)
        });
        match result {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!(path = %absolute.display(), error = %e, "failed to read shadow record");
                false
            }
        }
    }

    /// Whether the file's current content differs from the checksum recorded
    /// at the last sync. `true` when no record exists at all.
    pub fn local_file_has_changed(&self, absolute: &Path) -> bool {
        let stored = match self.try_stored_checksum(absolute) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %absolute.display(), error = %e, "failed to read stored checksum");
                return false;
            }
        };
        let Some(stored) = stored else {
            debug!(path = %absolute.display(), "no stored checksum, treating as changed");
            return true;
        };
        match checksum_file(absolute) {
            Ok(current) => current != stored,
            Err(e) => {
                warn!(path = %absolute.display(), error = %e, "failed to hash local file");
                false
            }
        }
    }

    fn try_stored_checksum(&self, absolute: &Path) -> Result<Option<String>> {
        let key = self.key(absolute)?;
        let stored: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT checksum FROM files WHERE path = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.flatten())
    }
}

/// LIKE pattern matching every key strictly below `key`.
fn descendant_pattern(key: &str) -> String {
    let mut pattern = String::with_capacity(key.len() + 2);
    for c in key.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str("/%");
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture() -> (tempfile::TempDir, ShadowDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = ShadowDatabase::open_in_memory(dir.path()).unwrap();
        (dir, db)
    }

    fn stamp(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_default_path_is_sibling_file() {
        let path = ShadowDatabase::default_path(Path::new("/home/user/Docs"));
        assert_eq!(path, PathBuf::from("/home/user/Docs.cmissync"));
    }

    #[test]
    fn test_add_and_query_file() {
        let (dir, mut db) = fixture();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        assert!(!db.contains_file(&file));
        db.add_file(&file, Some(stamp(0)));
        assert!(db.contains_file(&file));
        assert_eq!(db.server_mod_time(&file), Some(stamp(0)));
        assert!(!db.local_file_has_changed(&file));
    }

    #[test]
    fn test_change_detection() {
        let (dir, mut db) = fixture();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"v1").unwrap();

        // Never synced: counts as changed.
        assert!(db.local_file_has_changed(&file));

        db.add_file(&file, Some(stamp(0)));
        assert!(!db.local_file_has_changed(&file));

        std::fs::write(&file, b"v2").unwrap();
        assert!(db.local_file_has_changed(&file));
    }

    #[test]
    fn test_set_server_mod_time_noop_when_absent() {
        let (dir, mut db) = fixture();
        let file = dir.path().join("a.txt");
        db.set_file_server_mod_time(&file, Some(stamp(5)));
        assert_eq!(db.server_mod_time(&file), None);
    }

    #[test]
    fn test_path_in_at_most_one_table() {
        let (dir, mut db) = fixture();
        let entry = dir.path().join("thing");
        std::fs::write(&entry, b"bytes").unwrap();

        db.add_file(&entry, Some(stamp(0)));
        db.add_folder(&entry, Some(stamp(1)));
        assert!(!db.contains_file(&entry));
        assert!(db.contains_folder(&entry));

        db.add_file(&entry, Some(stamp(2)));
        assert!(db.contains_file(&entry));
        assert!(!db.contains_folder(&entry));
    }

    #[test]
    fn test_remove_folder_cascades() {
        let (dir, mut db) = fixture();
        let folder = dir.path().join("A");
        let sub = folder.join("B");
        std::fs::create_dir_all(&sub).unwrap();
        let f1 = folder.join("x.txt");
        let f2 = sub.join("y.txt");
        std::fs::write(&f1, b"x").unwrap();
        std::fs::write(&f2, b"y").unwrap();
        let outside = dir.path().join("AB.txt");
        std::fs::write(&outside, b"z").unwrap();

        db.add_folder(&folder, Some(stamp(0)));
        db.add_folder(&sub, Some(stamp(0)));
        db.add_file(&f1, Some(stamp(1)));
        db.add_file(&f2, Some(stamp(2)));
        db.add_file(&outside, Some(stamp(3)));

        db.remove_folder(&folder);

        assert!(!db.contains_folder(&folder));
        assert!(!db.contains_folder(&sub));
        assert!(!db.contains_file(&f1));
        assert!(!db.contains_file(&f2));
        // Prefix match is on "A/", not "A": sibling survives.
        assert!(db.contains_file(&outside));
    }

    #[test]
    fn test_cascade_does_not_eat_like_wildcards() {
        let (dir, mut db) = fixture();
        let folder = dir.path().join("a_b");
        std::fs::create_dir_all(&folder).unwrap();
        let sibling = dir.path().join("aXb");
        std::fs::create_dir_all(&sibling).unwrap();
        let kept = sibling.join("keep.txt");
        std::fs::write(&kept, b"k").unwrap();

        db.add_folder(&folder, None);
        db.add_folder(&sibling, None);
        db.add_file(&kept, None);

        db.remove_folder(&folder);
        assert!(db.contains_folder(&sibling));
        assert!(db.contains_file(&kept));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("synced");
        std::fs::create_dir(&root).unwrap();
        let file = root.join("a.txt");
        std::fs::write(&file, b"content").unwrap();
        let db_path = dir.path().join("state.cmissync");

        {
            let mut db = ShadowDatabase::open_at(&root, &db_path).unwrap();
            db.add_file(&file, Some(stamp(0)));
        }
        let db = ShadowDatabase::open_at(&root, &db_path).unwrap();
        assert!(db.contains_file(&file));
        assert_eq!(db.server_mod_time(&file), Some(stamp(0)));
    }
}
