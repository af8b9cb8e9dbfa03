//! Streaming content checksums
//!
//! The checksum is only ever compared for equality against a value this same
//! engine wrote, so any stable hash works; blake3 is fast enough to hash on
//! every change check.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Hash the entire content of a local file, returning lowercase hex.
///
/// Reads through a fixed-size buffer so files larger than memory are fine.
/// Fails with the underlying `io::Error` when the file disappears or becomes
/// unreadable mid-hash; the upload path treats `NotFound` as "file vanished".
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; BUF_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stable_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"some file content").unwrap();

        let first = checksum_file(&path).unwrap();
        let second = checksum_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_differs_on_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"version one").unwrap();
        let before = checksum_file(&path).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b" and more").unwrap();
        drop(f);

        assert_ne!(before, checksum_file(&path).unwrap());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = checksum_file(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
