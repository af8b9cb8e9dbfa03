//! Conflict file naming
//!
//! A conflicting local file is parked as a sibling so both versions survive:
//! `report.txt` becomes `report.txt_your-version`, then
//! `report.txt_your-version (1)` and so on if that name is taken too.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The sibling path a conflicting local file is renamed to.
pub fn conflict_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_your-version");
    suffix_if_present(PathBuf::from(name))
}

/// Return `path` unchanged when nothing exists there, otherwise `path (1)`,
/// `path (2)`, and so on: the smallest positive integer making the name free.
pub fn suffix_if_present(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let mut n: u32 = 1;
    loop {
        let mut name = OsString::from(path.as_os_str());
        name.push(format!(" ({n})"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
