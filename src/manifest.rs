//! Path to checksum snapshots of a directory tree

use crate::checksum::checksum;
use crate::error::{Result, SyncError};
use crate::fs_enum::enumerate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One regular file: its `/`-separated path relative to the tree root and its digest
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub checksum: String,
}

/// Immutable snapshot of a tree, keyed by relative path.
///
/// Built fresh per request and never cached; it is stale as soon as the tree
/// changes after enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: HashMap<String, String>,
}

impl Manifest {
    /// Index decoded entries. Duplicate paths make the manifest malformed.
    pub fn from_entries(entries: Vec<FileEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.insert(entry.path.clone(), entry.checksum).is_some() {
                return Err(SyncError::MalformedManifest(format!(
                    "duplicate path {}",
                    entry.path
                )));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn checksum_of(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries sorted by path, ready for the wire
    pub fn to_entries(&self) -> Vec<FileEntry> {
        let mut out: Vec<FileEntry> = self
            .entries
            .iter()
            .map(|(path, checksum)| FileEntry {
                path: path.clone(),
                checksum: checksum.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

/// Enumerate `root` and digest every file. All-or-nothing: the first
/// enumeration or checksum failure aborts the build.
pub fn build_manifest(root: &Path) -> Result<Manifest> {
    let paths = enumerate(root)?;
    let mut entries = HashMap::with_capacity(paths.len());
    for rel in paths {
        let digest = checksum(&root.join(&rel))?;
        entries.insert(rel, digest);
    }
    Ok(Manifest { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use tempfile::TempDir;

    #[test]
    fn test_build_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let manifest = build_manifest(dir.path()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.checksum_of("a.txt"), Some(checksum_bytes(b"hello").as_str()));
        assert_eq!(manifest.checksum_of("sub/b.txt"), Some(checksum_bytes(b"world").as_str()));
        assert!(!manifest.contains("sub"));
    }

    #[test]
    fn test_missing_root_builds_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let manifest = build_manifest(&dir.path().join("fresh")).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let entries = vec![
            FileEntry { path: "a".into(), checksum: "1".into() },
            FileEntry { path: "a".into(), checksum: "2".into() },
        ];
        assert!(matches!(
            Manifest::from_entries(entries),
            Err(SyncError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_to_entries_sorted() {
        let entries = vec![
            FileEntry { path: "z".into(), checksum: "1".into() },
            FileEntry { path: "a".into(), checksum: "2".into() },
        ];
        let manifest = Manifest::from_entries(entries).unwrap();
        let paths: Vec<_> = manifest.to_entries().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["a", "z"]);
    }
}
