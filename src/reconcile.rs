//! Checksum-based diff between a local tree and a remote manifest

use crate::checksum::checksum;
use crate::error::Result;
use crate::fs_enum::enumerate;
use crate::manifest::Manifest;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// How a path compares across the two trees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Local only
    New,
    /// On both sides with differing digests
    Changed,
    /// On both sides with equal digests
    Unchanged,
    /// Remote only
    Stale,
}

/// Result of one reconciliation. Fully computed before any transfer starts and
/// never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Relative paths to send (New and Changed)
    pub to_send: BTreeSet<String>,
    /// Remote paths to delete, already joined with the destination root
    pub to_delete: BTreeSet<String>,
    pub new_files: usize,
    pub changed_files: usize,
    pub unchanged_files: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_send.is_empty() && self.to_delete.is_empty()
    }
}

/// Classify one local path against the remote manifest.
///
/// The local digest is only computed when the remote side has the path too.
pub fn classify(local_root: &Path, rel: &str, remote: &Manifest) -> Result<Classification> {
    match remote.checksum_of(rel) {
        None => Ok(Classification::New),
        Some(remote_sum) => {
            let local_sum = checksum(&local_root.join(rel))?;
            if local_sum == remote_sum {
                Ok(Classification::Unchanged)
            } else {
                Ok(Classification::Changed)
            }
        }
    }
}

/// Compute what must be sent to and deleted from `dest_root` so the remote
/// tree matches `local_root`.
///
/// Enumeration failures abort. A local file that cannot be digested is
/// scheduled for sending so its failure surfaces on its own transfer.
pub fn reconcile(local_root: &Path, remote: &Manifest, dest_root: &str) -> Result<SyncPlan> {
    let local = enumerate(local_root)?;
    let mut plan = SyncPlan::default();
    let mut visited: HashSet<&str> = HashSet::with_capacity(local.len());

    for rel in &local {
        if remote.contains(rel) {
            visited.insert(rel.as_str());
        }
        let class = match classify(local_root, rel, remote) {
            Ok(class) => class,
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "local checksum failed, scheduling send");
                Classification::Changed
            }
        };
        match class {
            Classification::New => {
                plan.new_files += 1;
                plan.to_send.insert(rel.clone());
            }
            Classification::Changed => {
                plan.changed_files += 1;
                plan.to_send.insert(rel.clone());
            }
            Classification::Unchanged => plan.unchanged_files += 1,
            Classification::Stale => {}
        }
    }

    for rel in remote.paths() {
        if !visited.contains(rel) {
            plan.to_delete.insert(remote_join(dest_root, rel));
        }
    }

    Ok(plan)
}

/// Join a relative path onto the remote destination root with `/`
pub fn remote_join(dest_root: &str, rel: &str) -> String {
    if dest_root.is_empty() {
        return rel.to_string();
    }
    let base = dest_root.trim_end_matches('/');
    if base.is_empty() {
        format!("/{}", rel)
    } else {
        format!("{}/{}", base, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use crate::manifest::{build_manifest, FileEntry};
    use tempfile::TempDir;

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        Manifest::from_entries(
            entries
                .iter()
                .map(|(p, c)| FileEntry {
                    path: p.to_string(),
                    checksum: c.to_string(),
                })
                .collect(),
        )
        .unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_file_against_empty_remote() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let plan = reconcile(dir.path(), &Manifest::default(), "dest").unwrap();
        assert_eq!(plan.to_send, set(&["a.txt"]));
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.new_files, 1);
    }

    #[test]
    fn test_unchanged_file_needs_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let hello = checksum_bytes(b"hello");

        let plan = reconcile(dir.path(), &manifest(&[("a.txt", &hello)]), "dest").unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged_files, 1);
    }

    #[test]
    fn test_changed_file_is_sent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let plan = reconcile(dir.path(), &manifest(&[("a.txt", "0000")]), "dest").unwrap();
        assert_eq!(plan.to_send, set(&["a.txt"]));
        assert_eq!(plan.changed_files, 1);
    }

    #[test]
    fn test_stale_remote_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let plan = reconcile(dir.path(), &manifest(&[("old.txt", "anything")]), "dest").unwrap();
        assert!(plan.to_send.is_empty());
        assert_eq!(plan.to_delete, set(&["dest/old.txt"]));
    }

    #[test]
    fn test_tree_against_own_manifest_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("d/e")).unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();
        std::fs::write(dir.path().join("d/b"), b"2").unwrap();
        std::fs::write(dir.path().join("d/e/c"), b"3").unwrap();

        let own = build_manifest(dir.path()).unwrap();
        assert!(reconcile(dir.path(), &own, "/remote").unwrap().is_empty());
    }

    #[test]
    fn test_disjoint_trees() {
        let local = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        std::fs::write(local.path().join("l1"), b"x").unwrap();
        std::fs::create_dir_all(local.path().join("ld")).unwrap();
        std::fs::write(local.path().join("ld/l2"), b"y").unwrap();
        std::fs::write(remote.path().join("r1"), b"x").unwrap();

        let remote_manifest = build_manifest(remote.path()).unwrap();
        let plan = reconcile(local.path(), &remote_manifest, "/srv/out/").unwrap();
        assert_eq!(plan.to_send, set(&["l1", "ld/l2"]));
        assert_eq!(plan.to_delete, set(&["/srv/out/r1"]));
    }

    #[test]
    fn test_classify_skips_checksum_for_new_paths() {
        // The path does not exist locally; a New classification must not try to read it
        let dir = TempDir::new().unwrap();
        assert_eq!(
            classify(dir.path(), "ghost.txt", &Manifest::default()).unwrap(),
            Classification::New
        );
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("dest", "a/b.txt"), "dest/a/b.txt");
        assert_eq!(remote_join("dest/", "a.txt"), "dest/a.txt");
        assert_eq!(remote_join("/", "a.txt"), "/a.txt");
        assert_eq!(remote_join("", "a.txt"), "a.txt");
    }
}
