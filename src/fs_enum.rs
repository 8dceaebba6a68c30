//! Filesystem enumeration: relative paths of every regular file under a root

use crate::error::{Result, SyncError};
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path};

/// Enumerate every regular file under `root`, recursing into subdirectories.
///
/// Paths are relative to `root` and always use `/` as separator. Directories,
/// symlinks and special files are skipped. A root that does not exist yet is an
/// empty tree; any other traversal error aborts the whole enumeration.
pub fn enumerate(root: &Path) -> Result<BTreeSet<String>> {
    use walkdir::WalkDir;

    match std::fs::metadata(root) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(SyncError::io(root, e)),
        Ok(meta) if !meta.is_dir() => {
            return Err(SyncError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "root is not a directory"),
            ))
        }
        Ok(_) => {}
    }

    let mut paths = BTreeSet::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::io(path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        paths.insert(relative_key(root, entry.path())?);
    }

    Ok(paths)
}

/// Render `path` relative to `root` with `/` separators
pub fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        SyncError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path is not under root"),
        )
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => match s.to_str() {
                Some(s) => parts.push(s),
                None => {
                    return Err(SyncError::io(
                        path,
                        io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
                    ))
                }
            },
            Component::CurDir => {}
            _ => {
                return Err(SyncError::io(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "unexpected path component"),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enumerate_nested_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("x/y")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("x/b.txt"), b"b").unwrap();
        std::fs::write(root.join("x/y/c.txt"), b"c").unwrap();

        let paths: Vec<String> = enumerate(root).unwrap().into_iter().collect();
        assert_eq!(paths, vec!["a.txt", "x/b.txt", "x/y/c.txt"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(enumerate(&dir.path().join("not-yet")).unwrap().is_empty());
    }

    #[test]
    fn test_file_root_is_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(enumerate(&file), Err(SyncError::Io { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

        let paths: Vec<String> = enumerate(root).unwrap().into_iter().collect();
        assert_eq!(paths, vec!["real.txt"]);
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/srv/data");
        assert_eq!(
            relative_key(root, Path::new("/srv/data/a/b.txt")).unwrap(),
            "a/b.txt"
        );
        assert!(relative_key(root, Path::new("/elsewhere/b.txt")).is_err());
    }
}
