//! File access capability.
//!
//! The policy document and the control surface may live behind a privileged
//! channel (root shell, helper daemon). Everything that touches them goes
//! through [`FileAccess`] so the mechanism can be swapped and tested.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Read/write access to whole files.
pub trait FileAccess: Send + Sync {
    /// Read the entire file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the entire file content. Readers must never observe a
    /// partially written file.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Create a directory and all of its parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Type alias for shared file access.
pub type FileAccessRef = Arc<dyn FileAccess>;

/// Local filesystem access with atomic replace-by-rename writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileAccess;

impl FileAccess for StdFileAccess {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Unique sibling per write; concurrent writers never share a temp file
        let mut prefix = std::ffi::OsString::from(".");
        prefix.push(file_name);
        prefix.push(".");
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(directory)?;

        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

/// In-memory file access for testing.
///
/// Records every write and can be told to fail reads or writes.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    writes: Mutex<Vec<PathBuf>>,
    directories: Mutex<HashSet<PathBuf>>,
    failing_writes: Mutex<HashMap<PathBuf, usize>>,
    unreadable: Mutex<HashSet<PathBuf>>,
    read_only_dirs: Mutex<HashSet<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        lock(&self.files).insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.files).remove(path)
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    /// File content as UTF-8, if present.
    pub fn read_string(&self, path: &Path) -> Option<String> {
        self.contents(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Number of successful writes to `path`.
    pub fn write_count(&self, path: &Path) -> usize {
        lock(&self.writes).iter().filter(|p| *p == path).count()
    }

    /// Make the next `count` writes to `path` fail.
    pub fn fail_writes(&self, path: impl Into<PathBuf>, count: usize) {
        lock(&self.failing_writes).insert(path.into(), count);
    }

    /// Make reads of `path` fail with permission denied.
    pub fn set_unreadable(&self, path: impl Into<PathBuf>, unreadable: bool) {
        let path = path.into();
        let mut set = lock(&self.unreadable);
        if unreadable {
            set.insert(path);
        } else {
            set.remove(&path);
        }
    }

    /// Make `create_dir_all` fail for `path`.
    pub fn set_read_only_dir(&self, path: impl Into<PathBuf>, read_only: bool) {
        let path = path.into();
        let mut set = lock(&self.read_only_dirs);
        if read_only {
            set.insert(path);
        } else {
            set.remove(&path);
        }
    }

    pub fn has_directory(&self, path: &Path) -> bool {
        lock(&self.directories).contains(path)
    }
}

impl FileAccess for MemoryFiles {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        if lock(&self.unreadable).contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"));
        }
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        {
            let mut failing = lock(&self.failing_writes);
            if let Some(remaining) = failing.get_mut(path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
                }
            }
        }
        lock(&self.files).insert(path.to_path_buf(), contents.to_vec());
        lock(&self.writes).push(path.to_path_buf());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if lock(&self.read_only_dirs).contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        lock(&self.directories).insert(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_std_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mode.txt");

        StdFileAccess.write(&path, b"balance").unwrap();
        StdFileAccess.write(&path, b"fast").unwrap();

        assert_eq!(StdFileAccess.read(&path).unwrap(), b"fast");
        // No temp file left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("mode.txt")]);
    }

    #[test]
    fn test_std_concurrent_writes_stay_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        let contents: Vec<Vec<u8>> = (0..8)
            .map(|i| format!("{{\"writer\": {i}, \"pad\": \"{}\"}}", "x".repeat(4096)).into_bytes())
            .collect();

        std::thread::scope(|scope| {
            for body in &contents {
                let path = &path;
                scope.spawn(move || {
                    for _ in 0..20 {
                        StdFileAccess.write(path, body).unwrap();
                    }
                });
            }
        });

        let written = StdFileAccess.read(&path).unwrap();
        assert!(contents.contains(&written));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_std_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let err = StdFileAccess.read(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memory_write_failures_are_consumed() {
        let files = MemoryFiles::new();
        let path = Path::new("/control");
        files.fail_writes(path, 1);

        assert!(files.write(path, b"fast").is_err());
        assert!(files.write(path, b"fast").is_ok());
        assert_eq!(files.write_count(path), 1);
        assert_eq!(files.read_string(path).as_deref(), Some("fast"));
    }

    #[test]
    fn test_memory_unreadable() {
        let files = MemoryFiles::new();
        files.insert("/config.json", "{}");
        files.set_unreadable("/config.json", true);

        let err = files.read(Path::new("/config.json")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
