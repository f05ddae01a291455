// File stores backing AskFile requests
//
// MemoryFiles keeps contents in a hash map and is what the simulator and the tests
// use. DirectoryFiles serves plain files from one directory on disk.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::debug;

use crate::yy_error::{Error, Result};
use crate::yy_interface::FileStore;

// ============================================================================
// In-Memory File Store
// ============================================================================

/// In-memory file store
///
/// Lookup: O(1). Contents are cloned on every read, which is fine for the small
/// payloads a ring carries.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: HashMap<String, String>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.insert(name, contents);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(name.into(), contents.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryFiles {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut files = MemoryFiles::new();
        for (name, contents) in iter {
            files.insert(name, contents);
        }
        files
    }
}

impl FileStore for MemoryFiles {
    fn read(&self, filename: &str) -> Option<String> {
        self.files.get(filename).cloned()
    }
}

// ============================================================================
// Directory File Store
// ============================================================================

/// Serves files directly under `root`. Names that would leave the directory are
/// treated as missing.
#[derive(Debug, Clone)]
pub struct DirectoryFiles {
    root: PathBuf,
}

impl DirectoryFiles {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "files_dir {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_plain_name(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\'])
}

impl FileStore for DirectoryFiles {
    fn read(&self, filename: &str) -> Option<String> {
        if !is_plain_name(filename) {
            debug!("refusing file name {:?}", filename);
            return None;
        }
        std::fs::read_to_string(self.root.join(filename)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_memory_store_lookup() {
        let files = MemoryFiles::new()
            .with_file("notes.txt", "ring of four")
            .with_file("empty", "");

        assert_eq!(files.len(), 2);
        assert_eq!(files.read("notes.txt").as_deref(), Some("ring of four"));
        assert_eq!(files.read("empty").as_deref(), Some(""));
        assert_eq!(files.read("missing"), None);
    }

    #[test]
    fn test_memory_store_from_iter() {
        let files: MemoryFiles = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(files.read("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_directory_store() {
        let root = std::env::temp_dir().join(format!("yy_files_{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("hello.txt"), "hi there").unwrap();

        let files = DirectoryFiles::new(&root).unwrap();
        assert_eq!(files.root(), root.as_path());
        assert_eq!(files.read("hello.txt").as_deref(), Some("hi there"));
        assert_eq!(files.read("nope.txt"), None);
        assert_eq!(files.read("../hello.txt"), None);
        assert_eq!(files.read(".."), None);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_directory_must_exist() {
        let err = DirectoryFiles::new("/definitely/not/here/yy").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
