//! Metadata index over the append-only media
//!
//! The archive never scans the media to answer metadata questions; the
//! index maps each live path to its most recent header and is the sole
//! authority on which header block currently represents an entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::archive::header::Header;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Authoritative path → header mapping for one archive.
pub trait MetadataIndex: Send + Sync {
    /// Header currently representing `path`, if the entry is live.
    fn get(&self, path: &Path) -> Result<Option<Header>, IndexError>;

    /// Record `header` as the current state of its path, replacing any
    /// previous header for that path.
    fn put(&self, header: Header) -> Result<(), IndexError>;

    /// Forget `path`. Deleting an absent path is a no-op.
    fn delete(&self, path: &Path) -> Result<(), IndexError>;

    /// All live headers whose path starts with `prefix`, in path order.
    fn list(&self, prefix: &Path) -> Result<Vec<Header>, IndexError>;
}

/// In-memory index. State is lost when the process exits, which suits
/// throwaway mounts and tests.
#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<PathBuf, Header>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataIndex for MemoryIndex {
    fn get(&self, path: &Path) -> Result<Option<Header>, IndexError> {
        Ok(self.entries.read().get(path).cloned())
    }

    fn put(&self, header: Header) -> Result<(), IndexError> {
        self.entries.write().insert(header.path.clone(), header);
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), IndexError> {
        self.entries.write().remove(path);
        Ok(())
    }

    fn list(&self, prefix: &Path) -> Result<Vec<Header>, IndexError> {
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|header| header.path.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Index persisted as a bincode snapshot next to the media. The whole
/// map is rewritten on every mutation; archives are metadata-light
/// compared to their content so this stays cheap.
pub struct FileIndex {
    path: PathBuf,
    entries: RwLock<BTreeMap<PathBuf, Header>>,
}

impl FileIndex {
    /// Open or create the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<PathBuf, Header>) -> Result<(), IndexError> {
        let bytes = bincode::serialize(entries)?;
        let staged = self.path.with_extension("tmp");
        std::fs::write(&staged, bytes)?;
        std::fs::rename(&staged, &self.path)?;
        Ok(())
    }
}

impl MetadataIndex for FileIndex {
    fn get(&self, path: &Path) -> Result<Option<Header>, IndexError> {
        Ok(self.entries.read().get(path).cloned())
    }

    fn put(&self, header: Header) -> Result<(), IndexError> {
        let mut entries = self.entries.write();
        entries.insert(header.path.clone(), header);
        self.persist(&entries)
    }

    fn delete(&self, path: &Path) -> Result<(), IndexError> {
        let mut entries = self.entries.write();
        if entries.remove(path).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &Path) -> Result<Vec<Header>, IndexError> {
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|header| header.path.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::transform::TransformSet;
    use crate::vfs::EntryKind;

    fn header(path: &str, offset: u64) -> Header {
        Header {
            path: PathBuf::from(path),
            kind: EntryKind::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            size: 0,
            mtime: 0,
            link: None,
            transforms: TransformSet::identity(),
            offset,
        }
    }

    #[test]
    fn test_memory_index_replaces_on_put() {
        let index = MemoryIndex::new();
        index.put(header("/a", 0)).unwrap();
        index.put(header("/a", 40)).unwrap();
        assert_eq!(index.get(Path::new("/a")).unwrap().unwrap().offset, 40);
    }

    #[test]
    fn test_memory_index_list_prefix() {
        let index = MemoryIndex::new();
        index.put(header("/a", 0)).unwrap();
        index.put(header("/a/b", 20)).unwrap();
        index.put(header("/c", 40)).unwrap();
        let under_a = index.list(Path::new("/a")).unwrap();
        assert_eq!(under_a.len(), 2);
        index.delete(Path::new("/a/b")).unwrap();
        assert_eq!(index.list(Path::new("/a")).unwrap().len(), 1);
    }

    #[test]
    fn test_file_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let index = FileIndex::open(&path).unwrap();
            index.put(header("/kept", 20)).unwrap();
            index.put(header("/dropped", 40)).unwrap();
            index.delete(Path::new("/dropped")).unwrap();
        }
        let index = FileIndex::open(&path).unwrap();
        assert_eq!(index.get(Path::new("/kept")).unwrap().unwrap().offset, 20);
        assert!(index.get(Path::new("/dropped")).unwrap().is_none());
    }
}
