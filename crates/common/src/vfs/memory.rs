//! In-memory map backend
//!
//! Nothing survives process exit. Useful as a scratch mount and as the
//! reference implementation of the capability set in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::{
    is_immediate_child, parent_and_name, unix_now, DirEntry, EntryKind, FileAttr, Filesystem,
    FsError, SetAttr,
};

#[derive(Debug, Clone)]
struct MemNode {
    kind: EntryKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: u64,
    data: Vec<u8>,
}

impl MemNode {
    fn attr(&self) -> FileAttr {
        FileAttr {
            kind: self.kind,
            size: self.data.len() as u64,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            mtime: self.mtime,
        }
    }
}

/// A filesystem backed by a path-keyed in-memory map.
pub struct MemoryFs {
    nodes: RwLock<BTreeMap<PathBuf, MemNode>>,
    uid: u32,
    gid: u32,
}

impl MemoryFs {
    pub fn new(uid: u32, gid: u32) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::from("/"),
            MemNode {
                kind: EntryKind::Directory,
                mode: 0o755,
                uid,
                gid,
                mtime: unix_now(),
                data: Vec::new(),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            uid,
            gid,
        }
    }

    fn require_dir(
        nodes: &BTreeMap<PathBuf, MemNode>,
        path: &Path,
    ) -> Result<(), FsError> {
        match nodes.get(path) {
            Some(node) if node.kind.is_dir() => Ok(()),
            Some(_) => Err(FsError::NotADirectory(path.to_path_buf())),
            None => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn insert_node(&self, path: &Path, node: MemNode) -> Result<FileAttr, FsError> {
        let (parent, _name) = parent_and_name(path)?;
        let mut nodes = self.nodes.write();
        Self::require_dir(&nodes, parent)?;
        if nodes.contains_key(path) {
            return Err(FsError::AlreadyExists(path.to_path_buf()));
        }
        let attr = node.attr();
        nodes.insert(path.to_path_buf(), node);
        Ok(attr)
    }
}

impl Filesystem for MemoryFs {
    fn getattr(&self, path: &Path) -> Result<FileAttr, FsError> {
        let nodes = self.nodes.read();
        nodes
            .get(path)
            .map(MemNode::attr)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    fn setattr(&self, path: &Path, set: SetAttr) -> Result<FileAttr, FsError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        if let Some(mode) = set.mode {
            node.mode = mode & 0o7777;
        }
        if let Some(uid) = set.uid {
            node.uid = uid;
        }
        if let Some(gid) = set.gid {
            node.gid = gid;
        }
        if let Some(size) = set.size {
            if node.kind.is_dir() {
                return Err(FsError::IsADirectory(path.to_path_buf()));
            }
            node.data.resize(size as usize, 0);
            node.mtime = unix_now();
        }
        // Mode and ownership changes leave the mtime alone.
        if let Some(mtime) = set.mtime {
            node.mtime = mtime;
        }
        Ok(node.attr())
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let nodes = self.nodes.read();
        Self::require_dir(&nodes, path)?;
        let entries = nodes
            .iter()
            .filter(|(p, _)| is_immediate_child(path, p))
            .map(|(p, node)| DirEntry {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                kind: node.kind,
            })
            .collect();
        Ok(entries)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        self.insert_node(
            path,
            MemNode {
                kind: EntryKind::Directory,
                mode: mode & 0o7777,
                uid: self.uid,
                gid: self.gid,
                mtime: unix_now(),
                data: Vec::new(),
            },
        )
    }

    fn create(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        self.insert_node(
            path,
            MemNode {
                kind: EntryKind::File,
                mode: mode & 0o7777,
                uid: self.uid,
                gid: self.gid,
                mtime: unix_now(),
                data: Vec::new(),
            },
        )
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        if node.kind.is_dir() {
            return Err(FsError::IsADirectory(path.to_path_buf()));
        }
        let start = (offset as usize).min(node.data.len());
        let end = (start + size as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        if node.kind.is_dir() {
            return Err(FsError::IsADirectory(path.to_path_buf()));
        }
        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);
        node.mtime = unix_now();
        Ok(data.len() as u32)
    }

    fn flush(&self, _path: &Path) -> Result<(), FsError> {
        // Writes land in the map immediately.
        Ok(())
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<(), FsError> {
        self.setattr(
            path,
            SetAttr {
                size: Some(size),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), FsError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        if node.kind.is_dir() && nodes.keys().any(|p| is_immediate_child(path, p)) {
            return Err(FsError::NotEmpty(path.to_path_buf()));
        }
        if path == Path::new("/") {
            return Err(FsError::InvalidPath(path.to_path_buf()));
        }
        nodes.remove(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let (to_parent, _) = parent_and_name(to)?;
        let mut nodes = self.nodes.write();
        Self::require_dir(&nodes, to_parent)?;
        if nodes.contains_key(to) {
            return Err(FsError::AlreadyExists(to.to_path_buf()));
        }
        let node = nodes
            .remove(from)
            .ok_or_else(|| FsError::NotFound(from.to_path_buf()))?;
        // Move any descendants along with a renamed directory.
        if node.kind.is_dir() {
            let descendants: Vec<PathBuf> = nodes
                .keys()
                .filter(|p| p.starts_with(from))
                .cloned()
                .collect();
            for old in descendants {
                if let Ok(rest) = old.strip_prefix(from) {
                    let new = to.join(rest);
                    if let Some(n) = nodes.remove(&old) {
                        nodes.insert(new, n);
                    }
                }
            }
        }
        nodes.insert(to.to_path_buf(), node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> MemoryFs {
        MemoryFs::new(1000, 1000)
    }

    #[test]
    fn test_create_write_read() {
        let fs = fs();
        fs.create(Path::new("/a.txt"), 0o644).unwrap();
        fs.write(Path::new("/a.txt"), 0, b"hello").unwrap();
        assert_eq!(fs.read(Path::new("/a.txt"), 0, 64).unwrap(), b"hello");
        assert_eq!(fs.getattr(Path::new("/a.txt")).unwrap().size, 5);
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let fs = fs();
        fs.create(Path::new("/s.bin"), 0o644).unwrap();
        fs.write(Path::new("/s.bin"), 4, b"x").unwrap();
        assert_eq!(fs.read(Path::new("/s.bin"), 0, 16).unwrap(), b"\0\0\0\0x");
    }

    #[test]
    fn test_readdir_immediate_children_only() {
        let fs = fs();
        fs.mkdir(Path::new("/a"), 0o755).unwrap();
        fs.create(Path::new("/a/b"), 0o644).unwrap();
        fs.mkdir(Path::new("/a/c"), 0o755).unwrap();
        fs.create(Path::new("/a/c/d"), 0o644).unwrap();

        let mut names: Vec<String> = fs
            .readdir(Path::new("/a"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_chmod_leaves_mtime_alone() {
        let fs = fs();
        fs.create(Path::new("/a.txt"), 0o644).unwrap();
        fs.setattr(
            Path::new("/a.txt"),
            SetAttr {
                mtime: Some(1_000),
                ..SetAttr::default()
            },
        )
        .unwrap();

        let attr = fs
            .setattr(
                Path::new("/a.txt"),
                SetAttr {
                    mode: Some(0o600),
                    uid: Some(0),
                    ..SetAttr::default()
                },
            )
            .unwrap();
        assert_eq!(attr.mode, 0o600);
        assert_eq!(attr.mtime, 1_000);
    }

    #[test]
    fn test_rename_directory_moves_children() {
        let fs = fs();
        fs.mkdir(Path::new("/old"), 0o755).unwrap();
        fs.create(Path::new("/old/f"), 0o644).unwrap();
        fs.write(Path::new("/old/f"), 0, b"data").unwrap();

        fs.rename(Path::new("/old"), Path::new("/new")).unwrap();

        assert!(matches!(
            fs.getattr(Path::new("/old")),
            Err(FsError::NotFound(_))
        ));
        assert_eq!(fs.read(Path::new("/new/f"), 0, 16).unwrap(), b"data");
    }

    #[test]
    fn test_unlink_nonempty_dir_fails() {
        let fs = fs();
        fs.mkdir(Path::new("/d"), 0o755).unwrap();
        fs.create(Path::new("/d/f"), 0o644).unwrap();
        assert!(matches!(
            fs.unlink(Path::new("/d")),
            Err(FsError::NotEmpty(_))
        ));
        fs.unlink(Path::new("/d/f")).unwrap();
        fs.unlink(Path::new("/d")).unwrap();
    }

    #[test]
    fn test_errno_mapping() {
        let fs = fs();
        let err = fs.getattr(Path::new("/missing")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        fs.create(Path::new("/f"), 0o644).unwrap();
        let err = fs.create(Path::new("/f"), 0o644).unwrap_err();
        assert_eq!(err.errno(), libc::EEXIST);
        let err = fs.readdir(Path::new("/f")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOTDIR);
    }
}
