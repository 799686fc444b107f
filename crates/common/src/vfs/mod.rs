//! Virtual filesystem capability set
//!
//! Every backend (in-memory map, local directory passthrough, and the
//! cache-fronted archive filesystem) implements the same [`Filesystem`]
//! trait so that the mount front-end binding is agnostic to which one is
//! behind it. Errors carry enough structure to map onto POSIX error codes,
//! which is the contract vocabulary the front-end speaks.

mod disk;
mod memory;

pub use disk::DiskFs;
pub use memory::MemoryFs;

use std::path::{Path, PathBuf};

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Attributes of a filesystem entry, as returned by `getattr`/`stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: EntryKind,
    pub size: u64,
    /// Permission bits (no type bits).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, unix seconds.
    pub mtime: u64,
}

/// A single `readdir` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Attribute changes requested by `setattr`. Unset fields are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub mtime: Option<u64>,
}

impl SetAttr {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && self.mtime.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("file exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("is a directory: {0}")]
    IsADirectory(PathBuf),
    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),
    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The POSIX error code the mount front-end should hand back to the
    /// kernel protocol for this error.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// The POSIX-like capability set every backend exposes.
///
/// Paths are absolute, resolved relative to the backend's root handle.
/// Implementations are internally synchronized: the archive stack admits a
/// single writer at a time, the local backends take their own locks.
pub trait Filesystem: Send + Sync {
    fn getattr(&self, path: &Path) -> Result<FileAttr, FsError>;

    fn setattr(&self, path: &Path, set: SetAttr) -> Result<FileAttr, FsError>;

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    fn mkdir(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError>;

    /// Create an empty regular file.
    fn create(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError>;

    /// Read up to `size` bytes starting at `offset`. Reading past the end
    /// returns the available tail (possibly empty), not an error.
    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>, FsError>;

    /// Write `data` at `offset`, extending the file (zero-filled) if the
    /// offset lies past the current end. Returns the number of bytes
    /// accepted, which is always `data.len()` on success.
    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u32, FsError>;

    /// Promote any staged content for `path` to durable storage.
    fn flush(&self, path: &Path) -> Result<(), FsError>;

    fn truncate(&self, path: &Path, size: u64) -> Result<(), FsError>;

    /// Remove a file, or an empty directory.
    fn unlink(&self, path: &Path) -> Result<(), FsError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;
}

/// Split a path into its parent and final component.
///
/// The root itself has no parent; operations that need one fail with
/// `InvalidPath` on `/`.
pub(crate) fn parent_and_name(path: &Path) -> Result<(&Path, String), FsError> {
    let parent = path
        .parent()
        .ok_or_else(|| FsError::InvalidPath(path.to_path_buf()))?;
    let name = path
        .file_name()
        .ok_or_else(|| FsError::InvalidPath(path.to_path_buf()))?
        .to_string_lossy()
        .to_string();
    Ok((parent, name))
}

/// True when `child` is an immediate child of directory `dir`.
pub(crate) fn is_immediate_child(dir: &Path, child: &Path) -> bool {
    child != dir && child.parent() == Some(dir)
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
