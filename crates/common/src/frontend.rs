//! Mount front-end
//!
//! Adapts a [`Filesystem`] to the contract a kernel mount adapter
//! expects: every operation resolves against the mountpoint and fails
//! with a POSIX errno instead of a structured error. The front-end owns
//! the identity reported for entries that predate the mount.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::vfs::{DirEntry, FileAttr, Filesystem, FsError, SetAttr};

/// Operation outcome in mount terms: a value or an errno.
pub type MountResult<T> = Result<T, libc::c_int>;

pub struct MountFrontend {
    mountpoint: PathBuf,
    uid: u32,
    gid: u32,
    fs: Arc<dyn Filesystem>,
}

impl MountFrontend {
    pub fn new(mountpoint: impl Into<PathBuf>, uid: u32, gid: u32, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            uid,
            gid,
            fs,
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Identity stamped onto attributes so every entry appears owned by
    /// the mounting user, whatever the backend recorded.
    fn own(&self, mut attr: FileAttr) -> FileAttr {
        attr.uid = self.uid;
        attr.gid = self.gid;
        attr
    }

    fn errno(&self, op: &str, path: &Path, err: FsError) -> libc::c_int {
        let errno = err.errno();
        warn!(op, path = %path.display(), errno, %err, "mount operation failed");
        errno
    }

    pub fn getattr(&self, path: &Path) -> MountResult<FileAttr> {
        self.fs
            .getattr(path)
            .map(|attr| self.own(attr))
            .map_err(|err| self.errno("getattr", path, err))
    }

    pub fn setattr(&self, path: &Path, set: SetAttr) -> MountResult<FileAttr> {
        self.fs
            .setattr(path, set)
            .map(|attr| self.own(attr))
            .map_err(|err| self.errno("setattr", path, err))
    }

    /// Resolve a directory entry by name.
    pub fn lookup(&self, dir: &Path, name: &str) -> MountResult<FileAttr> {
        let path = dir.join(name);
        self.getattr(&path)
    }

    /// Validate an open request. Handles are stateless (the cache layer
    /// stages per path), so open only checks the entry is a file.
    pub fn open(&self, path: &Path) -> MountResult<()> {
        let attr = self.getattr(path)?;
        if attr.kind.is_dir() {
            return Err(libc::EISDIR);
        }
        Ok(())
    }

    pub fn readdir(&self, path: &Path) -> MountResult<Vec<DirEntry>> {
        self.fs
            .readdir(path)
            .map_err(|err| self.errno("readdir", path, err))
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> MountResult<FileAttr> {
        self.fs
            .mkdir(path, mode)
            .map(|attr| self.own(attr))
            .map_err(|err| self.errno("mkdir", path, err))
    }

    pub fn create(&self, path: &Path, mode: u32) -> MountResult<FileAttr> {
        self.fs
            .create(path, mode)
            .map(|attr| self.own(attr))
            .map_err(|err| self.errno("create", path, err))
    }

    pub fn read(&self, path: &Path, offset: u64, size: u32) -> MountResult<Vec<u8>> {
        self.fs
            .read(path, offset, size)
            .map_err(|err| self.errno("read", path, err))
    }

    pub fn write(&self, path: &Path, offset: u64, data: &[u8]) -> MountResult<u32> {
        self.fs
            .write(path, offset, data)
            .map_err(|err| self.errno("write", path, err))
    }

    pub fn flush(&self, path: &Path) -> MountResult<()> {
        self.fs
            .flush(path)
            .map_err(|err| self.errno("flush", path, err))
    }

    pub fn truncate(&self, path: &Path, size: u64) -> MountResult<()> {
        self.fs
            .truncate(path, size)
            .map_err(|err| self.errno("truncate", path, err))
    }

    pub fn unlink(&self, path: &Path) -> MountResult<()> {
        self.fs
            .unlink(path)
            .map_err(|err| self.errno("unlink", path, err))
    }

    pub fn rename(&self, from: &Path, to: &Path) -> MountResult<()> {
        self.fs
            .rename(from, to)
            .map_err(|err| self.errno("rename", from, err))
    }
}

/// Effective uid of the current process.
pub fn current_uid() -> u32 {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() }
}

pub fn current_gid() -> u32 {
    // SAFETY: getegid has no failure modes and touches no memory.
    unsafe { libc::getegid() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    fn frontend() -> MountFrontend {
        let fs = Arc::new(MemoryFs::new(0, 0));
        MountFrontend::new("/mnt/test", 1000, 1000, fs)
    }

    #[test]
    fn test_errors_map_to_errno() {
        let front = frontend();
        assert_eq!(
            front.getattr(Path::new("/missing")).unwrap_err(),
            libc::ENOENT
        );
        front.mkdir(Path::new("/d"), 0o755).unwrap();
        assert_eq!(
            front.mkdir(Path::new("/d"), 0o755).unwrap_err(),
            libc::EEXIST
        );
        assert_eq!(
            front.read(Path::new("/d"), 0, 8).unwrap_err(),
            libc::EISDIR
        );
        assert_eq!(front.open(Path::new("/d")).unwrap_err(), libc::EISDIR);
        front.create(Path::new("/d/f"), 0o644).unwrap();
        front.open(Path::new("/d/f")).unwrap();
    }

    #[test]
    fn test_attrs_report_mount_owner() {
        let front = frontend();
        front.create(Path::new("/f"), 0o644).unwrap();
        let attr = front.lookup(Path::new("/"), "f").unwrap();
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 1000);
    }
}
