//! Local directory passthrough backend
//!
//! Maps the capability set onto a storage directory on the host
//! filesystem. Every mount path is resolved strictly underneath the
//! storage root; `..` components are rejected rather than resolved.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use super::{DirEntry, EntryKind, FileAttr, Filesystem, FsError, SetAttr};

pub struct DiskFs {
    storage: PathBuf,
}

impl DiskFs {
    /// Open a passthrough filesystem rooted at `storage`, creating the
    /// directory if needed. Failure here is a setup error.
    pub fn new(storage: impl Into<PathBuf>) -> Result<Self, FsError> {
        let storage = storage.into();
        fs::create_dir_all(&storage)?;
        Ok(Self { storage })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, FsError> {
        let mut resolved = self.storage.clone();
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::Normal(part) => resolved.push(part),
                _ => return Err(FsError::InvalidPath(path.to_path_buf())),
            }
        }
        Ok(resolved)
    }

    fn map_io(err: std::io::Error, path: &Path) -> FsError {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_path_buf()),
            _ => FsError::Io(err),
        }
    }

    fn attr_of(meta: &fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };
        FileAttr {
            kind,
            size: meta.len(),
            mode: meta.permissions().mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: meta.mtime().max(0) as u64,
        }
    }
}

impl Filesystem for DiskFs {
    fn getattr(&self, path: &Path) -> Result<FileAttr, FsError> {
        let real = self.resolve(path)?;
        let meta = fs::symlink_metadata(&real).map_err(|e| Self::map_io(e, path))?;
        Ok(Self::attr_of(&meta))
    }

    fn setattr(&self, path: &Path, set: SetAttr) -> Result<FileAttr, FsError> {
        let real = self.resolve(path)?;
        if let Some(mode) = set.mode {
            fs::set_permissions(&real, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| Self::map_io(e, path))?;
        }
        if let Some(size) = set.size {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&real)
                .map_err(|e| Self::map_io(e, path))?;
            file.set_len(size).map_err(|e| Self::map_io(e, path))?;
        }
        self.getattr(path)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let real = self.resolve(path)?;
        let meta = fs::metadata(&real).map_err(|e| Self::map_io(e, path))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(path.to_path_buf()));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&real).map_err(|e| Self::map_io(e, path))? {
            let entry = entry.map_err(FsError::Io)?;
            let file_type = entry.file_type().map_err(FsError::Io)?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                kind,
            });
        }
        Ok(entries)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        let real = self.resolve(path)?;
        fs::create_dir(&real).map_err(|e| Self::map_io(e, path))?;
        fs::set_permissions(&real, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| Self::map_io(e, path))?;
        self.getattr(path)
    }

    fn create(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        let real = self.resolve(path)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&real)
            .map_err(|e| Self::map_io(e, path))?;
        file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| Self::map_io(e, path))?;
        self.getattr(path)
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let real = self.resolve(path)?;
        let mut file = fs::File::open(&real).map_err(|e| Self::map_io(e, path))?;
        if file.metadata().map_err(FsError::Io)?.is_dir() {
            return Err(FsError::IsADirectory(path.to_path_buf()));
        }
        file.seek(SeekFrom::Start(offset)).map_err(FsError::Io)?;
        let mut data = vec![0u8; size as usize];
        let mut filled = 0;
        loop {
            let n = file.read(&mut data[filled..]).map_err(FsError::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == data.len() {
                break;
            }
        }
        data.truncate(filled);
        Ok(data)
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let real = self.resolve(path)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&real)
            .map_err(|e| Self::map_io(e, path))?;
        file.seek(SeekFrom::Start(offset)).map_err(FsError::Io)?;
        file.write_all(data).map_err(FsError::Io)?;
        Ok(data.len() as u32)
    }

    fn flush(&self, path: &Path) -> Result<(), FsError> {
        let real = self.resolve(path)?;
        if let Ok(file) = fs::OpenOptions::new().write(true).open(&real) {
            file.sync_all().map_err(FsError::Io)?;
        }
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
        let real = self.resolve(path)?;
        let meta = fs::symlink_metadata(&real).map_err(|e| Self::map_io(e, path))?;
        if meta.is_dir() {
            fs::remove_dir(&real).map_err(|e| match e.raw_os_error() {
                Some(code) if code == libc::ENOTEMPTY => FsError::NotEmpty(path.to_path_buf()),
                _ => Self::map_io(e, path),
            })
        } else {
            fs::remove_file(&real).map_err(|e| Self::map_io(e, path))
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let real_from = self.resolve(from)?;
        let real_to = self.resolve(to)?;
        if real_to.exists() {
            return Err(FsError::AlreadyExists(to.to_path_buf()));
        }
        fs::rename(&real_from, &real_to).map_err(|e| Self::map_io(e, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs() -> (DiskFs, TempDir) {
        let tmp = TempDir::new().unwrap();
        let fs = DiskFs::new(tmp.path().join("storage")).unwrap();
        (fs, tmp)
    }

    #[test]
    fn test_roundtrip() {
        let (fs, _tmp) = fs();
        fs.create(Path::new("/f.txt"), 0o644).unwrap();
        fs.write(Path::new("/f.txt"), 0, b"on disk").unwrap();
        assert_eq!(fs.read(Path::new("/f.txt"), 0, 64).unwrap(), b"on disk");
        assert_eq!(fs.read(Path::new("/f.txt"), 3, 64).unwrap(), b"disk");
    }

    #[test]
    fn test_mkdir_readdir() {
        let (fs, _tmp) = fs();
        fs.mkdir(Path::new("/docs"), 0o755).unwrap();
        fs.create(Path::new("/docs/a"), 0o644).unwrap();
        let entries = fs.readdir(Path::new("/docs")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[test]
    fn test_path_escape_rejected() {
        let (fs, _tmp) = fs();
        let err = fs.getattr(Path::new("/../outside")).unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));
    }

    #[test]
    fn test_rename_over_existing_fails() {
        let (fs, _tmp) = fs();
        fs.create(Path::new("/a"), 0o644).unwrap();
        fs.create(Path::new("/b"), 0o644).unwrap();
        assert!(matches!(
            fs.rename(Path::new("/a"), Path::new("/b")),
            Err(FsError::AlreadyExists(_))
        ));
    }
}
