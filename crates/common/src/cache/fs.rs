//! Write-back cache in front of the archive
//!
//! [`CacheFs`] is the [`Filesystem`] the mount front-end actually talks
//! to when an archive backs the mount. Reads of clean files go straight
//! to the archive; the first write to a file pulls its content into a
//! staging slot, further writes and reads hit the slot, and flush
//! promotes the whole file back to the archive as exactly one append.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::archive::ArchiveFs;
use crate::cache::write_cache::{Staged, WriteCacheConfig};
use crate::vfs::{DirEntry, FileAttr, Filesystem, FsError, SetAttr};

pub struct CacheFs {
    archive: Arc<ArchiveFs>,
    config: WriteCacheConfig,
    staged: Mutex<HashMap<PathBuf, Staged>>,
}

impl CacheFs {
    pub fn new(archive: Arc<ArchiveFs>, config: WriteCacheConfig) -> Self {
        Self {
            archive,
            config,
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Load a file's current content into a staging slot if it is not
    /// already dirty. The staged lock is held by the caller.
    fn ensure_staged<'a>(
        &self,
        staged: &'a mut HashMap<PathBuf, Staged>,
        path: &Path,
    ) -> Result<&'a mut Staged, FsError> {
        if !staged.contains_key(path) {
            let content = self.archive.read_file(path)?;
            let slot = Staged::new(&self.config, content).map_err(FsError::Io)?;
            staged.insert(path.to_path_buf(), slot);
        }
        Ok(staged
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?)
    }

    /// Promote a dirty file back to the archive. No-op for clean paths.
    ///
    /// The staged lock is held until the archive append (and its index
    /// update) has landed, so a concurrent `write` to the same path
    /// cannot re-stage from pre-flush content and lose the flushed
    /// bytes. The staged → media lock order matches `ensure_staged`.
    fn promote(&self, path: &Path) -> Result<(), FsError> {
        let mut staged = self.staged.lock();
        if let Some(slot) = staged.remove(path) {
            let content = slot.into_bytes().map_err(FsError::Io)?;
            debug!(path = %path.display(), bytes = content.len(), "promoting staged content");
            self.archive.write_file(path, &content)?;
        }
        Ok(())
    }
}

impl Filesystem for CacheFs {
    fn getattr(&self, path: &Path) -> Result<FileAttr, FsError> {
        let mut attr = self.archive.stat(path)?.attr();
        if let Some(slot) = self.staged.lock().get(path) {
            attr.size = slot.len();
        }
        Ok(attr)
    }

    fn setattr(&self, path: &Path, set: SetAttr) -> Result<FileAttr, FsError> {
        // Size changes on dirty files stay in the staging slot; other
        // attribute changes go to the archive directly.
        let mut set = set;
        if let Some(size) = set.size.take() {
            let mut staged = self.staged.lock();
            if let Some(slot) = staged.get_mut(path) {
                slot.resize(size).map_err(FsError::Io)?;
            } else {
                drop(staged);
                self.archive.truncate(path, size)?;
            }
        }
        if set.is_empty() {
            return self.getattr(path);
        }
        let header = self.archive.setattr(path, set)?;
        let mut attr = header.attr();
        if let Some(slot) = self.staged.lock().get(path) {
            attr.size = slot.len();
        }
        Ok(attr)
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let headers = self.archive.readdir(path)?;
        Ok(headers
            .into_iter()
            .filter_map(|header| {
                header.path.file_name().map(|name| DirEntry {
                    name: name.to_string_lossy().to_string(),
                    kind: header.kind,
                })
            })
            .collect())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        Ok(self.archive.mkdir(path, mode)?.attr())
    }

    fn create(&self, path: &Path, mode: u32) -> Result<FileAttr, FsError> {
        Ok(self.archive.create(path, mode)?.attr())
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let mut staged = self.staged.lock();
        if let Some(slot) = staged.get_mut(path) {
            return slot.read(offset, size).map_err(FsError::Io);
        }
        drop(staged);

        let content = self.archive.read_file(path)?;
        if offset >= content.len() as u64 {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = content.len().min(start + size as usize);
        Ok(content[start..end].to_vec())
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let mut staged = self.staged.lock();
        let slot = self.ensure_staged(&mut staged, path)?;
        slot.write_at(offset, data).map_err(FsError::Io)?;
        Ok(data.len() as u32)
    }

    fn flush(&self, path: &Path) -> Result<(), FsError> {
        self.promote(path)
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<(), FsError> {
        let mut staged = self.staged.lock();
        if let Some(slot) = staged.get_mut(path) {
            return slot.resize(size).map_err(FsError::Io);
        }
        drop(staged);
        self.archive.truncate(path, size)?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), FsError> {
        self.staged.lock().remove(path);
        self.archive.unlink(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        // Promote first so the archive moves the latest content.
        self.promote(from)?;
        self.archive.rename(from, to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveOptions, MemoryIndex, Pipeline};
    use crate::drive::{Drive, DriveError, DriveMode, FileDrive};

    fn cache_fs(dir: &tempfile::TempDir, config: WriteCacheConfig) -> CacheFs {
        let archive = ArchiveFs::new(
            Box::new(FileDrive::new(dir.path().join("media.tar"))),
            Arc::new(MemoryIndex::new()),
            Pipeline::identity(),
            ArchiveOptions::default(),
        )
        .unwrap();
        archive.initialize(Path::new("/"), 0o755).unwrap();
        CacheFs::new(Arc::new(archive), config)
    }

    #[test]
    fn test_partial_writes_flush_as_one_append() {
        let dir = tempfile::tempdir().unwrap();
        let fs = cache_fs(&dir, WriteCacheConfig::Memory);
        fs.create(Path::new("/big.bin"), 0o644).unwrap();
        let before = std::fs::metadata(dir.path().join("media.tar")).unwrap().len();

        fs.write(Path::new("/big.bin"), 0, &[1u8; 700]).unwrap();
        fs.write(Path::new("/big.bin"), 700, &[2u8; 700]).unwrap();
        // Nothing reaches the media until flush.
        assert_eq!(
            std::fs::metadata(dir.path().join("media.tar")).unwrap().len(),
            before
        );

        fs.flush(Path::new("/big.bin")).unwrap();
        let after = std::fs::metadata(dir.path().join("media.tar")).unwrap().len();
        // One header block plus 1400 content bytes, record-padded.
        let blocks = crate::archive::align_to_record(
            1 + crate::archive::content_blocks(1400),
            crate::archive::DEFAULT_RECORD_BLOCKS,
        );
        assert_eq!(after - before, blocks * crate::archive::BLOCK_SIZE);

        let read = fs.read(Path::new("/big.bin"), 650, 100).unwrap();
        assert_eq!(&read[..50], &[1u8; 50]);
        assert_eq!(&read[50..], &[2u8; 50]);
    }

    #[test]
    fn test_dirty_reads_see_staged_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs = cache_fs(&dir, WriteCacheConfig::Memory);
        fs.create(Path::new("/f"), 0o644).unwrap();
        fs.write(Path::new("/f"), 0, b"draft").unwrap();
        assert_eq!(fs.read(Path::new("/f"), 0, 16).unwrap(), b"draft");
        assert_eq!(fs.getattr(Path::new("/f")).unwrap().size, 5);
        fs.flush(Path::new("/f")).unwrap();
        assert_eq!(fs.read(Path::new("/f"), 0, 16).unwrap(), b"draft");
    }

    #[test]
    fn test_file_backed_staging() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let fs = cache_fs(&dir, WriteCacheConfig::File { dir: cache_dir });
        fs.create(Path::new("/f"), 0o644).unwrap();
        fs.write(Path::new("/f"), 2, b"xy").unwrap();
        assert_eq!(fs.read(Path::new("/f"), 0, 16).unwrap(), b"\0\0xy");
        fs.flush(Path::new("/f")).unwrap();
        assert_eq!(fs.read(Path::new("/f"), 0, 16).unwrap(), b"\0\0xy");
    }

    #[test]
    fn test_rename_promotes_dirty_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs = cache_fs(&dir, WriteCacheConfig::Memory);
        fs.create(Path::new("/a"), 0o644).unwrap();
        fs.write(Path::new("/a"), 0, b"latest").unwrap();
        fs.rename(Path::new("/a"), Path::new("/b")).unwrap();
        assert_eq!(fs.read(Path::new("/b"), 0, 16).unwrap(), b"latest");
    }

    /// Delegates to [`FileDrive`] but stalls every write, widening the
    /// window in which a flush is mid-promotion.
    struct SlowWriteDrive {
        inner: FileDrive,
        delay: std::time::Duration,
    }

    impl Drive for SlowWriteDrive {
        fn open(&mut self, for_write: bool) -> Result<(), DriveError> {
            self.inner.open(for_write)
        }

        fn mode(&self) -> DriveMode {
            self.inner.mode()
        }

        fn position(&self) -> u64 {
            self.inner.position()
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriveError> {
            self.inner.read(buf)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, DriveError> {
            std::thread::sleep(self.delay);
            self.inner.write(buf)
        }

        fn seek(&mut self, pos: u64) -> Result<u64, DriveError> {
            self.inner.seek(pos)
        }

        fn close(&mut self) -> Result<(), DriveError> {
            self.inner.close()
        }
    }

    #[test]
    fn test_write_during_flush_keeps_flushed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveFs::new(
            Box::new(SlowWriteDrive {
                inner: FileDrive::new(dir.path().join("media.tar")),
                delay: std::time::Duration::from_millis(150),
            }),
            Arc::new(MemoryIndex::new()),
            Pipeline::identity(),
            ArchiveOptions::default(),
        )
        .unwrap();
        archive.initialize(Path::new("/"), 0o755).unwrap();
        let fs = Arc::new(CacheFs::new(Arc::new(archive), WriteCacheConfig::Memory));

        fs.create(Path::new("/f"), 0o644).unwrap();
        fs.write(Path::new("/f"), 0, b"AAAA").unwrap();

        // Flush on one thread while a write to the same path lands
        // mid-promotion on another. The write must wait for the flush
        // and then extend the promoted content, not overwrite it.
        let flusher = {
            let fs = Arc::clone(&fs);
            std::thread::spawn(move || fs.flush(Path::new("/f")).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        fs.write(Path::new("/f"), 4, b"BBBB").unwrap();
        flusher.join().unwrap();
        fs.flush(Path::new("/f")).unwrap();

        assert_eq!(fs.read(Path::new("/f"), 0, 16).unwrap(), b"AAAABBBB");
    }

    #[test]
    fn test_flush_clean_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fs = cache_fs(&dir, WriteCacheConfig::Memory);
        fs.create(Path::new("/f"), 0o644).unwrap();
        let before = std::fs::metadata(dir.path().join("media.tar")).unwrap().len();
        fs.flush(Path::new("/f")).unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join("media.tar")).unwrap().len(),
            before
        );
    }
}
