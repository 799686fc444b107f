//! Archive filesystem over a [`Drive`]
//!
//! All mutations append. A content change appends a fresh header plus
//! the transformed content; a metadata-only change (rename, chmod,
//! unlink) appends a zero-content journal header and updates the index,
//! which keeps pointing at the content-bearing header. Reads consult
//! the index for the current header, never the media order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::archive::header::{align_to_record, content_blocks, Header, BLOCK_SIZE};
use crate::archive::index::MetadataIndex;
use crate::archive::transform::Pipeline;
use crate::archive::ArchiveError;
use crate::drive::{Drive, DriveExt};
use crate::vfs::{unix_now, EntryKind, SetAttr};

/// Default record size in blocks, matching the common tape blocking
/// factor of 20 x 512 bytes.
pub const DEFAULT_RECORD_BLOCKS: u64 = 20;

/// Tunables for an archive mount.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Record size in 512-byte blocks. Every append is padded to a
    /// multiple of this.
    pub record_blocks: u64,
    /// Owner stamped onto newly created entries.
    pub uid: u32,
    pub gid: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            record_blocks: DEFAULT_RECORD_BLOCKS,
            uid: 0,
            gid: 0,
        }
    }
}

/// Proof that an archive root exists. `block` identifies the header
/// block that established the root, so two handles compare equal only
/// when they refer to the same on-media root entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHandle {
    path: PathBuf,
    block: u64,
}

impl RootHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block(&self) -> u64 {
        self.block
    }
}

struct Media {
    drive: Box<dyn Drive>,
    /// Next free block, always record-aligned.
    next_block: u64,
}

pub struct ArchiveFs {
    media: Mutex<Media>,
    index: Arc<dyn MetadataIndex>,
    pipeline: Pipeline,
    record_blocks: u64,
    uid: u32,
    gid: u32,
}

impl ArchiveFs {
    /// Wrap `drive` as an archive. The append position is recovered
    /// from the index: the media is never scanned.
    pub fn new(
        drive: Box<dyn Drive>,
        index: Arc<dyn MetadataIndex>,
        pipeline: Pipeline,
        options: ArchiveOptions,
    ) -> Result<Self, ArchiveError> {
        let record_blocks = options.record_blocks.max(1);
        let mut next_block = 0;
        for header in index.list(Path::new("/"))? {
            let end = header.offset + 1 + content_blocks(header.size);
            next_block = next_block.max(end);
        }
        let next_block = align_to_record(next_block, record_blocks);
        debug!(next_block, record_blocks, "opened archive");
        Ok(Self {
            media: Mutex::new(Media { drive, next_block }),
            index,
            pipeline,
            record_blocks,
            uid: options.uid,
            gid: options.gid,
        })
    }

    /// Ensure the root directory entry exists. Creating an existing
    /// root is a no-op that returns a handle to the existing entry, so
    /// mounting the same archive twice is safe.
    pub fn initialize(&self, root: &Path, mode: u32) -> Result<RootHandle, ArchiveError> {
        let root = normalize(root)?;
        if let Some(header) = self.index.get(&root)? {
            if !header.kind.is_dir() {
                return Err(ArchiveError::NotADirectory(root));
            }
            return Ok(RootHandle {
                path: root,
                block: header.offset,
            });
        }

        // Create missing ancestors first so the root always sits in a
        // connected tree.
        let mut ancestors: Vec<&Path> = root.ancestors().skip(1).collect();
        ancestors.reverse();
        for dir in ancestors {
            if self.index.get(dir)?.is_none() {
                self.append_entry(self.new_header(dir, EntryKind::Directory, mode), &[])?;
            }
        }

        let header = self.append_entry(self.new_header(&root, EntryKind::Directory, mode), &[])?;
        Ok(RootHandle {
            path: root,
            block: header.offset,
        })
    }

    /// Current header of `path`.
    pub fn stat(&self, path: &Path) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        self.require(&path)
    }

    /// Headers of the immediate children of `path`, in path order.
    pub fn readdir(&self, path: &Path) -> Result<Vec<Header>, ArchiveError> {
        let path = normalize(path)?;
        let dir = self.require(&path)?;
        if !dir.kind.is_dir() {
            return Err(ArchiveError::NotADirectory(path));
        }
        Ok(self
            .index
            .list(&path)?
            .into_iter()
            .filter(|header| crate::vfs::is_immediate_child(&path, &header.path))
            .collect())
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        self.require_absent_in_dir(&path)?;
        self.append_entry(self.new_header(&path, EntryKind::Directory, mode), &[])
    }

    /// Create an empty file.
    pub fn create(&self, path: &Path, mode: u32) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        self.require_absent_in_dir(&path)?;
        self.append_entry(self.new_header(&path, EntryKind::File, mode), &[])
    }

    /// Replace the content of an existing file by appending a fresh
    /// header plus the new content.
    pub fn write_file(&self, path: &Path, content: &[u8]) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        let old = self.require_file(&path)?;
        let mut header = old.clone();
        header.mtime = unix_now();
        self.append_entry(header, content)
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, ArchiveError> {
        let path = normalize(path)?;
        let header = self.require_file(&path)?;
        self.read_entry(&header)
    }

    /// Resize a file, zero-extending on growth. The surviving content
    /// is restaged as a fresh append.
    pub fn truncate(&self, path: &Path, size: u64) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        let header = self.require_file(&path)?;
        if header.size == size {
            return Ok(header);
        }
        let mut content = self.read_entry(&header)?;
        content.resize(size as usize, 0);
        let mut header = header;
        header.mtime = unix_now();
        self.append_entry(header, &content)
    }

    /// Remove a file or an empty directory. The media keeps the old
    /// content; only the index forgets the path.
    pub fn unlink(&self, path: &Path) -> Result<(), ArchiveError> {
        let path = normalize(path)?;
        if path == Path::new("/") {
            return Err(ArchiveError::InvalidPath(path));
        }
        let header = self.require(&path)?;
        if header.kind.is_dir() && !self.index.list(&path)?.iter().all(|h| h.path == path) {
            return Err(ArchiveError::NotEmpty(path));
        }
        let mut journal = header;
        journal.size = 0;
        journal.mtime = unix_now();
        self.write_media(&journal, &[])?;
        self.index.delete(&path)?;
        Ok(())
    }

    /// Move an entry (and, for directories, everything beneath it).
    /// The target must not exist.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<Header, ArchiveError> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        if from == Path::new("/") || to.starts_with(&from) && to != from {
            return Err(ArchiveError::InvalidPath(from));
        }
        let header = self.require(&from)?;
        self.require_absent_in_dir(&to)?;

        // Journal the move as a zero-content header at the new path.
        let mut journal = header.clone();
        journal.path = to.clone();
        journal.size = 0;
        journal.mtime = unix_now();
        self.write_media(&journal, &[])?;

        // Rehome every index entry under the old path; offsets keep
        // pointing at the content-bearing headers.
        for mut moved in self.index.list(&from)? {
            let suffix = moved
                .path
                .strip_prefix(&from)
                .map_err(|_| ArchiveError::InvalidPath(moved.path.clone()))?
                .to_path_buf();
            let new_path = if suffix.as_os_str().is_empty() {
                to.clone()
            } else {
                to.join(suffix)
            };
            self.index.delete(&moved.path)?;
            moved.path = new_path;
            self.index.put(moved)?;
        }

        self.require(&to)
    }

    /// Update metadata in place (from the caller's view): a journal
    /// header goes to the media, the index keeps the content offset.
    pub fn setattr(&self, path: &Path, set: SetAttr) -> Result<Header, ArchiveError> {
        let path = normalize(path)?;
        let mut header = self.require(&path)?;
        if let Some(size) = set.size {
            header = self.truncate(&path, size)?;
        }
        if let Some(mode) = set.mode {
            header.mode = mode;
        }
        if let Some(uid) = set.uid {
            header.uid = uid;
        }
        if let Some(gid) = set.gid {
            header.gid = gid;
        }
        if let Some(mtime) = set.mtime {
            header.mtime = mtime;
        }

        let mut journal = header.clone();
        journal.size = 0;
        self.write_media(&journal, &[])?;
        self.index.put(header.clone())?;
        Ok(header)
    }

    fn new_header(&self, path: &Path, kind: EntryKind, mode: u32) -> Header {
        Header {
            path: path.to_path_buf(),
            kind,
            mode,
            uid: self.uid,
            gid: self.gid,
            size: 0,
            mtime: unix_now(),
            link: None,
            transforms: self.pipeline.tags(),
            offset: 0,
        }
    }

    /// Append a header plus transformed content and record the result
    /// in the index.
    fn append_entry(&self, mut header: Header, content: &[u8]) -> Result<Header, ArchiveError> {
        let stored = self
            .pipeline
            .apply(content.to_vec())
            .map_err(ArchiveError::Transform)?;
        header.size = stored.len() as u64;
        header.transforms = self.pipeline.tags();
        header.offset = self.write_media(&header, &stored)?;
        self.index.put(header.clone())?;
        Ok(header)
    }

    /// Write one header block plus `stored` content at the append
    /// position, zero-padded to a record boundary. Returns the block
    /// index of the header.
    fn write_media(&self, header: &Header, stored: &[u8]) -> Result<u64, ArchiveError> {
        let encoded = header.encode()?;
        let blocks = align_to_record(1 + content_blocks(stored.len() as u64), self.record_blocks);
        let mut buf = vec![0u8; (blocks * BLOCK_SIZE) as usize];
        buf[..BLOCK_SIZE as usize].copy_from_slice(&encoded);
        buf[BLOCK_SIZE as usize..BLOCK_SIZE as usize + stored.len()].copy_from_slice(stored);

        let mut media = self.media.lock();
        let block = media.next_block;
        let result = (|| {
            media.drive.open(true)?;
            media.drive.seek(block * BLOCK_SIZE)?;
            media.drive.write_all(&buf)?;
            media.drive.close()
        })();
        if let Err(err) = result {
            let _ = media.drive.close();
            return Err(err.into());
        }
        media.next_block = block + blocks;
        debug!(path = %header.path.display(), block, blocks, "appended entry");
        Ok(block)
    }

    /// Read and reverse-transform the content behind `header`.
    fn read_entry(&self, header: &Header) -> Result<Vec<u8>, ArchiveError> {
        if !self.pipeline.matches(&header.transforms) {
            return Err(ArchiveError::TransformMismatch {
                expected: self.pipeline.tags(),
                found: header.transforms,
            });
        }
        if header.size == 0 {
            return Ok(Vec::new());
        }

        let mut stored = vec![0u8; header.size as usize];
        {
            let mut media = self.media.lock();
            let result = (|| {
                media.drive.open(false)?;
                media.drive.seek(header.content_offset() * BLOCK_SIZE)?;
                media.drive.read_exact(&mut stored)?;
                media.drive.close()
            })();
            if let Err(err) = result {
                let _ = media.drive.close();
                return Err(match err {
                    crate::drive::DriveError::Io(io)
                        if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        ArchiveError::UnexpectedEof {
                            path: header.path.clone(),
                            expected: header.size,
                        }
                    }
                    other => other.into(),
                });
            }
        }
        trace!(path = %header.path.display(), size = header.size, "read entry");
        self.pipeline
            .reverse(stored)
            .map_err(ArchiveError::Transform)
    }

    fn require(&self, path: &Path) -> Result<Header, ArchiveError> {
        self.index
            .get(path)?
            .ok_or_else(|| ArchiveError::NotFound(path.to_path_buf()))
    }

    fn require_file(&self, path: &Path) -> Result<Header, ArchiveError> {
        let header = self.require(path)?;
        if header.kind.is_dir() {
            return Err(ArchiveError::IsADirectory(path.to_path_buf()));
        }
        Ok(header)
    }

    /// The path must not exist and its parent must be a live directory.
    fn require_absent_in_dir(&self, path: &Path) -> Result<(), ArchiveError> {
        if self.index.get(path)?.is_some() {
            return Err(ArchiveError::AlreadyExists(path.to_path_buf()));
        }
        let parent = path
            .parent()
            .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))?;
        let dir = self.require(parent)?;
        if !dir.kind.is_dir() {
            return Err(ArchiveError::NotADirectory(parent.to_path_buf()));
        }
        Ok(())
    }
}

fn normalize(path: &Path) -> Result<PathBuf, ArchiveError> {
    if !path.is_absolute() {
        return Err(ArchiveError::InvalidPath(path.to_path_buf()));
    }
    for component in path.components() {
        match component {
            std::path::Component::RootDir | std::path::Component::Normal(_) => {}
            _ => return Err(ArchiveError::InvalidPath(path.to_path_buf())),
        }
    }
    Ok(path.to_path_buf())
}
