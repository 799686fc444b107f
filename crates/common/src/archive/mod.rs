//! Append-only, header-indexed archive filesystem
//!
//! Entries are written as one 512-byte header block followed by their
//! transformed content, zero-padded to a record boundary. The media is
//! never rewritten in place: every mutation appends, and the metadata
//! index decides which header currently represents each path. This is
//! what makes sequential media such as tape a first-class backing
//! drive.

mod fs;
mod header;
mod index;
mod transform;

pub use fs::{ArchiveFs, ArchiveOptions, RootHandle, DEFAULT_RECORD_BLOCKS};
pub use header::{align_to_record, content_blocks, Header, BLOCK_SIZE};
pub use index::{FileIndex, IndexError, MemoryIndex, MetadataIndex};
pub use transform::{Identity, Pipeline, Transform, TransformSet, TransformTag};

use std::path::PathBuf;

use crate::drive::DriveError;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no such entry: {0}")]
    NotFound(PathBuf),

    #[error("entry already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("is a directory: {0}")]
    IsADirectory(PathBuf),

    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("path does not fit in a header: {0}")]
    PathTooLong(PathBuf),

    #[error("header field out of range: {0}")]
    HeaderField(&'static str),

    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("unexpected end of media reading {path}: wanted {expected} bytes")]
    UnexpectedEof { path: PathBuf, expected: u64 },

    #[error("entry transforms {found:?} do not match the configured pipeline {expected:?}")]
    TransformMismatch {
        expected: TransformSet,
        found: TransformSet,
    },

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("transform error: {0}")]
    Transform(#[source] std::io::Error),
}

impl From<ArchiveError> for crate::vfs::FsError {
    fn from(err: ArchiveError) -> Self {
        use crate::vfs::FsError;
        match err {
            ArchiveError::NotFound(path) => FsError::NotFound(path),
            ArchiveError::AlreadyExists(path) => FsError::AlreadyExists(path),
            ArchiveError::NotADirectory(path) => FsError::NotADirectory(path),
            ArchiveError::IsADirectory(path) => FsError::IsADirectory(path),
            ArchiveError::NotEmpty(path) => FsError::NotEmpty(path),
            ArchiveError::InvalidPath(path) | ArchiveError::PathTooLong(path) => {
                FsError::InvalidPath(path)
            }
            other => FsError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
