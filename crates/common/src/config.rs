//! Mount configuration
//!
//! Plain data assembled by the CLI (or embedding code) and handed to
//! the composition code that builds the backend stack. Defaults match
//! the conventional deployment: a rendezvous broker on port 9090, the
//! "test" community, and 20-block records.

use std::path::PathBuf;

use crate::archive::DEFAULT_RECORD_BLOCKS;
use crate::cache::WriteCacheConfig;
use crate::session::Role;

pub const DEFAULT_RENDEZVOUS: &str = "0.0.0.0:9090";
pub const DEFAULT_COMMUNITY: &str = "test";

/// Everything needed to bring up one mount.
#[derive(Debug, Clone)]
pub struct Config {
    pub mountpoint: PathBuf,
    /// Owner reported for all entries. `None` means the mounting user.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub backend: BackendSpec,
}

/// Which backend serves the mount.
#[derive(Debug, Clone)]
pub enum BackendSpec {
    /// Throwaway in-memory tree.
    Memory,
    /// Passthrough to a directory on local disk.
    Disk { storage: PathBuf },
    /// Archive over a local or remote drive.
    Archive(ArchiveSpec),
}

#[derive(Debug, Clone)]
pub struct ArchiveSpec {
    pub drive: DriveSource,
    /// Record size in 512-byte blocks.
    pub record_blocks: u64,
    pub write_cache: WriteCacheConfig,
    pub metadata: MetadataSpec,
}

impl ArchiveSpec {
    pub fn local(media: impl Into<PathBuf>) -> Self {
        Self {
            drive: DriveSource::Path(media.into()),
            record_blocks: DEFAULT_RECORD_BLOCKS,
            write_cache: WriteCacheConfig::Memory,
            metadata: MetadataSpec::Memory,
        }
    }

    pub fn remote(rendezvous: impl Into<String>, community: impl Into<String>, role: Role) -> Self {
        Self {
            drive: DriveSource::Remote {
                rendezvous: rendezvous.into(),
                community: community.into(),
                role,
            },
            record_blocks: DEFAULT_RECORD_BLOCKS,
            write_cache: WriteCacheConfig::Memory,
            metadata: MetadataSpec::Memory,
        }
    }
}

/// Where the archive's backing drive lives.
#[derive(Debug, Clone)]
pub enum DriveSource {
    /// Flat file on local disk.
    Path(PathBuf),
    /// Drive exposed by a peer, reached through a rendezvous broker.
    Remote {
        rendezvous: String,
        community: String,
        role: Role,
    },
}

/// Where the metadata index lives.
#[derive(Debug, Clone)]
pub enum MetadataSpec {
    Memory,
    File { path: PathBuf },
}
