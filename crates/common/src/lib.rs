pub mod archive;
/**
 * Write-back caching between a mount and the
 *  archive, staging dirty files in memory or
 *  on local disk until flush.
 */
pub mod cache;
/**
 * Plain-data configuration describing a mount:
 *  which backend, which drive, which peers.
 */
pub mod config;
/**
 * Blocking drive primitive: local flat files and
 *  drives exposed by a remote peer, plus the
 *  serving side of the remote protocol.
 */
pub mod drive;
/**
 * Mount front-end adapting a filesystem to the
 *  errno-based contract a kernel adapter expects.
 */
pub mod frontend;
/**
 * Peer session negotiation over the rendezvous
 *  address, with lifecycle tracking shared
 *  between the drive and its owner.
 */
pub mod session;
/**
 * Filesystem contract plus the local backends
 *  (in-memory tree, on-disk passthrough).
 */
pub mod vfs;

pub mod prelude {
    pub use crate::archive::{ArchiveFs, ArchiveOptions, FileIndex, MemoryIndex, Pipeline};
    pub use crate::cache::{CacheFs, WriteCacheConfig};
    pub use crate::config::{BackendSpec, Config, DriveSource, MetadataSpec};
    pub use crate::drive::{Drive, DriveMode, FileDrive, RemoteDrive};
    pub use crate::frontend::MountFrontend;
    pub use crate::session::{ConnectionManager, Role, Session, SessionState};
    pub use crate::vfs::{DiskFs, Filesystem, FsError, MemoryFs};
}
