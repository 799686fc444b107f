//! Shared test utilities for mount integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use common::archive::{ArchiveFs, ArchiveOptions, MemoryIndex, MetadataIndex, Pipeline};
use common::cache::{CacheFs, WriteCacheConfig};
use common::drive::{Drive, FileDrive};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Route test logs through the capture, once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// An initialized archive over a flat file in a fresh temp dir.
pub fn local_archive() -> (Arc<ArchiveFs>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let archive = archive_on(
        Box::new(FileDrive::new(temp_dir.path().join("media.tar"))),
        Arc::new(MemoryIndex::new()),
    );
    (archive, temp_dir)
}

/// Build and initialize an archive over any drive/index pair.
pub fn archive_on(drive: Box<dyn Drive>, index: Arc<dyn MetadataIndex>) -> Arc<ArchiveFs> {
    let archive = ArchiveFs::new(drive, index, Pipeline::identity(), ArchiveOptions::default())
        .unwrap();
    archive.initialize(Path::new("/"), 0o755).unwrap();
    Arc::new(archive)
}

/// The filesystem a mount would actually serve: cache over archive.
pub fn cached(archive: Arc<ArchiveFs>) -> CacheFs {
    CacheFs::new(archive, WriteCacheConfig::Memory)
}

/// Run a blocking closure off the async runtime and hand back its
/// result. The archive and drive layers block by contract.
pub async fn blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}
