//! End-to-end tests for the archive stack over a remote drive

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ::common::archive::{MemoryIndex, MetadataIndex};
use ::common::drive::{serve, Drive, DriveError, RemoteDrive};
use ::common::session::{ConnectionManager, Role, Session};
use ::common::vfs::Filesystem;

/// Negotiate one client/server pairing on a loopback rendezvous. The
/// client redials until the listener is up, as a real caller would on a
/// failed attempt.
async fn pair(addr: &str) -> (Session, Session) {
    let server = ConnectionManager::new(addr, "test", Role::Server);
    let (server_ready, _server_events) = server.connect();

    let client = ConnectionManager::new(addr, "test", Role::Client);
    let client_session = loop {
        let (ready, _events) = client.connect();
        match ready.ready().await {
            Ok(session) => break session,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    };

    let server_session = server_ready.ready().await.unwrap();
    (server_session, client_session)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_mount_roundtrip() {
    common::init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let media = temp.path().join("media.tar");
    let index: Arc<dyn MetadataIndex> = Arc::new(MemoryIndex::new());

    // First session: create and write a file through the full stack.
    {
        let (server_session, mut client_session) = pair("127.0.0.1:19890").await;
        let serve_media = media.clone();
        let server =
            tokio::spawn(async move { serve::serve(server_session, &serve_media).await });

        let drive = Box::new(RemoteDrive::new(&mut client_session).unwrap());
        let index = index.clone();
        let fs = common::blocking(move || {
            let fs = common::cached(common::archive_on(drive, index));
            fs.create(Path::new("/hello.txt"), 0o644).unwrap();
            fs.write(Path::new("/hello.txt"), 0, b"hi").unwrap();
            fs.flush(Path::new("/hello.txt")).unwrap();
            assert_eq!(fs.read(Path::new("/hello.txt"), 0, 16).unwrap(), b"hi");
            fs
        })
        .await;
        drop(fs);

        client_session.close();
        server.await.unwrap().unwrap();
    }

    // Second session over the same media: the content is durable.
    let (server_session, mut client_session) = pair("127.0.0.1:19891").await;
    let serve_media = media.clone();
    let server = tokio::spawn(async move { serve::serve(server_session, &serve_media).await });

    let drive = Box::new(RemoteDrive::new(&mut client_session).unwrap());
    common::blocking(move || {
        let fs = common::cached(common::archive_on(drive, index));
        assert_eq!(fs.read(Path::new("/hello.txt"), 0, 16).unwrap(), b"hi");
    })
    .await;

    client_session.close();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_unblocks_pending_operation() {
    common::init_tracing();
    // The server side pairs but never serves, so the client's open
    // request can only be resolved by closing the session.
    let (_server_session, mut client_session) = pair("127.0.0.1:19892").await;
    let handle = client_session.handle();

    let mut drive = RemoteDrive::new(&mut client_session).unwrap();
    let pending = tokio::task::spawn_blocking(move || drive.open(false));

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.close();

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("close must unblock the pending operation")
        .unwrap();
    assert!(matches!(result, Err(DriveError::SessionClosed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_drive_reports_server_errors() {
    common::init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let (server_session, mut client_session) = pair("127.0.0.1:19893").await;
    let media = temp.path().join("missing-dir").join("media.tar");
    let server = tokio::spawn(async move { serve::serve(server_session, &media).await });

    let mut drive = RemoteDrive::new(&mut client_session).unwrap();
    let result = common::blocking(move || {
        // Opening for read cannot create the file, so the server
        // answers with an error frame instead of dropping the session.
        let err = drive.open(false).unwrap_err();
        (err, drive)
    })
    .await;
    assert!(matches!(result.0, DriveError::Remote(_)));

    client_session.close();
    server.await.unwrap().unwrap();
}
