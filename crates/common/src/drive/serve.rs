//! Server side of the remote drive protocol
//!
//! The server role owns the flat tar file and applies drive requests to
//! it one at a time, answering each with a single response frame. The
//! loop exits when the peer disconnects or the session is closed.

use std::path::Path;

use crate::session::wire::{read_frame, write_frame};
use crate::session::{Session, SessionError};

use super::wire::{DriveRequest, DriveResponse, MAX_PAYLOAD};
use super::{Drive, DriveError, FileDrive};

/// Serve a local file as the drive behind `session` until the peer
/// disconnects or the session is closed.
pub async fn serve(mut session: Session, drive_path: &Path) -> Result<(), SessionError> {
    let mut stream = session.take_stream().ok_or(SessionError::Closed)?;
    let handle = session.handle();
    let mut drive = FileDrive::new(drive_path);

    tracing::info!("serving drive {} to peer", drive_path.display());

    loop {
        let request: DriveRequest = tokio::select! {
            frame = read_frame(&mut stream) => match frame {
                Ok(request) => request,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::info!("peer disconnected, drive serve loop done");
                    handle.close();
                    return Ok(());
                }
                Err(err) => {
                    handle.fail();
                    return Err(SessionError::Io(err));
                }
            },
            _ = handle.closed() => {
                tracing::info!("session closed, drive serve loop done");
                return Ok(());
            }
        };

        let response = apply(&mut drive, request);
        if let Err(err) = write_frame(&mut stream, &response).await {
            handle.fail();
            return Err(SessionError::Io(err));
        }
    }
}

/// Apply one request to the local drive. Drive failures become error
/// responses for the peer, never a crash of the serve loop.
fn apply(drive: &mut FileDrive, request: DriveRequest) -> DriveResponse {
    let result = match request {
        DriveRequest::Open { for_write } => drive.open(for_write).map(|_| DriveResponse::Opened),
        DriveRequest::Read { len } => {
            let mut buf = vec![0u8; (len as usize).min(MAX_PAYLOAD)];
            drive.read(&mut buf).map(|n| {
                buf.truncate(n);
                DriveResponse::Data { data: buf }
            })
        }
        DriveRequest::Write { data } => drive
            .write(&data)
            .map(|n| DriveResponse::Written { n: n as u32 }),
        DriveRequest::Seek { pos } => drive.seek(pos).map(|pos| DriveResponse::Position { pos }),
        DriveRequest::Close => drive.close().map(|_| DriveResponse::Closed),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!("drive request failed: {}", err);
            DriveResponse::Error {
                message: error_message(err),
            }
        }
    }
}

fn error_message(err: DriveError) -> String {
    match err {
        DriveError::NotOpen => "drive is not open".to_string(),
        other => other.to_string(),
    }
}
