//! Remote drive adapter
//!
//! Bridges the asynchronous peer session to the blocking [`Drive`]
//! contract. Blocking callers push commands onto a channel; a dedicated
//! I/O task owns the session stream and runs one request/response
//! round-trip at a time. Closing the session unblocks any pending call
//! with a "session closed" error instead of hanging.
//!
//! The blocking methods must be called from outside the async runtime
//! (a dedicated thread or `spawn_blocking`), which is where the archive
//! filesystem runs anyway.

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::session::wire::{read_frame, write_frame};
use crate::session::{Session, SessionError, SessionHandle};

use super::wire::{DriveRequest, DriveResponse, MAX_PAYLOAD};
use super::{Drive, DriveError, DriveMode};

struct Command {
    request: DriveRequest,
    reply: oneshot::Sender<Result<DriveResponse, DriveError>>,
}

pub struct RemoteDrive {
    mode: DriveMode,
    position: u64,
    cmd_tx: mpsc::Sender<Command>,
    session: SessionHandle,
}

impl RemoteDrive {
    /// Build the adapter over an open session, taking ownership of its
    /// stream. Must be called within the async runtime (it spawns the I/O
    /// task); the resulting drive itself is blocking.
    pub fn new(session: &mut Session) -> Result<Self, SessionError> {
        let stream = session.take_stream().ok_or(SessionError::Closed)?;
        let handle = session.handle();
        // Strict request/response: a queue depth of one keeps callers
        // honest about the single logical stream.
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        tokio::spawn(run_io(stream, cmd_rx, handle.clone()));
        Ok(Self {
            mode: DriveMode::Idle,
            position: 0,
            cmd_tx,
            session: handle,
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn call(&self, request: DriveRequest) -> Result<DriveResponse, DriveError> {
        if self.session.is_closed() {
            return Err(DriveError::SessionClosed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .blocking_send(Command {
                request,
                reply: reply_tx,
            })
            .map_err(|_| DriveError::SessionClosed)?;
        match reply_rx.blocking_recv() {
            Ok(Ok(DriveResponse::Error { message })) => Err(DriveError::Remote(message)),
            Ok(result) => result,
            // The I/O task dropped the reply without answering.
            Err(_) => Err(DriveError::SessionClosed),
        }
    }
}

impl Drive for RemoteDrive {
    fn open(&mut self, for_write: bool) -> Result<(), DriveError> {
        if self.mode != DriveMode::Idle {
            self.close()?;
        }
        match self.call(DriveRequest::Open { for_write })? {
            DriveResponse::Opened => {
                self.mode = if for_write {
                    DriveMode::Writer
                } else {
                    DriveMode::Reader
                };
                self.position = 0;
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    fn mode(&self) -> DriveMode {
        self.mode
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriveError> {
        if self.mode != DriveMode::Reader {
            return Err(DriveError::NotOpen);
        }
        let len = buf.len().min(MAX_PAYLOAD) as u32;
        match self.call(DriveRequest::Read { len })? {
            DriveResponse::Data { data } => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                self.position += n as u64;
                Ok(n)
            }
            other => Err(unexpected(other)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, DriveError> {
        if self.mode != DriveMode::Writer {
            return Err(DriveError::NotOpen);
        }
        let chunk = &buf[..buf.len().min(MAX_PAYLOAD)];
        match self.call(DriveRequest::Write {
            data: chunk.to_vec(),
        })? {
            DriveResponse::Written { n } => {
                self.position += n as u64;
                Ok(n as usize)
            }
            other => Err(unexpected(other)),
        }
    }

    fn seek(&mut self, pos: u64) -> Result<u64, DriveError> {
        match self.call(DriveRequest::Seek { pos })? {
            DriveResponse::Position { pos } => {
                self.position = pos;
                Ok(pos)
            }
            other => Err(unexpected(other)),
        }
    }

    fn close(&mut self) -> Result<(), DriveError> {
        if self.mode == DriveMode::Idle {
            return Ok(());
        }
        match self.call(DriveRequest::Close) {
            Ok(DriveResponse::Closed) | Err(DriveError::SessionClosed) => {
                // A closed session means the remote end is gone; there is
                // nothing left to close and close stays idempotent.
                self.mode = DriveMode::Idle;
                self.position = 0;
                Ok(())
            }
            Ok(other) => Err(unexpected(other)),
            Err(err) => Err(err),
        }
    }
}

fn unexpected(response: DriveResponse) -> DriveError {
    DriveError::Remote(format!("unexpected response: {:?}", response))
}

async fn run_io(mut stream: TcpStream, mut cmd_rx: mpsc::Receiver<Command>, session: SessionHandle) {
    loop {
        let command = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
            _ = session.closed() => break,
        };

        // Closing the session aborts an in-flight round-trip; the caller
        // observes the error within a bounded time.
        let result = tokio::select! {
            res = roundtrip(&mut stream, &command.request) => res.map_err(DriveError::Io),
            _ = session.closed() => Err(DriveError::SessionClosed),
        };

        let transport_failed = matches!(result, Err(DriveError::Io(_)));
        let session_closed = matches!(result, Err(DriveError::SessionClosed));
        let _ = command.reply.send(result);

        if transport_failed {
            tracing::warn!("remote drive transport failed, failing session");
            session.fail();
            break;
        }
        if session_closed {
            break;
        }
    }

    // Fail whatever is still queued rather than leaving callers blocked.
    cmd_rx.close();
    while let Ok(command) = cmd_rx.try_recv() {
        let _ = command.reply.send(Err(DriveError::SessionClosed));
    }
    tracing::debug!("remote drive i/o task exited");
}

async fn roundtrip(
    stream: &mut TcpStream,
    request: &DriveRequest,
) -> std::io::Result<DriveResponse> {
    write_frame(stream, request).await?;
    read_frame(stream).await
}
