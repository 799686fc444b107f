use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};

use super::wire::{read_frame, write_frame, Handshake};

/// Which side of the pairing this process plays.
///
/// A server binds the rendezvous address, accepts exactly one peer for its
/// community, and then stops accepting. A client initiates toward the
/// rendezvous address and requests pairing under the community identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Lifecycle of a session. `Error` is absorbing and reachable from
/// `Connecting` or `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not reach rendezvous {address}: {source}")]
    Unreachable {
        address: String,
        source: std::io::Error,
    },
    #[error("pairing rejected: {0}")]
    Rejected(String),
    #[error("handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("session closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared view of a session's lifecycle, cloneable across tasks.
///
/// The drive adapter holds one of these so that closing the session from
/// anywhere unblocks its pending operations.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl SessionHandle {
    fn new() -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            closed_tx: Arc::new(closed_tx),
            closed_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Close the session. Idempotent; pending drive operations observe the
    /// close and fail with a "session closed" condition.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Error) {
            *state = SessionState::Closed;
        }
        drop(state);
        let _ = self.closed_tx.send(true);
    }

    /// Mark a live session failed (transport error). A session that
    /// already reached Closed or Error keeps its terminal state.
    pub(crate) fn fail(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SessionState::Connecting | SessionState::Open) {
            *state = SessionState::Error;
        }
        drop(state);
        let _ = self.closed_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolve once the session is closed or failed.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// One negotiated peer pairing: a bidirectional byte stream plus the
/// lifecycle handle. The stream is taken exactly once, by whichever layer
/// drives it (the remote drive adapter on the client, the serve loop on
/// the server).
#[derive(Debug)]
pub struct Session {
    role: Role,
    community: String,
    handle: SessionHandle,
    stream: Option<TcpStream>,
}

impl Session {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn community(&self) -> &str {
        &self.community
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Take ownership of the underlying stream. Returns `None` on the
    /// second call.
    pub(crate) fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }
}

/// One-shot gate for the `Connecting → Open` transition.
///
/// `ready` consumes the gate: the signal fires at most once and callers
/// wait for it exactly once before building a drive on the session.
pub struct ReadyGate {
    rx: oneshot::Receiver<Session>,
}

impl ReadyGate {
    pub async fn ready(self) -> Result<Session, SessionError> {
        self.rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Stream of negotiation errors. May yield several events (one per failed
/// pairing attempt); the caller decides whether to call `connect` again.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionError>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionError> {
        self.rx.try_recv().ok()
    }
}

/// Negotiates peer pairings over the signaling rendezvous address.
///
/// The manager never retries on its own; a failed attempt surfaces on the
/// event stream and the caller may call [`ConnectionManager::connect`]
/// again with the same parameters.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    rendezvous: String,
    community: String,
    role: Role,
}

impl ConnectionManager {
    pub fn new(
        rendezvous: impl Into<String>,
        community: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            rendezvous: rendezvous.into(),
            community: community.into(),
            role,
        }
    }

    /// Start negotiating a session. Negotiation runs concurrently with the
    /// caller; the returned gate fires once when the session is usable.
    pub fn connect(&self) -> (ReadyGate, SessionEvents) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = SessionHandle::new();
        handle.set_state(SessionState::Connecting);

        let manager = self.clone();
        tokio::spawn(async move {
            match manager.role {
                Role::Server => manager.accept_peer(handle, ready_tx, event_tx).await,
                Role::Client => manager.dial_peer(handle, ready_tx, event_tx).await,
            }
        });

        (ReadyGate { rx: ready_rx }, SessionEvents { rx: event_rx })
    }

    async fn accept_peer(
        self,
        handle: SessionHandle,
        ready_tx: oneshot::Sender<Session>,
        event_tx: mpsc::UnboundedSender<SessionError>,
    ) {
        let listener = match TcpListener::bind(&self.rendezvous).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!("failed to bind rendezvous {}: {}", self.rendezvous, err);
                handle.fail();
                let _ = event_tx.send(SessionError::Unreachable {
                    address: self.rendezvous.clone(),
                    source: err,
                });
                return;
            }
        };
        tracing::info!(
            "listening on {} for community {:?}",
            self.rendezvous,
            self.community
        );

        // One-to-one pairing: accept peers until one passes the handshake,
        // then stop accepting entirely.
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    handle.fail();
                    let _ = event_tx.send(SessionError::Io(err));
                    return;
                }
            };

            match read_frame::<Handshake, _>(&mut stream).await {
                Ok(Handshake::Hello { community }) if community == self.community => {
                    if let Err(err) = write_frame(&mut stream, &Handshake::Welcome).await {
                        let _ = event_tx.send(SessionError::Handshake(err));
                        continue;
                    }
                    tracing::info!("paired with peer {}", peer);
                    handle.set_state(SessionState::Open);
                    let session = Session {
                        role: Role::Server,
                        community: self.community.clone(),
                        handle: handle.clone(),
                        stream: Some(stream),
                    };
                    let _ = ready_tx.send(session);
                    return;
                }
                Ok(Handshake::Hello { community }) => {
                    tracing::warn!(
                        "rejecting peer {}: community {:?} does not match",
                        peer,
                        community
                    );
                    let _ = write_frame(
                        &mut stream,
                        &Handshake::Reject {
                            reason: "unknown community".to_string(),
                        },
                    )
                    .await;
                    let _ = event_tx.send(SessionError::Rejected(format!(
                        "peer {} presented community {:?}",
                        peer, community
                    )));
                }
                Ok(other) => {
                    tracing::warn!("unexpected handshake frame from {}: {:?}", peer, other);
                    let _ = event_tx.send(SessionError::Rejected(
                        "unexpected handshake frame".to_string(),
                    ));
                }
                Err(err) => {
                    let _ = event_tx.send(SessionError::Handshake(err));
                }
            }
        }
    }

    async fn dial_peer(
        self,
        handle: SessionHandle,
        ready_tx: oneshot::Sender<Session>,
        event_tx: mpsc::UnboundedSender<SessionError>,
    ) {
        let mut stream = match TcpStream::connect(&self.rendezvous).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("failed to reach rendezvous {}: {}", self.rendezvous, err);
                handle.fail();
                let _ = event_tx.send(SessionError::Unreachable {
                    address: self.rendezvous.clone(),
                    source: err,
                });
                return;
            }
        };

        let hello = Handshake::Hello {
            community: self.community.clone(),
        };
        if let Err(err) = write_frame(&mut stream, &hello).await {
            handle.fail();
            let _ = event_tx.send(SessionError::Handshake(err));
            return;
        }

        match read_frame::<Handshake, _>(&mut stream).await {
            Ok(Handshake::Welcome) => {
                tracing::info!(
                    "paired with server at {} (community {:?})",
                    self.rendezvous,
                    self.community
                );
                handle.set_state(SessionState::Open);
                let session = Session {
                    role: Role::Client,
                    community: self.community.clone(),
                    handle: handle.clone(),
                    stream: Some(stream),
                };
                let _ = ready_tx.send(session);
            }
            Ok(Handshake::Reject { reason }) => {
                tracing::warn!("pairing rejected: {}", reason);
                handle.fail();
                let _ = event_tx.send(SessionError::Rejected(reason));
            }
            Ok(other) => {
                handle.fail();
                let _ = event_tx.send(SessionError::Rejected(format!(
                    "unexpected handshake frame: {:?}",
                    other
                )));
            }
            Err(err) => {
                handle.fail();
                let _ = event_tx.send(SessionError::Handshake(err));
            }
        }
    }
}
