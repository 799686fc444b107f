//! Remote drive protocol
//!
//! Strict request/response over the session stream: the client sends one
//! [`DriveRequest`] frame and waits for exactly one [`DriveResponse`]
//! frame before issuing the next. The framing itself is shared with the
//! handshake (see [`crate::session::wire`]).

/// Largest read/write payload carried in a single frame. Larger transfers
/// are chunked by the caller; the archive layer's record-aligned writes
/// stay far below this.
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum DriveRequest {
    Open { for_write: bool },
    Read { len: u32 },
    Write { data: Vec<u8> },
    Seek { pos: u64 },
    Close,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum DriveResponse {
    Opened,
    /// Bytes delivered for a `Read`; shorter than requested at end of
    /// media, empty at exact end.
    Data { data: Vec<u8> },
    Written { n: u32 },
    Position { pos: u64 },
    Closed,
    Error { message: String },
}
