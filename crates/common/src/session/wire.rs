//! Length-prefixed bincode frames
//!
//! Both the pairing handshake and the drive protocol ride on the same
//! framing: a little-endian u32 length followed by a bincode payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Drive writes are chunked well below this.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Messages exchanged while brokering a peer pairing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Handshake {
    /// Sent by the client: request pairing under a community identifier.
    Hello { community: String },
    /// Sent by the server: pairing accepted, the session is usable.
    Welcome,
    /// Sent by the server: pairing refused (wrong community, peer slot taken).
    Reject { reason: String },
}

pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(message).map_err(std::io::Error::other)?;
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(std::io::Error::other("frame too large"));
    }
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<T, R>(reader: &mut R) -> std::io::Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::other("frame too large"));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(std::io::Error::other)
}
