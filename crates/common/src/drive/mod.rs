//! Drive primitive
//!
//! The archive filesystem is written against a classic blocking
//! open-then-stream-then-close device. [`Drive`] is that contract; the
//! implementations are a local flat file ([`FileDrive`]) and a remote
//! file reached over a peer session ([`RemoteDrive`]), with the server
//! side of the remote protocol in [`serve`].

mod file;
mod remote;
pub mod serve;
pub mod wire;

pub use file::FileDrive;
pub use remote::RemoteDrive;

/// Exclusive open mode of a drive. At most one of Reader/Writer is active
/// at any instant; the adapter itself enforces this, not its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Idle,
    Reader,
    Writer,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("session closed")]
    SessionClosed,
    #[error("drive is not open")]
    NotOpen,
    #[error("remote drive error: {0}")]
    Remote(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking seek/read/write/close storage primitive.
///
/// `open` with a mode already active closes the previous mode first.
/// `close` is idempotent. Errors from the backing transport surface as
/// I/O errors; retry policy belongs to the caller.
pub trait Drive: Send {
    fn open(&mut self, for_write: bool) -> Result<(), DriveError>;

    fn mode(&self) -> DriveMode;

    /// Current stream position in bytes.
    fn position(&self) -> u64;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriveError>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, DriveError>;

    fn seek(&mut self, pos: u64) -> Result<u64, DriveError>;

    fn close(&mut self) -> Result<(), DriveError>;
}

/// Extension helpers shared by all drives.
pub trait DriveExt: Drive {
    /// Read exactly `buf.len()` bytes or fail. A short read is reported
    /// with the number of bytes actually obtained.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DriveError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(DriveError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read: {} of {} bytes", filled, buf.len()),
                )));
            }
            filled += n;
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), DriveError> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(DriveError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "drive accepted zero bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }
}

impl<D: Drive + ?Sized> DriveExt for D {}
