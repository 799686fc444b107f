//! Flat-file drive
//!
//! Treats a regular file (typically a tar archive) as the device. This is
//! the drive the server role puts behind the remote protocol, and the
//! drive a purely local archive mount uses directly.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Drive, DriveError, DriveMode};

pub struct FileDrive {
    path: PathBuf,
    file: Option<File>,
    mode: DriveMode,
    position: u64,
}

impl FileDrive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            mode: DriveMode::Idle,
            position: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> Result<&mut File, DriveError> {
        self.file.as_mut().ok_or(DriveError::NotOpen)
    }
}

impl Drive for FileDrive {
    fn open(&mut self, for_write: bool) -> Result<(), DriveError> {
        if self.mode != DriveMode::Idle {
            self.close()?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(for_write)
            .create(for_write)
            .open(&self.path)?;
        self.file = Some(file);
        self.mode = if for_write {
            DriveMode::Writer
        } else {
            DriveMode::Reader
        };
        self.position = 0;
        tracing::trace!("opened {} as {:?}", self.path.display(), self.mode);
        Ok(())
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
        let n = self.file_mut()?.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, DriveError> {
        if self.mode != DriveMode::Writer {
            return Err(DriveError::NotOpen);
        }
        let n = self.file_mut()?.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<u64, DriveError> {
        let file = self.file_mut()?;
        let new_pos = file.seek(SeekFrom::Start(pos))?;
        self.position = new_pos;
        Ok(new_pos)
    }

    fn close(&mut self) -> Result<(), DriveError> {
        if let Some(file) = self.file.take() {
            if self.mode == DriveMode::Writer {
                file.sync_all()?;
            }
        }
        self.mode = DriveMode::Idle;
        self.position = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_back() {
        let tmp = TempDir::new().unwrap();
        let mut drive = FileDrive::new(tmp.path().join("drive.tar"));

        drive.open(true).unwrap();
        assert_eq!(drive.mode(), DriveMode::Writer);
        drive.write(b"0123456789").unwrap();
        drive.close().unwrap();

        drive.open(false).unwrap();
        assert_eq!(drive.mode(), DriveMode::Reader);
        drive.seek(4).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(drive.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");
    }

    #[test]
    fn test_open_switches_mode_by_closing_first() {
        let tmp = TempDir::new().unwrap();
        let mut drive = FileDrive::new(tmp.path().join("drive.tar"));

        drive.open(true).unwrap();
        drive.write(b"abc").unwrap();
        // Opening the reader implicitly closes the writer.
        drive.open(false).unwrap();
        assert_eq!(drive.mode(), DriveMode::Reader);
        let mut buf = [0u8; 3];
        drive.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut drive = FileDrive::new(tmp.path().join("drive.tar"));
        drive.close().unwrap();
        drive.open(true).unwrap();
        drive.close().unwrap();
        drive.close().unwrap();
        assert_eq!(drive.mode(), DriveMode::Idle);
    }

    #[test]
    fn test_read_without_open_fails() {
        let tmp = TempDir::new().unwrap();
        let mut drive = FileDrive::new(tmp.path().join("drive.tar"));
        let mut buf = [0u8; 1];
        assert!(matches!(drive.read(&mut buf), Err(DriveError::NotOpen)));
    }
}
