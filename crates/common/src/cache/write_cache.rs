//! Staging area for in-flight file content
//!
//! The archive only accepts whole-file appends, but mounts hand us
//! partial writes at arbitrary offsets. Dirty files are staged here in
//! full, then promoted to the archive in one append on flush.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

/// Where staged content lives while a file is dirty.
#[derive(Debug, Clone, Default)]
pub enum WriteCacheConfig {
    /// Buffer in process memory. Fastest, bounded by RAM.
    #[default]
    Memory,
    /// Spill each dirty file to an unlinked temporary file under `dir`.
    File { dir: PathBuf },
}

enum Slot {
    Memory(Vec<u8>),
    File(NamedTempFile),
}

/// One dirty file's staged content.
pub struct Staged {
    slot: Slot,
    len: u64,
}

impl Staged {
    pub fn new(config: &WriteCacheConfig, initial: Vec<u8>) -> std::io::Result<Self> {
        let len = initial.len() as u64;
        let slot = match config {
            WriteCacheConfig::Memory => Slot::Memory(initial),
            WriteCacheConfig::File { dir } => {
                std::fs::create_dir_all(dir)?;
                let mut file = NamedTempFile::new_in(dir)?;
                file.write_all(&initial)?;
                Slot::File(file)
            }
        };
        Ok(Self { slot, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write at an arbitrary offset, zero-filling any gap.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        match &mut self.slot {
            Slot::Memory(buf) => {
                let end = offset as usize + data.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[offset as usize..end].copy_from_slice(data);
            }
            Slot::File(file) => {
                if offset > self.len {
                    file.as_file().set_len(offset)?;
                }
                let handle = file.as_file_mut();
                handle.seek(SeekFrom::Start(offset))?;
                handle.write_all(data)?;
            }
        }
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    /// Read up to `size` bytes at `offset`. Short at end of content.
    pub fn read(&mut self, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let take = (size as u64).min(self.len - offset) as usize;
        match &mut self.slot {
            Slot::Memory(buf) => Ok(buf[offset as usize..offset as usize + take].to_vec()),
            Slot::File(file) => {
                let handle = file.as_file_mut();
                handle.seek(SeekFrom::Start(offset))?;
                let mut out = vec![0u8; take];
                handle.read_exact(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Resize, zero-extending on growth.
    pub fn resize(&mut self, size: u64) -> std::io::Result<()> {
        match &mut self.slot {
            Slot::Memory(buf) => buf.resize(size as usize, 0),
            Slot::File(file) => file.as_file().set_len(size)?,
        }
        self.len = size;
        Ok(())
    }

    /// Consume the staged content for promotion to the archive.
    pub fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self.slot {
            Slot::Memory(buf) => Ok(buf),
            Slot::File(file) => {
                let mut handle = file.into_file();
                handle.seek(SeekFrom::Start(0))?;
                let mut out = Vec::with_capacity(self.len as usize);
                handle.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> Vec<(&'static str, WriteCacheConfig)> {
        let dir = tempfile::tempdir().unwrap().keep();
        vec![
            ("memory", WriteCacheConfig::Memory),
            ("file", WriteCacheConfig::File { dir }),
        ]
    }

    #[test]
    fn test_write_read_with_gap() {
        for (name, config) in configs() {
            let mut staged = Staged::new(&config, b"abc".to_vec()).unwrap();
            staged.write_at(5, b"xy").unwrap();
            assert_eq!(staged.len(), 7, "{name}");
            assert_eq!(staged.read(0, 16).unwrap(), b"abc\0\0xy", "{name}");
            assert_eq!(staged.read(5, 1).unwrap(), b"x", "{name}");
            assert!(staged.read(7, 4).unwrap().is_empty(), "{name}");
        }
    }

    #[test]
    fn test_resize_and_promote() {
        for (name, config) in configs() {
            let mut staged = Staged::new(&config, b"abcdef".to_vec()).unwrap();
            staged.resize(3).unwrap();
            staged.resize(5).unwrap();
            assert_eq!(staged.into_bytes().unwrap(), b"abc\0\0", "{name}");
        }
    }
}
