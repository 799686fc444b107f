//! On-media header blocks
//!
//! Every archive entry begins with a single 512-byte header block in the
//! classic ustar layout, extended with three trailing transform tag bytes
//! in the otherwise-unused padding. Numeric fields are NUL-terminated
//! octal, the checksum is computed with the checksum field blanked to
//! spaces, and long paths spill into the ustar prefix field.

use std::path::{Path, PathBuf};

use crate::archive::transform::{TransformSet, TransformTag};
use crate::archive::ArchiveError;
use crate::vfs::{EntryKind, FileAttr};

/// Size of one media block. Headers occupy exactly one block and content
/// is zero-padded up to a block boundary.
pub const BLOCK_SIZE: u64 = 512;

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;
const MAGIC: &[u8; 6] = b"ustar\0";
const VERSION: &[u8; 2] = b"00";

const TYPE_FILE: u8 = b'0';
const TYPE_SYMLINK: u8 = b'2';
const TYPE_DIRECTORY: u8 = b'5';

// Field offsets within the block.
const OFF_NAME: usize = 0;
const OFF_MODE: usize = 100;
const OFF_UID: usize = 108;
const OFF_GID: usize = 116;
const OFF_SIZE: usize = 124;
const OFF_MTIME: usize = 136;
const OFF_CHKSUM: usize = 148;
const OFF_TYPE: usize = 156;
const OFF_LINK: usize = 157;
const OFF_MAGIC: usize = 257;
const OFF_VERSION: usize = 263;
const OFF_PREFIX: usize = 345;
const OFF_TRANSFORMS: usize = 500;

/// Number of blocks needed to hold `len` content bytes.
pub fn content_blocks(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE)
}

/// Round a block count up to the next record boundary.
pub fn align_to_record(blocks: u64, record_blocks: u64) -> u64 {
    blocks.div_ceil(record_blocks) * record_blocks
}

/// Decoded header of one archive entry.
///
/// `offset` is the block index of this header on the media; it is not
/// part of the encoded block and is maintained by the metadata index.
/// `size` counts the stored bytes that follow the header, after any
/// transform pipeline has been applied.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: u64,
    pub link: Option<PathBuf>,
    pub transforms: TransformSet,
    pub offset: u64,
}

impl Header {
    /// The attributes a mount reports for this entry.
    pub fn attr(&self) -> FileAttr {
        FileAttr {
            kind: self.kind,
            size: self.size,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            mtime: self.mtime,
        }
    }

    /// Block index of the first content block, immediately after the
    /// header block.
    pub fn content_offset(&self) -> u64 {
        self.offset + 1
    }

    pub fn encode(&self) -> Result<[u8; BLOCK_SIZE as usize], ArchiveError> {
        let mut block = [0u8; BLOCK_SIZE as usize];

        let (prefix, name) = split_path(&self.path)?;
        block[OFF_NAME..OFF_NAME + name.len()].copy_from_slice(name.as_bytes());
        block[OFF_PREFIX..OFF_PREFIX + prefix.len()].copy_from_slice(prefix.as_bytes());

        put_octal(&mut block[OFF_MODE..OFF_MODE + 8], self.mode as u64, "mode")?;
        put_octal(&mut block[OFF_UID..OFF_UID + 8], self.uid as u64, "uid")?;
        put_octal(&mut block[OFF_GID..OFF_GID + 8], self.gid as u64, "gid")?;
        put_octal(&mut block[OFF_SIZE..OFF_SIZE + 12], self.size, "size")?;
        put_octal(&mut block[OFF_MTIME..OFF_MTIME + 12], self.mtime, "mtime")?;

        block[OFF_TYPE] = match self.kind {
            EntryKind::File => TYPE_FILE,
            EntryKind::Directory => TYPE_DIRECTORY,
            EntryKind::Symlink => TYPE_SYMLINK,
        };

        if let Some(link) = &self.link {
            let link = path_str(link)?;
            if link.len() > NAME_LEN {
                return Err(ArchiveError::PathTooLong(self.path.clone()));
            }
            block[OFF_LINK..OFF_LINK + link.len()].copy_from_slice(link.as_bytes());
        }

        block[OFF_MAGIC..OFF_MAGIC + 6].copy_from_slice(MAGIC);
        block[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(VERSION);

        block[OFF_TRANSFORMS] = self.transforms.compression.as_byte();
        block[OFF_TRANSFORMS + 1] = self.transforms.encryption.as_byte();
        block[OFF_TRANSFORMS + 2] = self.transforms.signature.as_byte();

        let sum = checksum(&block);
        put_octal(&mut block[OFF_CHKSUM..OFF_CHKSUM + 7], sum, "chksum")?;
        block[OFF_CHKSUM + 7] = b' ';

        Ok(block)
    }

    /// Decode a header block read from the media. `offset` is left at
    /// zero; callers that know where the block came from fill it in.
    pub fn decode(block: &[u8]) -> Result<Self, ArchiveError> {
        if block.len() != BLOCK_SIZE as usize {
            return Err(ArchiveError::Corrupt(format!(
                "header block is {} bytes, want {}",
                block.len(),
                BLOCK_SIZE
            )));
        }
        if &block[OFF_MAGIC..OFF_MAGIC + 6] != MAGIC {
            return Err(ArchiveError::Corrupt("bad header magic".into()));
        }

        let stored_sum = parse_octal(&block[OFF_CHKSUM..OFF_CHKSUM + 8])?;
        if stored_sum != checksum(block) {
            return Err(ArchiveError::Corrupt(format!(
                "header checksum mismatch: stored {stored_sum}, computed {}",
                checksum(block)
            )));
        }

        let kind = match block[OFF_TYPE] {
            TYPE_FILE | 0 => EntryKind::File,
            TYPE_DIRECTORY => EntryKind::Directory,
            TYPE_SYMLINK => EntryKind::Symlink,
            other => {
                return Err(ArchiveError::Corrupt(format!(
                    "unknown entry type byte {other:#04x}"
                )))
            }
        };

        let name = field_str(&block[OFF_NAME..OFF_NAME + NAME_LEN]);
        let prefix = field_str(&block[OFF_PREFIX..OFF_PREFIX + PREFIX_LEN]);
        let path = if prefix.is_empty() {
            PathBuf::from(name)
        } else {
            PathBuf::from(format!("{prefix}/{name}"))
        };

        let link = {
            let link = field_str(&block[OFF_LINK..OFF_LINK + NAME_LEN]);
            if link.is_empty() {
                None
            } else {
                Some(PathBuf::from(link))
            }
        };

        let transforms = decode_transforms(&block[OFF_TRANSFORMS..OFF_TRANSFORMS + 3])?;

        Ok(Header {
            path,
            kind,
            mode: parse_octal(&block[OFF_MODE..OFF_MODE + 8])? as u32,
            uid: parse_octal(&block[OFF_UID..OFF_UID + 8])? as u32,
            gid: parse_octal(&block[OFF_GID..OFF_GID + 8])? as u32,
            size: parse_octal(&block[OFF_SIZE..OFF_SIZE + 12])?,
            mtime: parse_octal(&block[OFF_MTIME..OFF_MTIME + 12])?,
            link,
            transforms,
            offset: 0,
        })
    }
}

fn decode_transforms(bytes: &[u8]) -> Result<TransformSet, ArchiveError> {
    let tag = |byte: u8, stage: &str| {
        TransformTag::from_byte(byte).ok_or_else(|| {
            ArchiveError::Corrupt(format!("unknown {stage} transform tag {byte:#04x}"))
        })
    };
    Ok(TransformSet {
        compression: tag(bytes[0], "compression")?,
        encryption: tag(bytes[1], "encryption")?,
        signature: tag(bytes[2], "signature")?,
    })
}

fn checksum(block: &[u8]) -> u64 {
    let mut sum = 0u64;
    for (i, byte) in block.iter().enumerate() {
        if (OFF_CHKSUM..OFF_CHKSUM + 8).contains(&i) {
            sum += b' ' as u64;
        } else {
            sum += *byte as u64;
        }
    }
    sum
}

fn put_octal(field: &mut [u8], value: u64, name: &'static str) -> Result<(), ArchiveError> {
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    if text.len() > digits {
        return Err(ArchiveError::HeaderField(name));
    }
    field[..text.len()].copy_from_slice(text.as_bytes());
    field[text.len()] = 0;
    Ok(())
}

fn parse_octal(field: &[u8]) -> Result<u64, ArchiveError> {
    let text: String = field
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8)
        .map_err(|_| ArchiveError::Corrupt(format!("bad octal field {text:?}")))
}

fn path_str(path: &Path) -> Result<&str, ArchiveError> {
    path.to_str()
        .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))
}

/// Split a path into ustar (prefix, name) parts. Short paths go entirely
/// into the name field; longer ones split at a separator.
fn split_path(path: &Path) -> Result<(&str, &str), ArchiveError> {
    let text = path_str(path)?;
    if text.len() <= NAME_LEN {
        return Ok(("", text));
    }
    for (pos, byte) in text.bytes().enumerate() {
        if byte != b'/' {
            continue;
        }
        let (prefix, rest) = (&text[..pos], &text[pos + 1..]);
        if prefix.len() <= PREFIX_LEN && !rest.is_empty() && rest.len() <= NAME_LEN {
            return Ok((prefix, rest));
        }
    }
    Err(ArchiveError::PathTooLong(path.to_path_buf()))
}

fn field_str(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            path: PathBuf::from("/notes/todo.txt"),
            kind: EntryKind::File,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            size: 9,
            mtime: 1_700_000_000,
            link: None,
            transforms: TransformSet::identity(),
            offset: 0,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let header = sample();
        let block = header.encode().unwrap();
        let decoded = Header::decode(&block).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_directory_and_symlink_kinds() {
        let mut header = sample();
        header.kind = EntryKind::Directory;
        header.size = 0;
        let decoded = Header::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, EntryKind::Directory);

        header.kind = EntryKind::Symlink;
        header.link = Some(PathBuf::from("/notes"));
        let decoded = Header::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, EntryKind::Symlink);
        assert_eq!(decoded.link.as_deref(), Some(Path::new("/notes")));
    }

    #[test]
    fn test_long_path_uses_prefix() {
        let mut header = sample();
        header.path = PathBuf::from(format!("/{}/{}", "d".repeat(120), "leaf.txt"));
        let decoded = Header::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded.path, header.path);
    }

    #[test]
    fn test_checksum_rejects_corruption() {
        let mut block = sample().encode().unwrap();
        block[OFF_NAME] = b'x';
        let err = Header::decode(&block).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }

    #[test]
    fn test_unknown_transform_tag_rejected() {
        let header = sample();
        let mut block = header.encode().unwrap();
        block[OFF_TRANSFORMS] = b'?';
        // Recompute the checksum so only the tag is at fault.
        let sum = checksum(&block);
        put_octal(&mut block[OFF_CHKSUM..OFF_CHKSUM + 7], sum, "chksum").unwrap();
        block[OFF_CHKSUM + 7] = b' ';
        let err = Header::decode(&block).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }

    #[test]
    fn test_block_math() {
        assert_eq!(content_blocks(0), 0);
        assert_eq!(content_blocks(1), 1);
        assert_eq!(content_blocks(512), 1);
        assert_eq!(content_blocks(513), 2);
        assert_eq!(align_to_record(0, 20), 0);
        assert_eq!(align_to_record(1, 20), 20);
        assert_eq!(align_to_record(21, 20), 40);
    }
}
