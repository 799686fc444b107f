//! Per-record content transform hook
//!
//! The archive applies a named compression/encryption/signature pipeline
//! to content blocks before they hit the drive and reverses it on read.
//! Only the identity transform ships in-tree; the other tags exist so an
//! external pipeline can be plugged in and so headers written by one can
//! be recognized (and refused) by a mount that lacks it.

use std::sync::Arc;

/// Named transform applied to one stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TransformTag {
    #[default]
    None,
    Gzip,
    Age,
    Minisign,
}

impl TransformTag {
    /// Single-byte encoding used in the header block.
    pub fn as_byte(&self) -> u8 {
        match self {
            TransformTag::None => b'n',
            TransformTag::Gzip => b'g',
            TransformTag::Age => b'a',
            TransformTag::Minisign => b'm',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'n' | 0 => Some(TransformTag::None),
            b'g' => Some(TransformTag::Gzip),
            b'a' => Some(TransformTag::Age),
            b'm' => Some(TransformTag::Minisign),
            _ => None,
        }
    }
}

/// The transform descriptor carried by every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct TransformSet {
    pub compression: TransformTag,
    pub encryption: TransformTag,
    pub signature: TransformTag,
}

impl TransformSet {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// One stage of the content pipeline.
pub trait Transform: Send + Sync {
    fn apply(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>>;

    fn reverse(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>>;
}

/// The identity transform: bytes pass through untouched.
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>> {
        Ok(data)
    }

    fn reverse(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>> {
        Ok(data)
    }
}

struct Stage {
    tag: TransformTag,
    transform: Arc<dyn Transform>,
}

/// Ordered compression → encryption → signature pipeline.
pub struct Pipeline {
    compression: Stage,
    encryption: Stage,
    signature: Stage,
}

impl Pipeline {
    /// The default pipeline: identity for all three stages.
    pub fn identity() -> Self {
        Self {
            compression: Stage {
                tag: TransformTag::None,
                transform: Arc::new(Identity),
            },
            encryption: Stage {
                tag: TransformTag::None,
                transform: Arc::new(Identity),
            },
            signature: Stage {
                tag: TransformTag::None,
                transform: Arc::new(Identity),
            },
        }
    }

    /// Plug in external stages.
    pub fn new(
        compression: (TransformTag, Arc<dyn Transform>),
        encryption: (TransformTag, Arc<dyn Transform>),
        signature: (TransformTag, Arc<dyn Transform>),
    ) -> Self {
        Self {
            compression: Stage {
                tag: compression.0,
                transform: compression.1,
            },
            encryption: Stage {
                tag: encryption.0,
                transform: encryption.1,
            },
            signature: Stage {
                tag: signature.0,
                transform: signature.1,
            },
        }
    }

    pub fn tags(&self) -> TransformSet {
        TransformSet {
            compression: self.compression.tag,
            encryption: self.encryption.tag,
            signature: self.signature.tag,
        }
    }

    /// Whether a header written with `tags` can be processed by this
    /// pipeline. A mismatch is a configuration error, not data loss.
    pub fn matches(&self, tags: &TransformSet) -> bool {
        *tags == self.tags()
    }

    pub fn apply(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>> {
        let data = self.compression.transform.apply(data)?;
        let data = self.encryption.transform.apply(data)?;
        self.signature.transform.apply(data)
    }

    pub fn reverse(&self, data: Vec<u8>) -> std::io::Result<Vec<u8>> {
        let data = self.signature.transform.reverse(data)?;
        let data = self.encryption.transform.reverse(data)?;
        self.compression.transform.reverse(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let pipeline = Pipeline::identity();
        let data = b"record content".to_vec();
        let stored = pipeline.apply(data.clone()).unwrap();
        assert_eq!(stored, data);
        assert_eq!(pipeline.reverse(stored).unwrap(), data);
    }

    #[test]
    fn test_tag_bytes_roundtrip() {
        for tag in [
            TransformTag::None,
            TransformTag::Gzip,
            TransformTag::Age,
            TransformTag::Minisign,
        ] {
            assert_eq!(TransformTag::from_byte(tag.as_byte()), Some(tag));
        }
        assert_eq!(TransformTag::from_byte(b'?'), None);
    }

    #[test]
    fn test_pipeline_mismatch_detected() {
        let pipeline = Pipeline::identity();
        assert!(pipeline.matches(&TransformSet::identity()));
        let foreign = TransformSet {
            compression: TransformTag::Gzip,
            ..Default::default()
        };
        assert!(!pipeline.matches(&foreign));
    }
}
