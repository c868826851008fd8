//! Core types shared by the segment components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GeodexError, Result};

pub use crate::models::DocumentNumber;

/// Number of documents per encoded list block
pub const BLOCK_SIZE: usize = 128;

/// Segment identifier, allocated monotonically by the index driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Parse a directory name produced by `Display`
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix("shard-")
            .and_then(|id| id.parse().ok())
            .map(SegmentId)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{:08}", self.0)
    }
}

/// A token span within one document; `end` is exclusive.
///
/// A term occurrence at position `p` is the extent `p..p + 1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Extent {
    pub begin: u32,
    pub end: u32,
}

impl Extent {
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    pub fn position(position: u32) -> Self {
        Self {
            begin: position,
            end: position + 1,
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
}

/// The named parts a segment may carry under `parts/`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartName {
    Postings,
    StemmedPostings,
    Extents,
    Corpus,
}

impl PartName {
    pub const ALL: [PartName; 4] = [
        PartName::Postings,
        PartName::StemmedPostings,
        PartName::Extents,
        PartName::Corpus,
    ];

    /// File name within the `parts/` directory
    pub fn file_name(&self) -> &'static str {
        match self {
            PartName::Postings => "postings",
            PartName::StemmedPostings => "stemmedPostings",
            PartName::Extents => "extents",
            PartName::Corpus => "corpus",
        }
    }

    /// Codec every writer in this crate uses for the part
    pub fn default_codec(&self) -> PartCodec {
        match self {
            PartName::Postings | PartName::StemmedPostings => PartCodec::Positions,
            PartName::Extents => PartCodec::Extents,
            PartName::Corpus => PartCodec::Corpus,
        }
    }
}

impl fmt::Display for PartName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

impl FromStr for PartName {
    type Err = GeodexError;

    fn from_str(s: &str) -> Result<Self> {
        PartName::ALL
            .iter()
            .copied()
            .find(|p| p.file_name() == s)
            .ok_or_else(|| GeodexError::Corrupt(format!("unknown part name {:?}", s)))
    }
}

/// Statically known encodings of a part file.
///
/// The manifest records one per part; readers and mergers are chosen by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartCodec {
    /// Per-term lists of (document, count, positions)
    Positions,
    /// Per-tag lists of (document, count, extents)
    Extents,
    /// Serialized documents keyed by identifier
    Corpus,
}

impl PartCodec {
    pub fn tag(&self) -> &'static str {
        match self {
            PartCodec::Positions => "positions-v1",
            PartCodec::Extents => "extents-v1",
            PartCodec::Corpus => "corpus-v1",
        }
    }

    /// Byte stored in part file headers
    pub fn id(&self) -> u8 {
        match self {
            PartCodec::Positions => 1,
            PartCodec::Extents => 2,
            PartCodec::Corpus => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(PartCodec::Positions),
            2 => Ok(PartCodec::Extents),
            3 => Ok(PartCodec::Corpus),
            other => Err(GeodexError::Corrupt(format!("unknown codec id {}", other))),
        }
    }

    /// List flavour for inverted-list codecs
    pub fn list_kind(&self) -> Option<ListKind> {
        match self {
            PartCodec::Positions => Some(ListKind::Positions),
            PartCodec::Extents => Some(ListKind::Extents),
            PartCodec::Corpus => None,
        }
    }
}

impl fmt::Display for PartCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PartCodec {
    type Err = GeodexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "positions-v1" => Ok(PartCodec::Positions),
            "extents-v1" => Ok(PartCodec::Extents),
            "corpus-v1" => Ok(PartCodec::Corpus),
            other => Err(GeodexError::Corrupt(format!("unknown codec {:?}", other))),
        }
    }
}

/// How the spans of an inverted list are stored
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Single token positions; `end` is implied
    Positions,
    /// Explicit begin/end pairs
    Extents,
}
