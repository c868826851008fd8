//! Per-segment manifest
//!
//! The manifest is the last file written into a segment directory, so a
//! directory without one is an incomplete flush or merge and is never opened.

use std::collections::BTreeMap;
use std::path::Path;

use super::parameters::Parameters;
use super::statistics::CollectionStatistics;
use super::types::{DocumentNumber, PartCodec, PartName};
use crate::error::{GeodexError, Result};

pub const MANIFEST_FILE: &str = "manifest";

const COLLECTION_LENGTH: &str = "collectionLength";
const DOCUMENT_COUNT: &str = "documentCount";
const DOCUMENT_NUMBER_OFFSET: &str = "documentNumberOffset";
const PART_PREFIX: &str = "part/";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentManifest {
    pub collection_length: u64,
    pub document_count: u64,
    /// Number of the first document in the segment
    pub document_number_offset: DocumentNumber,
    /// Parts present under `parts/`, with the codec each was written in
    pub parts: BTreeMap<PartName, PartCodec>,
}

impl SegmentManifest {
    pub fn new(
        statistics: CollectionStatistics,
        document_number_offset: DocumentNumber,
    ) -> Self {
        Self {
            collection_length: statistics.collection_length,
            document_count: statistics.document_count,
            document_number_offset,
            parts: BTreeMap::new(),
        }
    }

    pub fn with_part(mut self, part: PartName, codec: PartCodec) -> Self {
        self.parts.insert(part, codec);
        self
    }

    pub fn statistics(&self) -> CollectionStatistics {
        CollectionStatistics::new(self.collection_length, self.document_count)
    }

    pub fn codec(&self, part: PartName) -> Option<PartCodec> {
        self.parts.get(&part).copied()
    }

    pub fn to_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.set(COLLECTION_LENGTH, self.collection_length);
        params.set(DOCUMENT_COUNT, self.document_count);
        params.set(DOCUMENT_NUMBER_OFFSET, self.document_number_offset);
        for (part, codec) in &self.parts {
            params.set(format!("{}{}", PART_PREFIX, part), codec);
        }
        params
    }

    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        let mut parts = BTreeMap::new();
        for key in params.keys_with_prefix(PART_PREFIX) {
            let part: PartName = key[PART_PREFIX.len()..].parse()?;
            let codec: PartCodec = params
                .get(key)
                .ok_or_else(|| GeodexError::Corrupt(format!("empty {}", key)))?
                .parse()?;
            parts.insert(part, codec);
        }

        Ok(Self {
            collection_length: params.require_u64(COLLECTION_LENGTH)?,
            document_count: params.require_u64(DOCUMENT_COUNT)?,
            document_number_offset: params.require_u64(DOCUMENT_NUMBER_OFFSET)?,
            parts,
        })
    }

    /// Read `<dir>/manifest`
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let params = Parameters::read(&path)
            .map_err(|e| GeodexError::corrupt_segment(dir, format!("manifest: {}", e)))?;
        Self::from_parameters(&params).map_err(|e| GeodexError::corrupt_segment(dir, e))
    }

    /// Write `<dir>/manifest` atomically
    pub fn write(&self, dir: &Path) -> Result<()> {
        self.to_parameters().write_atomic(&dir.join(MANIFEST_FILE))
    }
}
