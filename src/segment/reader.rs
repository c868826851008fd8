//! Immutable on-disk segment reader
//!
//! Opens a segment directory, validates every file the manifest names and
//! exposes the same lookups as the memory segment. Readers are never
//! mutated after opening and are shared between query threads via `Arc`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::corpus::decode_document;
use super::documents::{read_lengths, read_names, DocumentTable};
use super::manifest::SegmentManifest;
use super::part::PartReader;
use super::postings::DiskListCursor;
use super::statistics::{CollectionStatistics, ListStatistics};
use super::types::{DocumentNumber, PartCodec, PartName};
use super::writer::part_path;
use crate::error::{GeodexError, Result};
use crate::models::Document;

pub struct SegmentReader {
    path: PathBuf,
    manifest: SegmentManifest,
    names: Arc<DocumentTable<String>>,
    lengths: Arc<DocumentTable<u32>>,
    parts: BTreeMap<PartName, Arc<PartReader>>,
}

impl SegmentReader {
    /// Open the segment stored in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = SegmentManifest::read(dir)?;
        let names = read_names(dir)?;
        let lengths = read_lengths(dir)?;

        if names.len() as u64 != manifest.document_count
            || lengths.len() as u64 != manifest.document_count
        {
            return Err(GeodexError::corrupt_segment(
                dir,
                format!(
                    "manifest lists {} documents, names {}, lengths {}",
                    manifest.document_count,
                    names.len(),
                    lengths.len()
                ),
            ));
        }
        let collection_length: u64 = lengths.iter().map(|(_, &l)| l as u64).sum();
        if collection_length != manifest.collection_length {
            return Err(GeodexError::corrupt_segment(
                dir,
                format!(
                    "collection length {} does not match manifest {}",
                    collection_length, manifest.collection_length
                ),
            ));
        }

        let mut parts = BTreeMap::new();
        for (&part, &codec) in &manifest.parts {
            let reader = PartReader::open(&part_path(dir, part))
                .map_err(|e| GeodexError::corrupt_segment(dir, format!("{}: {}", part, e)))?;
            if reader.codec() != codec {
                return Err(GeodexError::corrupt_segment(
                    dir,
                    format!(
                        "part {} written as {}, manifest says {}",
                        part,
                        reader.codec(),
                        codec
                    ),
                ));
            }
            parts.insert(part, Arc::new(reader));
        }

        debug!(
            path = %dir.display(),
            documents = manifest.document_count,
            parts = parts.len(),
            "opened segment"
        );

        Ok(Self {
            path: dir.to_path_buf(),
            manifest,
            names: Arc::new(names),
            lengths: Arc::new(lengths),
            parts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &SegmentManifest {
        &self.manifest
    }

    pub fn statistics(&self) -> CollectionStatistics {
        self.manifest.statistics()
    }

    pub fn document_count(&self) -> u64 {
        self.manifest.document_count
    }

    pub fn document_number_offset(&self) -> DocumentNumber {
        self.manifest.document_number_offset
    }

    /// Highest document number stored in the segment
    pub fn highest_document(&self) -> Option<DocumentNumber> {
        self.names.last_document()
    }

    pub fn codec(&self, part: PartName) -> Option<PartCodec> {
        self.manifest.codec(part)
    }

    pub fn part(&self, part: PartName) -> Option<&Arc<PartReader>> {
        self.parts.get(&part)
    }

    /// Cursor over the list stored under `key`
    pub fn list(&self, part: PartName, key: &[u8]) -> Result<Option<DiskListCursor>> {
        let Some(reader) = self.parts.get(&part) else {
            return Ok(None);
        };
        let kind = reader
            .codec()
            .list_kind()
            .ok_or_else(|| GeodexError::UnsupportedPart(part.to_string()))?;
        match reader.range(key)? {
            Some((start, end)) => {
                let cursor = DiskListCursor::new(Arc::clone(reader.data()), start, end, kind)
                    .map_err(|e| GeodexError::corrupt_segment(&self.path, e))?;
                Ok(Some(cursor))
            }
            None => Ok(None),
        }
    }

    pub fn list_statistics(&self, part: PartName, key: &[u8]) -> Result<Option<ListStatistics>> {
        Ok(self.list(part, key)?.map(|cursor| cursor.statistics()))
    }

    pub fn document_length(&self, document: DocumentNumber) -> Option<u32> {
        self.lengths.get(document).copied()
    }

    pub fn document_name(&self, document: DocumentNumber) -> Option<&str> {
        self.names.get(document).map(|s| s.as_str())
    }

    pub fn names(&self) -> &DocumentTable<String> {
        &self.names
    }

    pub fn lengths(&self) -> &DocumentTable<u32> {
        &self.lengths
    }

    /// Stored document with `identifier`, if the segment keeps a corpus
    pub fn stored_document(&self, identifier: &str) -> Result<Option<Document>> {
        let Some(corpus) = self.parts.get(&PartName::Corpus) else {
            return Ok(None);
        };
        corpus
            .get(identifier.as_bytes())?
            .map(decode_document)
            .transpose()
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("path", &self.path)
            .field("documents", &self.manifest.document_count)
            .field("parts", &self.parts.keys().collect::<Vec<_>>())
            .finish()
    }
}
