//! In-memory index segment
//!
//! Buffers numbered documents until the driver flushes them to disk. A
//! segment is rooted at a first document number and only accepts the next
//! number in sequence.

use std::collections::BTreeMap;

use tracing::trace;

use super::buffer::{ExtentBuffer, InvertedList, PostingBuffer};
use super::statistics::CollectionStatistics;
use super::types::{DocumentNumber, PartCodec, PartName};
use crate::error::{GeodexError, Result};
use crate::models::Document;
use crate::stemmer::CachedStemmer;

/// What a memory segment builds besides plain postings
#[derive(Clone, Debug)]
pub struct MemorySegmentOptions {
    pub stemming: bool,
    pub stemmer_cache_size: usize,
    pub corpus: bool,
}

impl Default for MemorySegmentOptions {
    fn default() -> Self {
        Self {
            stemming: false,
            stemmer_cache_size: 50_000,
            corpus: false,
        }
    }
}

impl From<&crate::config::GeometricConfig> for MemorySegmentOptions {
    fn from(config: &crate::config::GeometricConfig) -> Self {
        Self {
            stemming: config.stemming,
            stemmer_cache_size: config.stemmer_cache_size,
            corpus: config.corpus,
        }
    }
}

#[derive(Debug)]
pub struct MemorySegment {
    offset: DocumentNumber,
    document_count: u64,
    collection_length: u64,
    postings: PostingBuffer,
    stemmed: Option<(PostingBuffer, CachedStemmer)>,
    extents: ExtentBuffer,
    lengths: Vec<u32>,
    names: Vec<String>,
    corpus: Option<BTreeMap<String, Document>>,
}

impl MemorySegment {
    /// Create an empty segment whose first document is `first_document`
    pub fn new(first_document: DocumentNumber, options: &MemorySegmentOptions) -> Self {
        let stemmed = options.stemming.then(|| {
            (
                PostingBuffer::new(),
                CachedStemmer::new(options.stemmer_cache_size),
            )
        });
        Self {
            offset: first_document,
            document_count: 0,
            collection_length: 0,
            postings: PostingBuffer::new(),
            stemmed,
            extents: ExtentBuffer::new(),
            lengths: Vec::new(),
            names: Vec::new(),
            corpus: options.corpus.then(BTreeMap::new),
        }
    }

    /// Index one document.
    ///
    /// The document number must be exactly `offset + document_count`; nothing
    /// is modified when it is not.
    pub fn process(&mut self, document: Document) -> Result<()> {
        let expected = self.next_document_number();
        if document.number != expected {
            return Err(GeodexError::OutOfOrder {
                expected,
                found: document.number,
                identifier: document.identifier,
            });
        }
        if document.terms.len() > u32::MAX as usize {
            return Err(GeodexError::InvalidRequest(format!(
                "document {} has too many terms",
                document.identifier
            )));
        }
        if let Some(tag) = document.tags.iter().find(|t| t.end < t.begin) {
            return Err(GeodexError::InvalidRequest(format!(
                "tag {} in document {} ends before it begins",
                tag.name, document.identifier
            )));
        }

        let number = document.number;
        for (position, term) in document.terms.iter().enumerate() {
            let Some(term) = term else { continue };
            self.postings.add(term.as_bytes(), number, position as u32)?;
            if let Some((stemmed, stemmer)) = self.stemmed.as_mut() {
                let stem = stemmer.stem(term);
                stemmed.add(stem.as_bytes(), number, position as u32)?;
            }
        }

        let mut tags: Vec<_> = document.tags.iter().collect();
        tags.sort_by_key(|t| (t.begin, t.end));
        for tag in tags {
            self.extents
                .add(tag.name.as_bytes(), number, tag.begin, tag.end)?;
        }

        let length = document.length();
        self.lengths.push(length);
        self.names.push(document.identifier.clone());
        self.collection_length += length as u64;
        self.document_count += 1;

        if let Some(corpus) = self.corpus.as_mut() {
            corpus.insert(document.identifier.clone(), document);
        }

        trace!(document = number, length, "processed document");
        Ok(())
    }

    /// Number the next document must carry
    pub fn next_document_number(&self) -> DocumentNumber {
        self.offset + self.document_count
    }

    pub fn document_number_offset(&self) -> DocumentNumber {
        self.offset
    }

    pub fn document_count(&self) -> u64 {
        self.document_count
    }

    pub fn collection_length(&self) -> u64 {
        self.collection_length
    }

    pub fn is_empty(&self) -> bool {
        self.document_count == 0
    }

    pub fn statistics(&self) -> CollectionStatistics {
        CollectionStatistics::new(self.collection_length, self.document_count)
    }

    /// Parts this segment would write, with their codecs
    pub fn parts(&self) -> Vec<(PartName, PartCodec)> {
        let mut parts = vec![
            (PartName::Postings, PartName::Postings.default_codec()),
            (PartName::Extents, PartName::Extents.default_codec()),
        ];
        if self.stemmed.is_some() {
            parts.push((
                PartName::StemmedPostings,
                PartName::StemmedPostings.default_codec(),
            ));
        }
        if self.corpus.is_some() {
            parts.push((PartName::Corpus, PartName::Corpus.default_codec()));
        }
        parts.sort();
        parts
    }

    pub fn has_part(&self, part: PartName) -> bool {
        match part {
            PartName::Postings | PartName::Extents => true,
            PartName::StemmedPostings => self.stemmed.is_some(),
            PartName::Corpus => self.corpus.is_some(),
        }
    }

    pub fn postings(&self) -> &PostingBuffer {
        &self.postings
    }

    pub fn stemmed_postings(&self) -> Option<&PostingBuffer> {
        self.stemmed.as_ref().map(|(buffer, _)| buffer)
    }

    pub fn extents(&self) -> &ExtentBuffer {
        &self.extents
    }

    /// Inverted list stored under `key` in an inverted-list part
    pub fn list(&self, part: PartName, key: &[u8]) -> Option<&InvertedList> {
        match part {
            PartName::Postings => self.postings.get(key),
            PartName::StemmedPostings => self.stemmed_postings().and_then(|b| b.get(key)),
            PartName::Extents => self.extents.get(key),
            PartName::Corpus => None,
        }
    }

    fn slot(&self, document: DocumentNumber) -> Option<usize> {
        document
            .checked_sub(self.offset)
            .map(|i| i as usize)
            .filter(|&i| i < self.lengths.len())
    }

    pub fn document_length(&self, document: DocumentNumber) -> Option<u32> {
        self.slot(document).map(|i| self.lengths[i])
    }

    pub fn document_name(&self, document: DocumentNumber) -> Option<&str> {
        self.slot(document).map(|i| self.names[i].as_str())
    }

    /// Document lengths in number order, starting at the offset
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Document identifiers in number order, starting at the offset
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Stored documents, present only with corpus storage enabled
    pub fn corpus(&self) -> Option<&BTreeMap<String, Document>> {
        self.corpus.as_ref()
    }

    pub fn stored_document(&self, identifier: &str) -> Option<&Document> {
        self.corpus.as_ref().and_then(|c| c.get(identifier))
    }

    /// Approximate heap footprint in bytes
    pub fn heap_size(&self) -> usize {
        let lists = |buffer: &PostingBuffer| -> usize {
            buffer.iter().map(|(k, l)| k.len() + l.heap_size()).sum()
        };
        lists(&self.postings)
            + self.stemmed_postings().map(lists).unwrap_or(0)
            + self
                .extents
                .iter()
                .map(|(k, l)| k.len() + l.heap_size())
                .sum::<usize>()
            + self.lengths.capacity() * 4
            + self.names.iter().map(|n| n.capacity()).sum::<usize>()
    }

    /// Release the segment's buffers
    pub fn close(self) {
        trace!(
            offset = self.offset,
            documents = self.document_count,
            "closing memory segment"
        );
    }
}
