//! In-memory posting and extent accumulation
//!
//! Each key maps to an append-only structure-of-arrays list. Documents are
//! added in increasing number order, so the lists stay delta-encoded and
//! never need a random insert.

use std::collections::btree_map;
use std::collections::BTreeMap;

use super::types::{DocumentNumber, Extent, ListKind};
use crate::error::{GeodexError, Result};

/// Append-only inverted list for one key
#[derive(Clone, Debug)]
pub struct InvertedList {
    kind: ListKind,
    /// Document number deltas; the first is relative to zero
    document_deltas: Vec<u64>,
    /// Number of spans per document
    counts: Vec<u32>,
    /// Span starts, flattened across documents
    begins: Vec<u32>,
    /// Span ends, only kept for extent lists
    ends: Vec<u32>,
    last_document: Option<DocumentNumber>,
    total_count: u64,
}

impl InvertedList {
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            document_deltas: Vec::new(),
            counts: Vec::new(),
            begins: Vec::new(),
            ends: Vec::new(),
            last_document: None,
            total_count: 0,
        }
    }

    /// Append one span for `document`.
    ///
    /// `document` must not be smaller than the last document added.
    pub fn add(&mut self, document: DocumentNumber, extent: Extent) -> Result<()> {
        match self.last_document {
            Some(last) if document < last => {
                return Err(GeodexError::Corrupt(format!(
                    "document {} appended after {}",
                    document, last
                )));
            }
            Some(last) if document == last => {
                if let Some(count) = self.counts.last_mut() {
                    *count += 1;
                }
            }
            previous => {
                self.document_deltas.push(document - previous.unwrap_or(0));
                self.counts.push(1);
                self.last_document = Some(document);
            }
        }

        self.begins.push(extent.begin);
        if self.kind == ListKind::Extents {
            self.ends.push(extent.end);
        }
        self.total_count += 1;
        Ok(())
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Number of documents in the list
    pub fn document_frequency(&self) -> u64 {
        self.counts.len() as u64
    }

    /// Number of spans across all documents
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn last_document(&self) -> Option<DocumentNumber> {
        self.last_document
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Approximate heap footprint in bytes
    pub fn heap_size(&self) -> usize {
        self.document_deltas.capacity() * 8
            + (self.counts.capacity() + self.begins.capacity() + self.ends.capacity()) * 4
    }

    /// Iterate documents in increasing order
    pub fn iter(&self) -> InvertedListIter<'_> {
        InvertedListIter {
            list: self,
            index: 0,
            span_offset: 0,
            document: 0,
        }
    }
}

/// One document of an inverted list
#[derive(Clone, Copy, Debug)]
pub struct ListEntry<'a> {
    pub document: DocumentNumber,
    begins: &'a [u32],
    ends: Option<&'a [u32]>,
}

impl<'a> ListEntry<'a> {
    pub fn count(&self) -> u32 {
        self.begins.len() as u32
    }

    pub fn begins(&self) -> &'a [u32] {
        self.begins
    }

    pub fn extents(&self) -> impl Iterator<Item = Extent> + 'a {
        let begins = self.begins;
        let ends = self.ends;
        begins.iter().enumerate().map(move |(i, &begin)| match ends {
            Some(ends) => Extent::new(begin, ends[i]),
            None => Extent::position(begin),
        })
    }
}

pub struct InvertedListIter<'a> {
    list: &'a InvertedList,
    index: usize,
    span_offset: usize,
    document: DocumentNumber,
}

impl<'a> Iterator for InvertedListIter<'a> {
    type Item = ListEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let list = self.list;
        let delta = *list.document_deltas.get(self.index)?;
        let count = list.counts[self.index] as usize;
        self.document += delta;

        let range = self.span_offset..self.span_offset + count;
        let entry = ListEntry {
            document: self.document,
            begins: &list.begins[range.clone()],
            ends: match list.kind {
                ListKind::Extents => Some(&list.ends[range]),
                ListKind::Positions => None,
            },
        };

        self.index += 1;
        self.span_offset += count;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.counts.len() - self.index;
        (remaining, Some(remaining))
    }
}

/// Sorted byte-keyed map of inverted lists of one kind
#[derive(Clone, Debug)]
struct ListBuffer {
    kind: ListKind,
    lists: BTreeMap<Vec<u8>, InvertedList>,
    total_count: u64,
}

impl ListBuffer {
    fn new(kind: ListKind) -> Self {
        Self {
            kind,
            lists: BTreeMap::new(),
            total_count: 0,
        }
    }

    fn add(&mut self, key: &[u8], document: DocumentNumber, extent: Extent) -> Result<()> {
        let kind = self.kind;
        let list = match self.lists.get_mut(key) {
            Some(list) => list,
            None => self
                .lists
                .entry(key.to_vec())
                .or_insert_with(|| InvertedList::new(kind)),
        };
        list.add(document, extent)?;
        self.total_count += 1;
        Ok(())
    }
}

/// Term positions accumulated by the memory segment
#[derive(Clone, Debug)]
pub struct PostingBuffer {
    inner: ListBuffer,
}

impl PostingBuffer {
    pub fn new() -> Self {
        Self {
            inner: ListBuffer::new(ListKind::Positions),
        }
    }

    /// Record an occurrence of `term` at `position` in `document`
    pub fn add(&mut self, term: &[u8], document: DocumentNumber, position: u32) -> Result<()> {
        self.inner.add(term, document, Extent::position(position))
    }

    pub fn get(&self, term: &[u8]) -> Option<&InvertedList> {
        self.inner.lists.get(term)
    }

    /// Lists in lexicographic key order
    pub fn iter(&self) -> btree_map::Iter<'_, Vec<u8>, InvertedList> {
        self.inner.lists.iter()
    }

    /// Number of distinct terms
    pub fn len(&self) -> usize {
        self.inner.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lists.is_empty()
    }

    /// Number of postings across all terms
    pub fn posting_count(&self) -> u64 {
        self.inner.total_count
    }
}

impl Default for PostingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tag spans accumulated by the memory segment
#[derive(Clone, Debug)]
pub struct ExtentBuffer {
    inner: ListBuffer,
}

impl ExtentBuffer {
    pub fn new() -> Self {
        Self {
            inner: ListBuffer::new(ListKind::Extents),
        }
    }

    /// Record a `name` span covering `begin..end` in `document`
    pub fn add(
        &mut self,
        name: &[u8],
        document: DocumentNumber,
        begin: u32,
        end: u32,
    ) -> Result<()> {
        self.inner.add(name, document, Extent::new(begin, end))
    }

    pub fn get(&self, name: &[u8]) -> Option<&InvertedList> {
        self.inner.lists.get(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Vec<u8>, InvertedList> {
        self.inner.lists.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lists.is_empty()
    }

    pub fn extent_count(&self) -> u64 {
        self.inner.total_count
    }
}

impl Default for ExtentBuffer {
    fn default() -> Self {
        Self::new()
    }
}
