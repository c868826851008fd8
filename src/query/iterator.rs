//! Iterator capabilities and leaf list iterators
//!
//! Every query operator is a document-ordered iterator. Extent producers
//! (lists, conjunctions, windows) implement [`HasExtents`]; scoring operators
//! implement [`Scorable`]. Trees are built from boxed trait objects so that a
//! node's shape is decided by the query, not by the type system.

use crate::error::Result;
use crate::segment::{DiskListCursor, DocumentNumber, Extent, InvertedList};

/// A cursor over increasing document numbers
pub trait Positioned {
    /// Current document, `None` once exhausted
    fn document(&self) -> Option<DocumentNumber>;

    fn is_done(&self) -> bool {
        self.document().is_none()
    }

    /// Step past the current document
    fn next_document(&mut self) -> Result<()>;

    /// Move to the first document `>= target`; never moves backwards
    fn move_to(&mut self, target: DocumentNumber) -> Result<()>;

    /// Move to the first document `> document`
    fn move_past(&mut self, document: DocumentNumber) -> Result<()> {
        match document.checked_add(1) {
            Some(target) => self.move_to(target),
            None => {
                while !self.is_done() {
                    self.next_document()?;
                }
                Ok(())
            }
        }
    }

    /// Return to the first document
    fn reset(&mut self) -> Result<()>;
}

/// Positions or spans matched in the current document
pub trait HasExtents: Positioned {
    /// Sorted by begin; empty once exhausted
    fn extents(&self) -> &[Extent];

    fn count(&self) -> u32 {
        self.extents().len() as u32
    }
}

/// Produces a score for any document
pub trait Scorable: Positioned {
    /// Score of `document`, which has `length` tokens. Documents the iterator
    /// is not positioned on score as if nothing matched.
    fn score(&self, document: DocumentNumber, length: u32) -> f64;
}

pub type ExtentIterator = Box<dyn HasExtents + Send>;
pub type Scorer = Box<dyn Scorable + Send>;

impl Positioned for DiskListCursor {
    fn document(&self) -> Option<DocumentNumber> {
        DiskListCursor::document(self)
    }

    fn next_document(&mut self) -> Result<()> {
        self.advance()
    }

    fn move_to(&mut self, target: DocumentNumber) -> Result<()> {
        self.skip_to(target)
    }

    fn reset(&mut self) -> Result<()> {
        DiskListCursor::reset(self)
    }
}

impl HasExtents for DiskListCursor {
    fn extents(&self) -> &[Extent] {
        DiskListCursor::extents(self)
    }
}

/// Iterator over a list still held by the memory segment
#[derive(Clone, Debug)]
pub struct MemoryListIterator {
    documents: Vec<DocumentNumber>,
    offsets: Vec<usize>,
    extents: Vec<Extent>,
    index: usize,
}

impl MemoryListIterator {
    pub fn new(list: &InvertedList) -> Self {
        let mut documents = Vec::with_capacity(list.document_frequency() as usize);
        let mut offsets = Vec::with_capacity(documents.capacity() + 1);
        let mut extents = Vec::with_capacity(list.total_count() as usize);
        for entry in list.iter() {
            documents.push(entry.document);
            offsets.push(extents.len());
            extents.extend(entry.extents());
        }
        offsets.push(extents.len());
        Self {
            documents,
            offsets,
            extents,
            index: 0,
        }
    }
}

impl Positioned for MemoryListIterator {
    fn document(&self) -> Option<DocumentNumber> {
        self.documents.get(self.index).copied()
    }

    fn next_document(&mut self) -> Result<()> {
        if self.index < self.documents.len() {
            self.index += 1;
        }
        Ok(())
    }

    fn move_to(&mut self, target: DocumentNumber) -> Result<()> {
        if self.document().map_or(false, |d| d < target) {
            self.index += self.documents[self.index..].partition_point(|&d| d < target);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }
}

impl HasExtents for MemoryListIterator {
    fn extents(&self) -> &[Extent] {
        if self.index >= self.documents.len() {
            return &[];
        }
        &self.extents[self.offsets[self.index]..self.offsets[self.index + 1]]
    }
}

/// Stands in for a key the shard does not contain
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyIterator;

impl Positioned for EmptyIterator {
    fn document(&self) -> Option<DocumentNumber> {
        None
    }

    fn next_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn move_to(&mut self, _target: DocumentNumber) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HasExtents for EmptyIterator {
    fn extents(&self) -> &[Extent] {
        &[]
    }
}

/// Drain an extent iterator into `(document, count)` pairs
pub fn collect_counts(iterator: &mut dyn HasExtents) -> Result<Vec<(DocumentNumber, u32)>> {
    let mut out = Vec::new();
    while let Some(document) = iterator.document() {
        out.push((document, iterator.count()));
        iterator.next_document()?;
    }
    Ok(out)
}
