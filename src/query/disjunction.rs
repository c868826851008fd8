//! Disjunction of extent iterators

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::iterator::{ExtentIterator, HasExtents, Positioned};
use super::window::union_extents;
use crate::error::Result;
use crate::segment::{DocumentNumber, Extent};

/// Matches every document any child matches.
///
/// Children sit in a min-heap keyed by their current document. Extents are
/// the union of the children positioned on the current document.
pub struct Disjunction {
    children: Vec<ExtentIterator>,
    queue: BinaryHeap<Reverse<(DocumentNumber, usize)>>,
    extents: Vec<Extent>,
}

impl Disjunction {
    pub fn new(children: Vec<ExtentIterator>) -> Self {
        let mut disjunction = Self {
            children,
            queue: BinaryHeap::new(),
            extents: Vec::new(),
        };
        disjunction.rebuild();
        disjunction
    }

    fn rebuild(&mut self) {
        self.queue.clear();
        for (i, child) in self.children.iter().enumerate() {
            if let Some(document) = child.document() {
                self.queue.push(Reverse((document, i)));
            }
        }
        self.load_extents();
    }

    fn load_extents(&mut self) {
        self.extents.clear();
        let Some(current) = self.document() else {
            return;
        };
        let spans: Vec<&[Extent]> = self
            .children
            .iter()
            .filter(|c| c.document() == Some(current))
            .map(|c| c.extents())
            .collect();
        union_extents(&spans, &mut self.extents);
    }

    /// Advance every child positioned before `target` and re-queue survivors
    fn advance_below(&mut self, target: DocumentNumber, past: bool) -> Result<()> {
        while let Some(&Reverse((document, i))) = self.queue.peek() {
            if document > target || (!past && document == target) {
                break;
            }
            self.queue.pop();
            let child = &mut self.children[i];
            if past {
                child.move_past(target)?;
            } else {
                child.move_to(target)?;
            }
            if let Some(next) = child.document() {
                self.queue.push(Reverse((next, i)));
            }
        }
        self.load_extents();
        Ok(())
    }
}

impl Positioned for Disjunction {
    fn document(&self) -> Option<DocumentNumber> {
        self.queue.peek().map(|Reverse((document, _))| *document)
    }

    fn next_document(&mut self) -> Result<()> {
        match self.document() {
            Some(current) => self.advance_below(current, true),
            None => Ok(()),
        }
    }

    fn move_to(&mut self, target: DocumentNumber) -> Result<()> {
        self.advance_below(target, false)
    }

    fn reset(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            child.reset()?;
        }
        self.rebuild();
        Ok(())
    }
}

impl HasExtents for Disjunction {
    fn extents(&self) -> &[Extent] {
        &self.extents
    }
}
