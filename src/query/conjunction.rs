//! Conjunction of extent iterators
//!
//! Children are advanced to the largest of their current documents until
//! they all agree. Only then are their extents combined by the loader; a
//! window loader that finds nothing rejects the document.

use super::iterator::{ExtentIterator, HasExtents, Positioned};
use super::window::{ordered_window, unordered_window, union_extents};
use crate::error::Result;
use crate::segment::{DocumentNumber, Extent};

/// How matching children's extents are combined
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtentLoader {
    /// Every child extent, merged
    AllExtents,
    OrderedWindow { width: u32 },
    UnorderedWindow { width: u32 },
}

impl ExtentLoader {
    fn rejects_empty(&self) -> bool {
        !matches!(self, ExtentLoader::AllExtents)
    }

    fn load(&self, children: &[&[Extent]], out: &mut Vec<Extent>) {
        match *self {
            ExtentLoader::AllExtents => union_extents(children, out),
            ExtentLoader::OrderedWindow { width } => *out = ordered_window(children, width),
            ExtentLoader::UnorderedWindow { width } => *out = unordered_window(children, width),
        }
    }
}

pub struct Conjunction {
    children: Vec<ExtentIterator>,
    loader: ExtentLoader,
    document: Option<DocumentNumber>,
    extents: Vec<Extent>,
}

impl Conjunction {
    pub fn new(children: Vec<ExtentIterator>, loader: ExtentLoader) -> Result<Self> {
        let mut conjunction = Self {
            children,
            loader,
            document: None,
            extents: Vec::new(),
        };
        conjunction.align()?;
        Ok(conjunction)
    }

    /// Settle on the next document every child contains
    fn align(&mut self) -> Result<()> {
        self.document = None;
        self.extents.clear();
        if self.children.is_empty() {
            return Ok(());
        }

        loop {
            let mut target = 0;
            for child in &self.children {
                match child.document() {
                    Some(document) => target = target.max(document),
                    None => return Ok(()),
                }
            }

            let mut agreed = true;
            for child in self.children.iter_mut() {
                child.move_to(target)?;
                match child.document() {
                    None => return Ok(()),
                    Some(document) if document != target => agreed = false,
                    Some(_) => {}
                }
            }
            if !agreed {
                continue;
            }

            let spans: Vec<&[Extent]> = self.children.iter().map(|c| c.extents()).collect();
            self.loader.load(&spans, &mut self.extents);
            if self.extents.is_empty() && self.loader.rejects_empty() {
                for child in self.children.iter_mut() {
                    child.move_past(target)?;
                }
                continue;
            }

            self.document = Some(target);
            return Ok(());
        }
    }
}

impl Positioned for Conjunction {
    fn document(&self) -> Option<DocumentNumber> {
        self.document
    }

    fn next_document(&mut self) -> Result<()> {
        if let Some(current) = self.document {
            for child in self.children.iter_mut() {
                child.move_past(current)?;
            }
            self.align()?;
        }
        Ok(())
    }

    fn move_to(&mut self, target: DocumentNumber) -> Result<()> {
        match self.document {
            Some(current) if current < target => {
                for child in self.children.iter_mut() {
                    child.move_to(target)?;
                }
                self.align()
            }
            _ => Ok(()),
        }
    }

    fn reset(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            child.reset()?;
        }
        self.align()
    }
}

impl HasExtents for Conjunction {
    fn extents(&self) -> &[Extent] {
        &self.extents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::iterator::{collect_counts, EmptyIterator, MemoryListIterator};
    use crate::segment::{InvertedList, ListKind};

    fn list(docs: &[(u64, &[u32])]) -> ExtentIterator {
        let mut list = InvertedList::new(ListKind::Positions);
        for &(doc, positions) in docs {
            for &p in positions {
                list.add(doc, Extent::position(p)).unwrap();
            }
        }
        Box::new(MemoryListIterator::new(&list))
    }

    #[test]
    fn test_and_agrees_on_common_documents() {
        let a = list(&[(1, &[0]), (2, &[3]), (5, &[1]), (9, &[0])]);
        let b = list(&[(2, &[1]), (4, &[0]), (5, &[2, 6]), (9, &[4])]);
        let mut and = Conjunction::new(vec![a, b], ExtentLoader::AllExtents).unwrap();
        assert_eq!(collect_counts(&mut and).unwrap(), vec![(2, 2), (5, 3), (9, 2)]);

        and.reset().unwrap();
        and.move_to(6).unwrap();
        assert_eq!(and.document(), Some(9));
    }

    #[test]
    fn test_window_rejects_documents_without_match() {
        // "new york": adjacent in 1 and 7, far apart in 4
        let new = list(&[(1, &[0]), (4, &[0]), (7, &[3, 9])]);
        let york = list(&[(1, &[1]), (4, &[5]), (7, &[10])]);
        let mut phrase =
            Conjunction::new(vec![new, york], ExtentLoader::OrderedWindow { width: 1 }).unwrap();
        assert_eq!(phrase.document(), Some(1));
        assert_eq!(phrase.extents(), &[Extent::new(0, 2)]);
        phrase.next_document().unwrap();
        assert_eq!(phrase.document(), Some(7));
        assert_eq!(phrase.extents(), &[Extent::new(9, 11)]);
        phrase.next_document().unwrap();
        assert!(phrase.is_done());
    }

    #[test]
    fn test_unordered_window() {
        let a = list(&[(3, &[5]), (6, &[0])]);
        let b = list(&[(3, &[2]), (6, &[20])]);
        let mut uw =
            Conjunction::new(vec![a, b], ExtentLoader::UnorderedWindow { width: 4 }).unwrap();
        assert_eq!(collect_counts(&mut uw).unwrap(), vec![(3, 1)]);
    }

    #[test]
    fn test_exhausted_child_ends_conjunction() {
        let a = list(&[(1, &[0])]);
        let empty: ExtentIterator = Box::new(EmptyIterator);
        let and = Conjunction::new(vec![a, empty], ExtentLoader::AllExtents).unwrap();
        assert!(and.is_done());
        assert!(Conjunction::new(Vec::new(), ExtentLoader::AllExtents)
            .unwrap()
            .is_done());
    }
}
