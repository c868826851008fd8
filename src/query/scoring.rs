//! Scoring operators

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::iterator::{ExtentIterator, Positioned, Scorable, Scorer};
use crate::error::Result;
use crate::segment::{CollectionStatistics, DocumentNumber, ListStatistics, ScoringModel};

/// Scores the extents of one child with a scoring model.
///
/// Statistics are the merged counters of the whole index, so a document
/// scores the same no matter which segment holds it.
pub struct ScoreIterator {
    child: ExtentIterator,
    model: ScoringModel,
    list: ListStatistics,
    collection: CollectionStatistics,
}

impl ScoreIterator {
    pub fn new(
        child: ExtentIterator,
        model: ScoringModel,
        list: ListStatistics,
        collection: CollectionStatistics,
    ) -> Self {
        Self {
            child,
            model,
            list,
            collection,
        }
    }

    pub fn statistics(&self) -> ListStatistics {
        self.list
    }
}

impl Positioned for ScoreIterator {
    fn document(&self) -> Option<DocumentNumber> {
        self.child.document()
    }

    fn next_document(&mut self) -> Result<()> {
        self.child.next_document()
    }

    fn move_to(&mut self, target: DocumentNumber) -> Result<()> {
        self.child.move_to(target)
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()
    }
}

impl Scorable for ScoreIterator {
    fn score(&self, document: DocumentNumber, length: u32) -> f64 {
        let count = if self.child.document() == Some(document) {
            self.child.count()
        } else {
            0
        };
        self.model.score(count, length, &self.list, &self.collection)
    }
}

/// Weighted sum of child scores over every document any child matches
pub struct CombineIterator {
    children: Vec<Scorer>,
    weights: Vec<f64>,
    queue: BinaryHeap<Reverse<(DocumentNumber, usize)>>,
}

impl CombineIterator {
    /// Missing weights default to 1
    pub fn new(children: Vec<Scorer>, weights: &[f64]) -> Self {
        let weights = (0..children.len())
            .map(|i| weights.get(i).copied().unwrap_or(1.0))
            .collect();
        let mut combine = Self {
            children,
            weights,
            queue: BinaryHeap::new(),
        };
        combine.rebuild();
        combine
    }

    fn rebuild(&mut self) {
        self.queue = self
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.document().map(|d| Reverse((d, i))))
            .collect();
    }

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
        Ok(())
    }
}

impl Positioned for CombineIterator {
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

impl Scorable for CombineIterator {
    fn score(&self, document: DocumentNumber, length: u32) -> f64 {
        self.children
            .iter()
            .zip(&self.weights)
            .map(|(child, weight)| weight * child.score(document, length))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::iterator::MemoryListIterator;
    use crate::segment::{Extent, InvertedList, ListKind};

    fn list(docs: &[(u64, u32)]) -> (ExtentIterator, ListStatistics) {
        let mut list = InvertedList::new(ListKind::Positions);
        for &(doc, count) in docs {
            for p in 0..count {
                list.add(doc, Extent::position(p)).unwrap();
            }
        }
        let stats = ListStatistics::new(list.document_frequency(), list.total_count());
        (Box::new(MemoryListIterator::new(&list)), stats)
    }

    fn scorer(docs: &[(u64, u32)], collection: CollectionStatistics) -> Scorer {
        let (child, stats) = list(docs);
        Box::new(ScoreIterator::new(
            child,
            ScoringModel::default(),
            stats,
            collection,
        ))
    }

    #[test]
    fn test_absent_document_scores_as_zero_count() {
        let collection = CollectionStatistics::new(1_000, 10);
        let (child, stats) = list(&[(2, 3)]);
        let it = ScoreIterator::new(child, ScoringModel::default(), stats, collection);

        let present = it.score(2, 100);
        let absent = it.score(5, 100);
        assert!(present > absent);
        assert_eq!(
            absent,
            ScoringModel::default().score(0, 100, &stats, &collection)
        );
    }

    #[test]
    fn test_combine_walks_union_and_sums() {
        let collection = CollectionStatistics::new(1_000, 10);
        let a = scorer(&[(1, 2), (4, 1)], collection);
        let b = scorer(&[(4, 5), (7, 1)], collection);
        let mut combine = CombineIterator::new(vec![a, b], &[2.0]);

        let mut documents = Vec::new();
        while let Some(doc) = combine.document() {
            documents.push(doc);
            combine.next_document().unwrap();
        }
        assert_eq!(documents, vec![1, 4, 7]);

        combine.reset().unwrap();
        combine.move_to(4).unwrap();
        let both = combine.score(4, 50);
        let (child_a, stats_a) = list(&[(1, 2), (4, 1)]);
        let mut only_a = ScoreIterator::new(child_a, ScoringModel::default(), stats_a, collection);
        only_a.move_to(4).unwrap();
        assert!(both < 0.0);
        assert!(both < 2.0 * only_a.score(4, 50));
    }
}
