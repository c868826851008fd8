use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::document::DocumentNumber;

/// A document number with its retrieval score
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: DocumentNumber,
    pub score: f64,
}

impl ScoredDocument {
    pub fn new(document: DocumentNumber, score: f64) -> Self {
        Self { document, score }
    }

    /// Result order: score descending, then document number descending
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.document.cmp(&self.document))
    }
}

/// Ranked results of one query evaluation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<ScoredDocument>,
    /// Identifier of every returned document, by number
    pub names: BTreeMap<DocumentNumber, String>,
    pub took_ms: u64,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Document numbers in rank order
    pub fn documents(&self) -> Vec<DocumentNumber> {
        self.results.iter().map(|r| r.document).collect()
    }

    /// Identifier of a returned document
    pub fn name(&self, document: DocumentNumber) -> Option<&str> {
        self.names.get(&document).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let mut results = vec![
            ScoredDocument::new(1, 0.5),
            ScoredDocument::new(2, 0.9),
            ScoredDocument::new(3, 0.5),
        ];
        results.sort_by(|a, b| a.rank_cmp(b));
        let docs: Vec<_> = results.iter().map(|r| r.document).collect();
        assert_eq!(docs, vec![2, 3, 1]);
    }
}
