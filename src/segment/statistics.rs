//! Collection statistics and scoring functions
//!
//! Every segment reports its own counters; the query path sums them across
//! all live segments (plus the memory segment) so that scores do not depend
//! on how documents happen to be split into segments.

use serde::{Deserialize, Serialize};

use crate::error::{GeodexError, Result};

/// Counters describing a set of documents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatistics {
    /// Sum of all document lengths
    pub collection_length: u64,
    pub document_count: u64,
}

impl CollectionStatistics {
    pub fn new(collection_length: u64, document_count: u64) -> Self {
        Self {
            collection_length,
            document_count,
        }
    }

    /// Add the counters of another disjoint set of documents
    pub fn merge(&mut self, other: &CollectionStatistics) {
        self.collection_length += other.collection_length;
        self.document_count += other.document_count;
    }

    /// Sum the counters of many disjoint sets
    pub fn aggregate<'a>(parts: impl IntoIterator<Item = &'a CollectionStatistics>) -> Self {
        let mut total = CollectionStatistics::default();
        for part in parts {
            total.merge(part);
        }
        total
    }

    /// Average document length
    pub fn average_length(&self) -> f64 {
        if self.document_count == 0 {
            0.0
        } else {
            self.collection_length as f64 / self.document_count as f64
        }
    }
}

/// Counters of a single inverted list ("node statistics")
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListStatistics {
    /// Number of documents containing the key
    pub document_frequency: u64,
    /// Number of occurrences across all documents
    pub total_count: u64,
}

impl ListStatistics {
    pub fn new(document_frequency: u64, total_count: u64) -> Self {
        Self {
            document_frequency,
            total_count,
        }
    }

    pub fn merge(&mut self, other: &ListStatistics) {
        self.document_frequency += other.document_frequency;
        self.total_count += other.total_count;
    }
}

/// BM25+ parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter
    pub k1: f64,
    /// Length normalization parameter
    pub b: f64,
    /// Lower bound added for documents that contain the term
    pub delta: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            delta: 1.0,
        }
    }
}

/// Scoring function applied to a leaf of the query tree
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ScoringModel {
    /// Query likelihood with Dirichlet smoothing
    Dirichlet { mu: f64 },
    Bm25(Bm25Params),
}

impl Default for ScoringModel {
    fn default() -> Self {
        ScoringModel::Dirichlet { mu: 1500.0 }
    }
}

impl ScoringModel {
    pub fn bm25() -> Self {
        ScoringModel::Bm25(Bm25Params::default())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ScoringModel::Dirichlet { mu } if mu.is_nan() || *mu <= 0.0 => Err(
                GeodexError::Config(format!("dirichlet mu must be positive, got {}", mu)),
            ),
            ScoringModel::Bm25(p) if p.k1 < 0.0 || !(0.0..=1.0).contains(&p.b) => Err(
                GeodexError::Config(format!("invalid bm25 parameters {:?}", p)),
            ),
            _ => Ok(()),
        }
    }

    /// Score `count` occurrences in a document of `length` tokens
    pub fn score(
        &self,
        count: u32,
        length: u32,
        list: &ListStatistics,
        collection: &CollectionStatistics,
    ) -> f64 {
        match *self {
            ScoringModel::Dirichlet { mu } => {
                let collection_length = collection.collection_length.max(1) as f64;
                let background = if list.total_count > 0 {
                    list.total_count as f64 / collection_length
                } else {
                    0.5 / collection_length
                };
                ((count as f64 + mu * background) / (length as f64 + mu)).ln()
            }
            ScoringModel::Bm25(params) => {
                if count == 0 {
                    return 0.0;
                }
                let avgdl = collection.average_length();
                if avgdl == 0.0 || collection.document_count == 0 {
                    return 0.0;
                }

                // Robertson-Sparck-Jones IDF, kept positive
                let n = collection.document_count as f64;
                let df = list.document_frequency as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

                let tf = count as f64;
                let norm = 1.0 - params.b + params.b * (length as f64 / avgdl);
                let tf_component = (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm);
                idf * (tf_component + params.delta)
            }
        }
    }
}
