//! Porter stemming with a bounded memo table
//!
//! Stemming the same high-frequency words over and over dominates indexing
//! time with stemming enabled, so results are cached. The cache is cleared
//! whenever it grows past its limit.

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;

pub struct CachedStemmer {
    stemmer: Stemmer,
    cache: HashMap<String, String>,
    limit: usize,
}

impl CachedStemmer {
    /// Create an English stemmer caching at most `limit` words
    pub fn new(limit: usize) -> Self {
        Self::with_algorithm(Algorithm::English, limit)
    }

    pub fn with_algorithm(algorithm: Algorithm, limit: usize) -> Self {
        Self {
            stemmer: Stemmer::create(algorithm),
            cache: HashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Stem a single term
    pub fn stem(&mut self, term: &str) -> String {
        if let Some(stem) = self.cache.get(term) {
            return stem.clone();
        }

        let stem = self.stemmer.stem(term).into_owned();
        if self.cache.len() >= self.limit {
            self.cache.clear();
        }
        self.cache.insert(term.to_string(), stem.clone());
        stem
    }

    /// Number of cached words
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for CachedStemmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStemmer")
            .field("cached", &self.cache.len())
            .field("limit", &self.limit)
            .finish()
    }
}
