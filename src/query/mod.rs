//! Query iterator algebra and evaluation
//!
//! Queries are typed [`QueryNode`] trees. Each node becomes a document-ordered
//! iterator: lists at the leaves, conjunctions, disjunctions and windows above
//! them, and scoring operators at the top. A query is evaluated on every shard
//! (each on-disk segment plus a snapshot of the memory segment) with
//! statistics merged across all of them.

pub mod conjunction;
pub mod disjunction;
pub mod evaluator;
pub mod iterator;
pub mod node;
pub mod scoring;
pub mod source;
pub mod window;

pub use conjunction::{Conjunction, ExtentLoader};
pub use disjunction::Disjunction;
pub use evaluator::{QueryEvaluator, QueryStatistics, Shard, TopK};
pub use iterator::{
    collect_counts, EmptyIterator, ExtentIterator, HasExtents, MemoryListIterator, Positioned,
    Scorable, Scorer,
};
pub use node::QueryNode;
pub use scoring::{CombineIterator, ScoreIterator};
pub use source::{referenced_lists, MemorySnapshot, QuerySource};
