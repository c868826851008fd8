//! Segmented inverted index
//!
//! Documents accumulate in a mutable [`MemorySegment`] and are flushed to
//! immutable on-disk segments, which are merged by generation.
//!
//! # Architecture
//!
//! - `MemorySegment`: in-memory postings, extents, lengths and names
//! - `SegmentWriter`: flushes a memory segment into a staged directory
//! - `SegmentReader`: immutable segment reader, shared between queries
//! - `SegmentMerger`: merges segments part by part through the key merger
//! - `GeometricPartitions`: generation bins and the radix merge policy
//! - `Checkpoint`: persisted segment set for crash recovery

mod buffer;
mod checkpoint;
mod corpus;
mod documents;
mod key_merge;
mod manifest;
mod memory;
mod merge;
mod parameters;
mod part;
mod partitions;
mod postings;
mod reader;
mod statistics;
mod types;
mod vbyte;
mod writer;

pub use buffer::*;
pub use checkpoint::*;
pub use corpus::*;
pub use documents::*;
pub use key_merge::*;
pub use manifest::*;
pub use memory::*;
pub use merge::*;
pub use parameters::Parameters;
pub use part::*;
pub use partitions::*;
pub use postings::*;
pub use reader::*;
pub use statistics::*;
pub use types::*;
pub use vbyte::*;
pub use writer::*;
