//! K-way merge of sorted key streams
//!
//! The same routine merges the parts of on-disk segments and fans in
//! per-segment list statistics at query time; only the per-key callback
//! differs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::part::PartCursor;
use crate::error::Result;

/// A stream of strictly increasing byte keys
pub trait KeyIterator {
    /// Current key, `None` once exhausted
    fn key(&self) -> Option<&[u8]>;

    /// Step past the current key
    fn advance(&mut self) -> Result<()>;
}

impl KeyIterator for PartCursor {
    fn key(&self) -> Option<&[u8]> {
        PartCursor::key(self)
    }

    fn advance(&mut self) -> Result<()> {
        PartCursor::advance(self);
        Ok(())
    }
}

/// An in-memory sorted list of keyed values
#[derive(Clone, Debug)]
pub struct SortedEntries<V> {
    entries: Vec<(Vec<u8>, V)>,
    index: usize,
}

impl<V> SortedEntries<V> {
    /// Sorts `entries` by key; later duplicates are dropped
    pub fn new(mut entries: Vec<(Vec<u8>, V)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|later, earlier| later.0 == earlier.0);
        Self { entries, index: 0 }
    }

    /// Value under the current key
    pub fn value(&self) -> Option<&V> {
        self.entries.get(self.index).map(|(_, v)| v)
    }
}

impl<V> KeyIterator for SortedEntries<V> {
    fn key(&self) -> Option<&[u8]> {
        self.entries.get(self.index).map(|(k, _)| k.as_slice())
    }

    fn advance(&mut self) -> Result<()> {
        self.index += 1;
        Ok(())
    }
}

/// Heap entry ordered so the smallest key pops first
struct HeapEntry {
    key: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merge `iterators` by key.
///
/// For every distinct key, `callback` receives the key, the indices of all
/// iterators positioned on it (ascending) and the iterators themselves. The
/// grouped iterators are then advanced. A callback error aborts the merge.
/// Returns the number of distinct keys.
pub fn merge_by_key<I, F>(iterators: &mut [I], mut callback: F) -> Result<u64>
where
    I: KeyIterator,
    F: FnMut(&[u8], &[usize], &mut [I]) -> Result<()>,
{
    let mut heap = BinaryHeap::with_capacity(iterators.len());
    for (source, iterator) in iterators.iter().enumerate() {
        if let Some(key) = iterator.key() {
            heap.push(HeapEntry {
                key: key.to_vec(),
                source,
            });
        }
    }

    let mut keys = 0u64;
    let mut group = Vec::with_capacity(iterators.len());
    while let Some(top) = heap.pop() {
        group.clear();
        group.push(top.source);
        while heap.peek().map_or(false, |e| e.key == top.key) {
            if let Some(entry) = heap.pop() {
                group.push(entry.source);
            }
        }
        group.sort_unstable();

        callback(&top.key, &group, iterators)?;
        keys += 1;

        for &source in &group {
            let iterator = &mut iterators[source];
            iterator.advance()?;
            if let Some(key) = iterator.key() {
                heap.push(HeapEntry {
                    key: key.to_vec(),
                    source,
                });
            }
        }
    }
    Ok(keys)
}
