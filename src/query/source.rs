//! Shards a query can be evaluated against
//!
//! Every on-disk segment is a shard. The memory segment is captured as a
//! [`MemorySnapshot`] holding only the lists a query touches, so evaluation
//! never holds the ingest lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::iterator::{ExtentIterator, MemoryListIterator};
use super::node::QueryNode;
use crate::error::Result;
use crate::segment::{
    CollectionStatistics, DocumentNumber, ListStatistics, MemorySegment, PartName, SegmentReader,
};

/// Read access to one shard
pub trait QuerySource: Send + Sync {
    /// Iterator over the list under `key`, `None` when the shard lacks it
    fn list(&self, part: PartName, key: &[u8]) -> Result<Option<ExtentIterator>>;

    fn list_statistics(&self, part: PartName, key: &[u8]) -> Result<Option<ListStatistics>>;

    fn document_length(&self, document: DocumentNumber) -> Option<u32>;

    fn document_name(&self, document: DocumentNumber) -> Option<String>;

    fn statistics(&self) -> CollectionStatistics;
}

impl QuerySource for SegmentReader {
    fn list(&self, part: PartName, key: &[u8]) -> Result<Option<ExtentIterator>> {
        Ok(SegmentReader::list(self, part, key)?.map(|cursor| Box::new(cursor) as ExtentIterator))
    }

    fn list_statistics(&self, part: PartName, key: &[u8]) -> Result<Option<ListStatistics>> {
        SegmentReader::list_statistics(self, part, key)
    }

    fn document_length(&self, document: DocumentNumber) -> Option<u32> {
        SegmentReader::document_length(self, document)
    }

    fn document_name(&self, document: DocumentNumber) -> Option<String> {
        SegmentReader::document_name(self, document).map(str::to_string)
    }

    fn statistics(&self) -> CollectionStatistics {
        SegmentReader::statistics(self)
    }
}

/// Lists named by a query, as `(part, key)` pairs
pub fn referenced_lists(node: &QueryNode) -> Vec<(PartName, Vec<u8>)> {
    fn walk(node: &QueryNode, out: &mut Vec<(PartName, Vec<u8>)>) {
        match node {
            QueryNode::Term { part, key } => out.push((*part, key.as_bytes().to_vec())),
            QueryNode::Extent { tag } => out.push((PartName::Extents, tag.as_bytes().to_vec())),
            other => {
                for child in other.children() {
                    walk(child, out);
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(node, &mut out);
    out.sort();
    out.dedup();
    out
}

/// Point-in-time copy of the parts of a memory segment one query needs.
///
/// Lists are copied; lengths and names are read from the shared segment,
/// bounded to the documents present at capture time.
#[derive(Clone, Debug)]
pub struct MemorySnapshot {
    memory: Arc<RwLock<MemorySegment>>,
    offset: DocumentNumber,
    documents: u64,
    statistics: CollectionStatistics,
    lists: BTreeMap<(PartName, Vec<u8>), (MemoryListIterator, ListStatistics)>,
}

impl MemorySnapshot {
    pub fn capture(memory: &Arc<RwLock<MemorySegment>>, lists: &[(PartName, Vec<u8>)]) -> Self {
        let segment = memory.read();
        let lists = lists
            .iter()
            .filter_map(|(part, key)| {
                let list = segment.list(*part, key)?;
                let statistics =
                    ListStatistics::new(list.document_frequency(), list.total_count());
                Some(((*part, key.clone()), (MemoryListIterator::new(list), statistics)))
            })
            .collect();
        Self {
            memory: Arc::clone(memory),
            offset: segment.document_number_offset(),
            documents: segment.document_count(),
            statistics: segment.statistics(),
            lists,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.document_count == 0
    }

    fn captured(&self, document: DocumentNumber) -> bool {
        document
            .checked_sub(self.offset)
            .is_some_and(|i| i < self.documents)
    }
}

impl QuerySource for MemorySnapshot {
    fn list(&self, part: PartName, key: &[u8]) -> Result<Option<ExtentIterator>> {
        Ok(self
            .lists
            .get(&(part, key.to_vec()))
            .map(|(list, _)| Box::new(list.clone()) as ExtentIterator))
    }

    fn list_statistics(&self, part: PartName, key: &[u8]) -> Result<Option<ListStatistics>> {
        Ok(self.lists.get(&(part, key.to_vec())).map(|(_, s)| *s))
    }

    fn document_length(&self, document: DocumentNumber) -> Option<u32> {
        if !self.captured(document) {
            return None;
        }
        self.memory.read().document_length(document)
    }

    fn document_name(&self, document: DocumentNumber) -> Option<String> {
        if !self.captured(document) {
            return None;
        }
        self.memory.read().document_name(document).map(str::to_string)
    }

    fn statistics(&self) -> CollectionStatistics {
        self.statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::query::iterator::collect_counts;
    use crate::segment::MemorySegmentOptions;

    #[test]
    fn test_snapshot_keeps_only_referenced_lists() {
        let memory = Arc::new(RwLock::new(MemorySegment::new(
            10,
            &MemorySegmentOptions::default(),
        )));
        let mut segment = memory.write();
        segment
            .process(
                Document::new("a", 10)
                    .with_terms(["red", "fish"])
                    .with_tag("title", 0, 1),
            )
            .unwrap();
        segment
            .process(Document::new("b", 11).with_terms(["blue", "fish", "fish"]))
            .unwrap();

        let query = QueryNode::And {
            children: vec![QueryNode::term("fish"), QueryNode::extent("title")],
        };
        let keys = referenced_lists(&query);
        assert_eq!(
            keys,
            vec![
                (PartName::Postings, b"fish".to_vec()),
                (PartName::Extents, b"title".to_vec())
            ]
        );

        drop(segment);
        let snapshot = MemorySnapshot::capture(&memory, &keys);
        // later ingestion does not show through
        memory
            .write()
            .process(Document::new("c", 12).with_terms(["fish"]))
            .unwrap();

        let mut fish = snapshot.list(PartName::Postings, b"fish").unwrap().unwrap();
        assert_eq!(collect_counts(fish.as_mut()).unwrap(), vec![(10, 1), (11, 2)]);
        assert!(snapshot.list(PartName::Postings, b"red").unwrap().is_none());
        assert_eq!(
            snapshot.list_statistics(PartName::Postings, b"fish").unwrap(),
            Some(ListStatistics::new(2, 3))
        );
        assert_eq!(snapshot.document_length(11), Some(3));
        assert_eq!(snapshot.document_name(10).as_deref(), Some("a"));
        assert_eq!(snapshot.document_name(12), None);
        assert_eq!(snapshot.statistics(), CollectionStatistics::new(5, 2));
    }
}
