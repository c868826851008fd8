//! Stored document lookups across the live segment set

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::models::Document;
use crate::segment::{MemorySegment, SegmentReader};

/// Read-only view over the corpus parts of one index snapshot
#[derive(Clone, Debug)]
pub struct DocumentStore {
    memory: Arc<RwLock<MemorySegment>>,
    readers: Vec<Arc<SegmentReader>>,
}

impl DocumentStore {
    /// `readers` are searched in the order given, newest first
    pub fn new(memory: Arc<RwLock<MemorySegment>>, readers: Vec<Arc<SegmentReader>>) -> Self {
        Self { memory, readers }
    }

    /// Document stored under `identifier`.
    ///
    /// The memory segment is checked first, then every segment from newest to
    /// oldest; the first hit wins.
    pub fn get(&self, identifier: &str) -> Result<Option<Document>> {
        if let Some(document) = self.memory.read().stored_document(identifier) {
            return Ok(Some(document.clone()));
        }
        for reader in &self.readers {
            if let Some(document) = reader.stored_document(identifier)? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    pub fn segment_count(&self) -> usize {
        self.readers.len()
    }
}
