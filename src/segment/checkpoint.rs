//! Crash-recovery checkpoint
//!
//! Written after every flush and merge. There is no write-ahead log: after a
//! crash, documents must be fed again starting at `lastDoc/number + 1`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::parameters::Parameters;
use super::types::DocumentNumber;
use crate::error::{GeodexError, Result};

const LAST_IDENTIFIER: &str = "lastDoc/identifier";
const LAST_NUMBER: &str = "lastDoc/number";
const BLOCK_COUNT: &str = "indexBlockCount";
const BIN_PREFIX: &str = "shards/bin-";

/// The last document covered by the on-disk segments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastDocument {
    pub identifier: String,
    pub number: DocumentNumber,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_document: Option<LastDocument>,
    /// Number of blocks flushed so far
    pub index_block_count: u64,
    /// Segment paths per generation
    pub bins: BTreeMap<usize, Vec<PathBuf>>,
}

impl Checkpoint {
    /// First document number that still has to be fed
    pub fn next_document_number(&self) -> Option<DocumentNumber> {
        self.last_document.as_ref().map(|d| d.number + 1)
    }

    pub fn segment_count(&self) -> usize {
        self.bins.values().map(|b| b.len()).sum()
    }

    pub fn to_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        if let Some(last) = &self.last_document {
            params.set(LAST_IDENTIFIER, &last.identifier);
            params.set(LAST_NUMBER, last.number);
        }
        params.set(BLOCK_COUNT, self.index_block_count);
        for (generation, paths) in &self.bins {
            let key = format!("{}{}", BIN_PREFIX, generation);
            for path in paths {
                params.add(key.clone(), path.display());
            }
        }
        params
    }

    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        let last_document = match (params.get(LAST_IDENTIFIER), params.get_u64(LAST_NUMBER)?) {
            (Some(identifier), Some(number)) => Some(LastDocument {
                identifier: identifier.to_string(),
                number,
            }),
            (None, None) => None,
            _ => {
                return Err(GeodexError::Corrupt(
                    "checkpoint has a partial lastDoc entry".to_string(),
                ))
            }
        };

        let mut bins = BTreeMap::new();
        for key in params.keys_with_prefix(BIN_PREFIX) {
            let generation: usize = key[BIN_PREFIX.len()..]
                .parse()
                .map_err(|_| GeodexError::Corrupt(format!("bad checkpoint key {}", key)))?;
            if generation == 0 {
                return Err(GeodexError::Corrupt("generation 0 in checkpoint".to_string()));
            }
            let paths = params.get_all(key).iter().map(PathBuf::from).collect();
            bins.insert(generation, paths);
        }

        Ok(Self {
            last_document,
            index_block_count: params.get_u64(BLOCK_COUNT)?.unwrap_or(0),
            bins,
        })
    }

    /// Read the checkpoint at `path`; `Ok(None)` when there is none
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let params = Parameters::read(path)?;
        Self::from_parameters(&params).map(Some)
    }

    /// Replace the checkpoint at `path` atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_parameters().write_atomic(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        let mut bins = BTreeMap::new();
        bins.insert(1, vec![PathBuf::from("/idx/shard-00000004")]);
        bins.insert(
            3,
            vec![
                PathBuf::from("/idx/shard-00000001"),
                PathBuf::from("/idx/shard-00000002"),
            ],
        );
        Checkpoint {
            last_document: Some(LastDocument {
                identifier: "doc-41".to_string(),
                number: 41,
            }),
            index_block_count: 7,
            bins,
        }
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint");
        assert_eq!(Checkpoint::load(&path).unwrap(), None);

        let checkpoint = sample();
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.next_document_number(), Some(42));
        assert_eq!(loaded.segment_count(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("shards/bin-3=/idx/shard-00000002"));
        assert!(text.contains("lastDoc/number=41"));
    }

    #[test]
    fn test_empty_checkpoint() {
        let params = Checkpoint::default().to_parameters();
        let loaded = Checkpoint::from_parameters(&params).unwrap();
        assert_eq!(loaded, Checkpoint::default());
        assert_eq!(loaded.next_document_number(), None);
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let params = Parameters::parse("lastDoc/number=3\n").unwrap();
        assert!(Checkpoint::from_parameters(&params).is_err());

        let params = Parameters::parse("shards/bin-x=/a\n").unwrap();
        assert!(Checkpoint::from_parameters(&params).is_err());
    }
}
