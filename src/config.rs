use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GeodexError, Result};
use crate::segment::ScoringModel;

/// When segments are merged
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Run one cascading maintenance pass after every flush
    Geometric,
    /// Only flush while ingesting; merge everything at close
    Deferred,
}

impl Default for MergeMode {
    fn default() -> Self {
        MergeMode::Geometric
    }
}

/// Configuration for a geometric index
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricConfig {
    /// Directory holding the segment directories and the checkpoint
    pub shard_directory: PathBuf,
    /// Candidate roots for staging directories; the first usable one wins
    pub temp_roots: Vec<PathBuf>,
    /// Number of documents buffered in memory before a flush
    pub index_block_size: u64,
    /// Number of same-generation segments that triggers a merge
    pub radix: usize,
    pub merge_mode: MergeMode,
    /// Number assigned to the first document of a fresh index
    pub first_document_number: u64,
    /// Also build the stemmed postings part
    pub stemming: bool,
    pub stemmer_cache_size: usize,
    /// Store the full documents in a corpus part
    pub corpus: bool,
    /// Write segment parts on scoped worker threads
    pub threaded_flush: bool,
    /// Evaluate each shard of a query on its own thread
    pub threaded_query: bool,
    /// Restore the segment set from the checkpoint on open
    pub resume: bool,
    pub scoring: ScoringModel,
}

impl Default for GeometricConfig {
    fn default() -> Self {
        Self {
            shard_directory: PathBuf::from("./shards"),
            temp_roots: Vec::new(),
            index_block_size: 50_000,
            radix: 3,
            merge_mode: MergeMode::Geometric,
            first_document_number: 0,
            stemming: false,
            stemmer_cache_size: 50_000,
            corpus: false,
            threaded_flush: num_cpus::get() > 1,
            threaded_query: num_cpus::get() > 1,
            resume: false,
            scoring: ScoringModel::default(),
        }
    }
}

impl GeometricConfig {
    /// Create a configuration rooted at the given shard directory
    pub fn new(shard_directory: impl Into<PathBuf>) -> Self {
        Self {
            shard_directory: shard_directory.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let config: GeometricConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Reject settings the index cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.index_block_size == 0 {
            return Err(GeodexError::Config(
                "index_block_size must be at least 1".to_string(),
            ));
        }
        if self.radix < 2 {
            return Err(GeodexError::Config(format!(
                "radix must be at least 2, got {}",
                self.radix
            )));
        }
        if self.stemming && self.stemmer_cache_size == 0 {
            return Err(GeodexError::Config(
                "stemmer_cache_size must be at least 1 when stemming".to_string(),
            ));
        }
        self.scoring.validate()
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.index_block_size = block_size;
        self
    }

    pub fn with_radix(mut self, radix: usize) -> Self {
        self.radix = radix;
        self
    }

    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    pub fn with_first_document_number(mut self, number: u64) -> Self {
        self.first_document_number = number;
        self
    }

    pub fn with_stemming(mut self, enabled: bool) -> Self {
        self.stemming = enabled;
        self
    }

    pub fn with_corpus(mut self, enabled: bool) -> Self {
        self.corpus = enabled;
        self
    }

    /// Toggle both flush and query fan-out
    pub fn with_threads(mut self, enabled: bool) -> Self {
        self.threaded_flush = enabled;
        self.threaded_query = enabled;
        self
    }

    pub fn with_resume(mut self, enabled: bool) -> Self {
        self.resume = enabled;
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_roots.push(root.into());
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringModel) -> Self {
        self.scoring = scoring;
        self
    }

    /// Path of the checkpoint file
    pub fn checkpoint_path(&self) -> PathBuf {
        self.shard_directory.join("checkpoint")
    }

    /// Pick the directory new segments are staged in.
    ///
    /// A temp root is usable when it exists (or can be created) and is a directory.
    /// Tag naming this index's staging directories, derived from the shard
    /// directory so that indexes sharing a staging root stay apart
    pub fn staging_tag(&self) -> String {
        let path = fs::canonicalize(&self.shard_directory)
            .unwrap_or_else(|_| self.shard_directory.clone());
        format!(
            "{:08x}",
            crc32fast::hash(path.to_string_lossy().as_bytes())
        )
    }

    pub fn staging_root(&self) -> PathBuf {
        for root in &self.temp_roots {
            if fs::create_dir_all(root).is_ok() && root.is_dir() {
                return root.clone();
            }
        }
        self.shard_directory.clone()
    }
}
