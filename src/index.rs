//! Geometric index driver
//!
//! Feeds documents into the live memory segment, flushes it every
//! `index_block_size` documents into a generation-1 segment and keeps the
//! number of live segments logarithmic by merging full generations. Readers
//! only ever see an [`IndexView`] snapshot, published through `ArcSwap` after
//! every flush or merge.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{GeometricConfig, MergeMode};
use crate::error::{GeodexError, Result};
use crate::models::{Document, DocumentNumber, SearchResults};
use crate::query::{referenced_lists, MemorySnapshot, QueryEvaluator, QueryNode, Shard};
use crate::segment::{
    remove_stale_staging, Checkpoint, CollectionStatistics, GeometricPartitions, LastDocument,
    MemorySegment, MemorySegmentOptions, MergeCandidates, MergeOptions, PartCodec, PartName,
    SegmentId, SegmentMerger, SegmentReader, SegmentWriter, WriteOptions,
};
use crate::store::DocumentStore;

/// Directory name of the segment produced by `close`
pub const FINAL_SEGMENT: &str = "final";

/// Point-in-time view of the index
#[derive(Debug)]
pub struct IndexView {
    memory: Arc<RwLock<MemorySegment>>,
    /// Newest first
    readers: Vec<Arc<SegmentReader>>,
    /// Summed over the readers only
    statistics: CollectionStatistics,
    /// Parts every reader agrees on
    parts: BTreeMap<PartName, PartCodec>,
}

impl IndexView {
    fn new(memory: Arc<RwLock<MemorySegment>>, mut readers: Vec<Arc<SegmentReader>>) -> Self {
        readers.sort_by_key(|r| std::cmp::Reverse(r.document_number_offset()));
        let reader_statistics: Vec<_> = readers.iter().map(|r| r.statistics()).collect();
        let statistics = CollectionStatistics::aggregate(&reader_statistics);
        let parts = agreed_parts(&readers);
        Self {
            memory,
            readers,
            statistics,
            parts,
        }
    }

    pub fn readers(&self) -> &[Arc<SegmentReader>] {
        &self.readers
    }

    pub fn memory(&self) -> &Arc<RwLock<MemorySegment>> {
        &self.memory
    }

    /// Counters over the segments and the live memory segment
    pub fn statistics(&self) -> CollectionStatistics {
        let mut statistics = self.statistics;
        statistics.merge(&self.memory.read().statistics());
        statistics
    }

    /// Parts a query may use, with the codec every shard stores them in.
    ///
    /// A part is available only when the memory segment and every reader
    /// carry it with the same codec.
    pub fn available_parts(&self) -> BTreeMap<PartName, PartCodec> {
        let memory = self.memory.read();
        let memory_parts: BTreeMap<_, _> = memory.parts().into_iter().collect();
        if self.readers.is_empty() {
            return memory_parts;
        }
        if memory.is_empty() {
            return self.parts.clone();
        }
        self.parts
            .iter()
            .filter(|(part, codec)| memory_parts.get(part) == Some(codec))
            .map(|(part, codec)| (*part, *codec))
            .collect()
    }

    /// Lookup view over stored documents
    pub fn store(&self) -> DocumentStore {
        DocumentStore::new(Arc::clone(&self.memory), self.readers.clone())
    }
}

fn agreed_parts(readers: &[Arc<SegmentReader>]) -> BTreeMap<PartName, PartCodec> {
    let mut parts = BTreeMap::new();
    let Some((first, rest)) = readers.split_first() else {
        return parts;
    };
    for part in PartName::ALL {
        let Some(codec) = first.codec(part) else {
            continue;
        };
        if rest.iter().all(|r| r.codec(part) == Some(codec)) {
            parts.insert(part, codec);
        } else {
            debug!(%part, "segments disagree on part, dropping it");
        }
    }
    parts
}

/// Ingestion state, serialized by one mutex
#[derive(Debug)]
struct Ingest {
    next_segment: SegmentId,
    documents: u64,
    index_block_count: u64,
    last_document: Option<LastDocument>,
    closed: bool,
}

/// Incrementally built index over a directory of segments
pub struct GeometricIndex {
    config: GeometricConfig,
    memory_options: MemorySegmentOptions,
    write_options: WriteOptions,
    ingest: Mutex<Ingest>,
    partitions: Mutex<GeometricPartitions>,
    view: ArcSwap<IndexView>,
}

impl GeometricIndex {
    /// Open the index in `config.shard_directory`.
    ///
    /// With `resume` set, the segment set recorded by the checkpoint is
    /// reopened and numbering continues after its last document.
    pub fn open(config: GeometricConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.shard_directory)?;

        let staging_root = config.staging_root();
        let staging_tag = config.staging_tag();
        remove_stale_staging(&config.shard_directory, None)?;
        if staging_root != config.shard_directory {
            remove_stale_staging(&staging_root, Some(&staging_tag))?;
        }

        let mut partitions: GeometricPartitions = GeometricPartitions::new(config.radix);
        let mut next_document = config.first_document_number;
        let mut last_document = None;
        let mut index_block_count = 0;

        if config.resume {
            match Checkpoint::load(&config.checkpoint_path()) {
                Ok(Some(checkpoint)) => {
                    for (generation, paths) in &checkpoint.bins {
                        for path in paths {
                            if let Err(e) = partitions.add(*generation, path) {
                                warn!(
                                    path = %path.display(),
                                    error = %e,
                                    "skipping unreadable segment"
                                );
                            }
                        }
                    }
                    if let Some(next) = checkpoint.next_document_number() {
                        next_document = next;
                    }
                    last_document = checkpoint.last_document;
                    index_block_count = checkpoint.index_block_count;
                    info!(
                        segments = partitions.len(),
                        next_document, "restored index from checkpoint"
                    );
                }
                Ok(None) => {
                    warn!(
                        path = %config.shard_directory.display(),
                        "no checkpoint found, starting fresh"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "unreadable checkpoint, starting fresh");
                }
            }
        }

        // numbering continues after any restored segment
        if let Some(highest) = partitions
            .all_shards()
            .iter()
            .filter_map(|(_, r)| r.highest_document())
            .max()
        {
            next_document = next_document.max(highest + 1);
        }

        let next_segment = highest_segment_id(&config.shard_directory)?
            .map(|id| id.next())
            .unwrap_or(SegmentId::new(1));

        let memory_options = MemorySegmentOptions::from(&config);
        let memory = Arc::new(RwLock::new(MemorySegment::new(
            next_document,
            &memory_options,
        )));
        let readers = partitions.all_shards().into_iter().map(|(_, r)| r).collect();
        let view = IndexView::new(memory, readers);

        let write_options = WriteOptions::default()
            .threaded(config.threaded_flush)
            .staging_root(staging_root)
            .staging_tag(staging_tag);

        info!(
            path = %config.shard_directory.display(),
            radix = config.radix,
            block_size = config.index_block_size,
            segments = view.readers.len(),
            "opened geometric index"
        );

        Ok(Self {
            memory_options,
            write_options,
            ingest: Mutex::new(Ingest {
                next_segment,
                documents: 0,
                index_block_count,
                last_document,
                closed: false,
            }),
            partitions: Mutex::new(partitions),
            view: ArcSwap::from_pointee(view),
            config,
        })
    }

    pub fn config(&self) -> &GeometricConfig {
        &self.config
    }

    /// Index one document.
    ///
    /// Documents must arrive with consecutive numbers; anything else is
    /// rejected with `OutOfOrder` before the index changes.
    pub fn process(&self, document: Document) -> Result<()> {
        let mut ingest = self.ingest.lock();
        if ingest.closed {
            return Err(GeodexError::Closed);
        }

        let buffered = {
            let view = self.view.load();
            let mut memory = view.memory.write();
            memory.process(document)?;
            memory.document_count()
        };
        ingest.documents += 1;

        if buffered >= self.config.index_block_size {
            self.flush_locked(&mut ingest)?;
            if self.config.merge_mode == MergeMode::Geometric {
                self.maintain_locked(&mut ingest, 1)?;
            }
        }
        Ok(())
    }

    /// Write the buffered documents to a new generation-1 segment
    pub fn flush(&self) -> Result<Option<PathBuf>> {
        let mut ingest = self.ingest.lock();
        if ingest.closed {
            return Err(GeodexError::Closed);
        }
        self.flush_locked(&mut ingest)
    }

    fn flush_locked(&self, ingest: &mut Ingest) -> Result<Option<PathBuf>> {
        let view = self.view.load_full();
        let memory = view.memory.read();
        if memory.is_empty() {
            return Ok(None);
        }

        let target = self.config.shard_directory.join(ingest.next_segment.to_string());
        let writer = SegmentWriter::new(self.write_options.clone());
        let summary = match writer.flush(&memory, &target) {
            Ok(summary) => summary,
            Err(e) => {
                error!(path = %target.display(), error = %e, "flush failed");
                return Err(e);
            }
        };
        ingest.next_segment = ingest.next_segment.next();

        let fresh = Arc::new(RwLock::new(MemorySegment::new(
            memory.next_document_number(),
            &self.memory_options,
        )));
        let last_document = memory.names().last().map(|identifier| LastDocument {
            identifier: identifier.clone(),
            number: memory.next_document_number() - 1,
        });

        let Some(summary) = summary else {
            // documents without postings still advance the numbering
            drop(memory);
            self.publish(fresh);
            ingest.last_document = last_document;
            self.save_checkpoint(ingest)?;
            release_memory(view);
            return Ok(None);
        };

        let reader = match SegmentReader::open(&summary.path) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                error!(path = %summary.path.display(), error = %e, "flushed segment unreadable");
                return Err(e);
            }
        };
        drop(memory);

        self.partitions
            .lock()
            .add_shard(1, summary.path.clone(), reader);
        self.publish(fresh);
        ingest.index_block_count += 1;
        ingest.last_document = last_document;
        self.save_checkpoint(ingest)?;
        release_memory(view);
        Ok(Some(summary.path))
    }

    /// Run one cascading merge pass starting at `generation`
    fn maintain_locked(&self, ingest: &mut Ingest, generation: usize) -> Result<()> {
        let candidates = self
            .partitions
            .lock()
            .find_merge_candidates(generation, true);
        match candidates {
            Some(candidates) => {
                let target = self.config.shard_directory.join(ingest.next_segment.to_string());
                ingest.next_segment = ingest.next_segment.next();
                self.merge_candidates(ingest, candidates, &target)
            }
            None => Ok(()),
        }
    }

    fn merge_candidates(
        &self,
        ingest: &mut Ingest,
        candidates: MergeCandidates<SegmentReader>,
        target: &Path,
    ) -> Result<()> {
        debug!(
            generation = candidates.generation,
            sources = ?candidates.source_generations,
            inputs = candidates.len(),
            reason = ?candidates.reason,
            "merging segments"
        );
        let merger = SegmentMerger::new(MergeOptions {
            renumber: false,
            write: self.write_options.clone(),
        });
        let summary = merger
            .merge(&candidates.readers(), target)
            .map_err(|e| {
                error!(path = %target.display(), error = %e, "merge failed");
                e
            })?;
        let reader = Arc::new(SegmentReader::open(&summary.path).map_err(|e| {
            error!(path = %summary.path.display(), error = %e, "merged segment unreadable");
            e
        })?);

        {
            let mut partitions = self.partitions.lock();
            partitions.remove_shards(&candidates);
            partitions.add_shard(candidates.generation, summary.path.clone(), reader);
        }
        self.publish(Arc::clone(&self.view.load().memory));
        self.save_checkpoint(ingest)?;

        for path in candidates.paths() {
            if let Err(e) = fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %e, "could not delete merged segment");
            }
        }
        info!(
            path = %summary.path.display(),
            generation = candidates.generation,
            inputs = candidates.len(),
            documents = summary.manifest.document_count,
            "merged segments"
        );
        Ok(())
    }

    /// Flush what is buffered and merge every segment into one.
    ///
    /// The index accepts no documents afterwards. Returns the path of the
    /// remaining segment, if any.
    pub fn close(&self) -> Result<Option<PathBuf>> {
        let mut ingest = self.ingest.lock();
        if ingest.closed {
            return Err(GeodexError::Closed);
        }
        self.flush_locked(&mut ingest)?;

        let candidates = self
            .partitions
            .lock()
            .find_forced_merge()
            .filter(|c| !is_final_only(c));
        if let Some(candidates) = candidates {
            let mut target = self.config.shard_directory.join(FINAL_SEGMENT);
            if target.exists() {
                target = self.config.shard_directory.join(ingest.next_segment.to_string());
                ingest.next_segment = ingest.next_segment.next();
            }
            self.merge_candidates(&mut ingest, candidates, &target)?;
        }
        ingest.closed = true;

        let remaining = self.partitions.lock().all_shards();
        info!(
            documents = ingest.documents,
            segments = remaining.len(),
            "closed geometric index"
        );
        Ok(remaining.into_iter().next().map(|(path, _)| path))
    }

    pub fn is_closed(&self) -> bool {
        self.ingest.lock().closed
    }

    fn publish(&self, memory: Arc<RwLock<MemorySegment>>) {
        let readers = self
            .partitions
            .lock()
            .all_shards()
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        let view = IndexView::new(memory, readers);
        debug!(
            segments = view.readers.len(),
            documents = view.statistics.document_count,
            parts = view.parts.len(),
            "published index view"
        );
        self.view.store(Arc::new(view));
    }

    fn save_checkpoint(&self, ingest: &Ingest) -> Result<()> {
        let checkpoint = Checkpoint {
            last_document: ingest.last_document.clone(),
            index_block_count: ingest.index_block_count,
            bins: self.partitions.lock().generations().into_iter().collect(),
        };
        checkpoint.save(&self.config.checkpoint_path())
    }

    /// Current snapshot
    pub fn view(&self) -> Arc<IndexView> {
        self.view.load_full()
    }

    pub fn statistics(&self) -> CollectionStatistics {
        self.view.load().statistics()
    }

    /// Number of on-disk segments
    pub fn segment_count(&self) -> usize {
        self.view.load().readers.len()
    }

    /// Segment paths per generation, lowest generation first
    pub fn generations(&self) -> Vec<(usize, Vec<PathBuf>)> {
        self.partitions.lock().generations()
    }

    /// Number the next document must carry
    pub fn next_document_number(&self) -> DocumentNumber {
        self.view.load().memory.read().next_document_number()
    }

    /// Rank the best `count` documents for `query` across every segment
    pub fn evaluate(&self, query: &QueryNode, count: usize) -> Result<SearchResults> {
        let view = self.view.load_full();
        let lists = referenced_lists(query);

        let available = view.available_parts();
        if let Some((part, _)) = lists.iter().find(|(part, _)| !available.contains_key(part)) {
            return Err(GeodexError::UnsupportedPart(part.to_string()));
        }

        let snapshot = MemorySnapshot::capture(&view.memory, &lists);
        let mut shards: Vec<Shard> = view
            .readers
            .iter()
            .map(|r| Arc::clone(r) as Shard)
            .collect();
        if !snapshot.is_empty() {
            shards.push(Arc::new(snapshot));
        }

        QueryEvaluator::new(self.config.scoring, self.config.threaded_query)
            .evaluate(query, count, &shards)
    }

    /// Stored document by identifier; `None` when the corpus is disabled
    pub fn document(&self, identifier: &str) -> Result<Option<Document>> {
        if !self.config.corpus {
            return Ok(None);
        }
        self.view.load().store().get(identifier)
    }
}

/// Close a replaced memory segment unless a query still holds it
fn release_memory(view: Arc<IndexView>) {
    if let Ok(view) = Arc::try_unwrap(view) {
        if let Ok(memory) = Arc::try_unwrap(view.memory) {
            memory.into_inner().close();
        }
    }
}

/// True when the only candidate already is the `final` segment
fn is_final_only(candidates: &MergeCandidates<SegmentReader>) -> bool {
    let mut paths = candidates.paths();
    match (paths.next(), paths.next()) {
        (Some(path), None) => path.file_name().is_some_and(|name| name == FINAL_SEGMENT),
        _ => false,
    }
}

/// Largest `shard-*` id among the directories in `dir`
fn highest_segment_id(dir: &Path) -> Result<Option<SegmentId>> {
    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = SegmentId::from_dir_name(&entry.file_name().to_string_lossy()) {
            highest = highest.max(Some(id));
        }
    }
    Ok(highest)
}
