//! Merging on-disk segments
//!
//! Inputs are combined part by part with the key merger. Source segments are
//! only read; the output is staged and published like a flush, so a failed
//! merge leaves the inputs usable and no output directory behind.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::corpus::{decode_document, encode_document};
use super::documents::{encode_lengths, encode_names, LENGTHS_FILE, NAMES_FILE};
use super::key_merge::merge_by_key;
use super::manifest::SegmentManifest;
use super::part::{PartCursor, PartWriter};
use super::postings::{DiskListCursor, ListWriter};
use super::reader::SegmentReader;
use super::statistics::CollectionStatistics;
use super::types::{DocumentNumber, PartCodec, PartName};
use super::writer::{part_path, run_threaded, SegmentSummary, StagedSegment, WriteOptions};
use crate::error::{GeodexError, Result};

/// Maps each input's document numbers into the merged segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentNumberMapping {
    bases: Vec<u64>,
}

impl DocumentNumberMapping {
    /// Keep every document number as it is
    pub fn identity(inputs: usize) -> Self {
        Self {
            bases: vec![0; inputs],
        }
    }

    /// Give each input a disjoint range in input order.
    ///
    /// Input `i` is shifted by the sum of `highest + 1` over all earlier inputs.
    pub fn renumbered(highest: &[Option<DocumentNumber>]) -> Self {
        let mut bases = Vec::with_capacity(highest.len());
        let mut next = 0u64;
        for h in highest {
            bases.push(next);
            next += h.map_or(0, |h| h + 1);
        }
        Self { bases }
    }

    pub fn map(&self, input: usize, document: DocumentNumber) -> DocumentNumber {
        self.bases[input] + document
    }

    pub fn base(&self, input: usize) -> u64 {
        self.bases[input]
    }
}

/// How a merge is performed
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    /// Treat inputs as independently numbered and give each a fresh range
    pub renumber: bool,
    pub write: WriteOptions,
}

/// One independent output file of a merge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeTask {
    Documents,
    Part(PartName, PartCodec),
}

pub struct SegmentMerger {
    options: MergeOptions,
}

impl SegmentMerger {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    /// Parts every input carries with the same codec
    pub fn common_parts(inputs: &[Arc<SegmentReader>]) -> Vec<(PartName, PartCodec)> {
        let Some(first) = inputs.first() else {
            return Vec::new();
        };
        first
            .manifest()
            .parts
            .iter()
            .filter(|(&part, &codec)| inputs.iter().all(|r| r.codec(part) == Some(codec)))
            .map(|(&part, &codec)| (part, codec))
            .collect()
    }

    /// Merge `inputs` into a new segment at `target`
    pub fn merge(&self, inputs: &[Arc<SegmentReader>], target: &Path) -> Result<SegmentSummary> {
        if inputs.is_empty() {
            return Err(GeodexError::Merge("no segments to merge".to_string()));
        }
        let start = Instant::now();

        let mut inputs = inputs.to_vec();
        let mapping = if self.options.renumber {
            let highest: Vec<_> = inputs.iter().map(|r| r.highest_document()).collect();
            DocumentNumberMapping::renumbered(&highest)
        } else {
            inputs.sort_by_key(|r| r.document_number_offset());
            check_disjoint(&inputs)?;
            DocumentNumberMapping::identity(inputs.len())
        };

        let parts = Self::common_parts(&inputs);
        for input in &inputs {
            for &part in input.manifest().parts.keys() {
                if !parts.iter().any(|(p, _)| *p == part) {
                    warn!(
                        part = %part,
                        path = %input.path().display(),
                        "part not shared by every merge input, dropping it"
                    );
                }
            }
        }

        let staged = StagedSegment::create(target, &self.options.write)?;
        let dir = staged.path().to_path_buf();

        let mut tasks = vec![MergeTask::Documents];
        tasks.extend(parts.iter().map(|&(p, c)| MergeTask::Part(p, c)));

        let run = |task| merge_task(&inputs, &mapping, &dir, task);
        let part_bytes = if self.options.write.threaded {
            run_threaded(&tasks, run)?
        } else {
            let mut total = 0;
            for &task in &tasks {
                total += run(task)?;
            }
            total
        };

        let input_statistics: Vec<_> = inputs.iter().map(|r| r.statistics()).collect();
        let statistics = CollectionStatistics::aggregate(&input_statistics);
        let offset = inputs
            .iter()
            .enumerate()
            .map(|(i, r)| mapping.map(i, r.document_number_offset()))
            .min()
            .unwrap_or(0);

        let mut manifest = SegmentManifest::new(statistics, offset);
        for &(part, codec) in &parts {
            manifest = manifest.with_part(part, codec);
        }
        manifest.write(&dir)?;
        let path = staged.commit()?;

        info!(
            path = %path.display(),
            inputs = inputs.len(),
            documents = manifest.document_count,
            bytes = part_bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "merged segments"
        );

        Ok(SegmentSummary {
            path,
            manifest,
            part_bytes,
        })
    }
}

/// Inputs kept at their own numbers must cover disjoint ranges
fn check_disjoint(sorted: &[Arc<SegmentReader>]) -> Result<()> {
    for pair in sorted.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if let (Some(high), Some(low)) = (a.highest_document(), b.names().first_document()) {
            if high >= low {
                return Err(GeodexError::Merge(format!(
                    "{} and {} overlap at document {}",
                    a.path().display(),
                    b.path().display(),
                    low
                )));
            }
        }
    }
    Ok(())
}

fn merge_task(
    inputs: &[Arc<SegmentReader>],
    mapping: &DocumentNumberMapping,
    dir: &Path,
    task: MergeTask,
) -> Result<u64> {
    match task {
        MergeTask::Documents => {
            merge_documents(inputs, mapping, dir)?;
            Ok(0)
        }
        MergeTask::Part(part, PartCodec::Corpus) => merge_corpus(inputs, mapping, dir, part),
        MergeTask::Part(part, codec) => merge_lists(inputs, mapping, dir, part, codec),
    }
}

fn merge_documents(
    inputs: &[Arc<SegmentReader>],
    mapping: &DocumentNumberMapping,
    dir: &Path,
) -> Result<()> {
    let count: usize = inputs.iter().map(|r| r.names().len()).sum();

    let mut names = Vec::with_capacity(count);
    let mut lengths = Vec::with_capacity(count);
    for (i, input) in inputs.iter().enumerate() {
        for (document, name) in input.names().iter() {
            names.push((mapping.map(i, document), name.as_str()));
        }
        for (document, length) in input.lengths().iter() {
            lengths.push((mapping.map(i, document), length));
        }
    }
    if names.windows(2).any(|w| w[1].0 <= w[0].0) {
        return Err(GeodexError::Corrupt(
            "merged document numbers not strictly increasing".to_string(),
        ));
    }

    std::fs::write(dir.join(NAMES_FILE), encode_names(names, count))?;
    std::fs::write(dir.join(LENGTHS_FILE), encode_lengths(lengths, count))?;
    Ok(())
}

fn part_cursors(inputs: &[Arc<SegmentReader>], part: PartName) -> Result<Vec<PartCursor>> {
    inputs
        .iter()
        .map(|r| {
            r.part(part)
                .map(|p| p.cursor())
                .ok_or_else(|| GeodexError::UnsupportedPart(part.to_string()))
        })
        .collect()
}

fn merge_lists(
    inputs: &[Arc<SegmentReader>],
    mapping: &DocumentNumberMapping,
    dir: &Path,
    part: PartName,
    codec: PartCodec,
) -> Result<u64> {
    let kind = codec
        .list_kind()
        .ok_or_else(|| GeodexError::UnsupportedPart(part.to_string()))?;
    let mut cursors = part_cursors(inputs, part)?;
    let mut writer = PartWriter::create(&part_path(dir, part), codec)?;
    let mut payload = Vec::new();

    merge_by_key(&mut cursors, |key, group, cursors| {
        let mut list = ListWriter::new(kind);
        for &source in group {
            let cursor = &cursors[source];
            let (start, end) = cursor.value_range()?;
            let mut postings =
                DiskListCursor::new(Arc::clone(cursor.reader().data()), start, end, kind)?;
            while let Some(document) = postings.document() {
                list.add_document(
                    mapping.map(source, document),
                    postings.extents().iter().copied(),
                )?;
                postings.advance()?;
            }
        }
        payload.clear();
        list.finish_into(&mut payload);
        writer.add(key, &payload)
    })?;

    Ok(writer.finish()?.bytes)
}

fn merge_corpus(
    inputs: &[Arc<SegmentReader>],
    mapping: &DocumentNumberMapping,
    dir: &Path,
    part: PartName,
) -> Result<u64> {
    let mut cursors = part_cursors(inputs, part)?;
    let mut writer = PartWriter::create(&part_path(dir, part), PartCodec::Corpus)?;

    merge_by_key(&mut cursors, |key, group, cursors| {
        // the newest copy of a repeated identifier wins
        let source = group[group.len() - 1];
        let mut document = decode_document(cursors[source].value()?)?;
        document.number = mapping.map(source, document.number);
        writer.add(key, &encode_document(&document)?)
    })?;

    Ok(writer.finish()?.bytes)
}
