//! Segment writer for flushing a memory segment to disk
//!
//! A segment is written into a staging directory and renamed into place
//! once every file, manifest last, is complete. A failed flush leaves no
//! directory at the target path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::buffer::InvertedList;
use super::corpus::encode_document;
use super::documents::{encode_lengths, encode_names, LENGTHS_FILE, NAMES_FILE};
use super::manifest::SegmentManifest;
use super::memory::MemorySegment;
use super::part::{PartSummary, PartWriter};
use super::postings::ListWriter;
use super::types::{DocumentNumber, PartName};
use crate::error::{GeodexError, Result};

pub const PARTS_DIR: &str = "parts";
const STAGING_PREFIX: &str = ".partial-";

/// Result of writing a segment
#[derive(Clone, Debug)]
pub struct SegmentSummary {
    pub path: PathBuf,
    pub manifest: SegmentManifest,
    /// Bytes written across all part files
    pub part_bytes: u64,
}

/// How a segment is written
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Write files on scoped worker threads
    pub threaded: bool,
    /// Directory the staging directory is created in
    pub staging_root: Option<PathBuf>,
    /// Owner tag put into staging names, so indexes can share a staging root
    pub staging_tag: Option<String>,
}

impl WriteOptions {
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn staging_tag(mut self, tag: impl Into<String>) -> Self {
        self.staging_tag = Some(tag.into());
        self
    }
}

/// A segment directory under construction.
///
/// Dropping it without `commit` removes the staging directory.
pub(crate) struct StagedSegment {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedSegment {
    pub(crate) fn create(target: &Path, options: &WriteOptions) -> Result<Self> {
        if target.exists() {
            return Err(GeodexError::InvalidRequest(format!(
                "segment target {} already exists",
                target.display()
            )));
        }
        let name = target
            .file_name()
            .ok_or_else(|| {
                GeodexError::InvalidRequest(format!("bad segment path {}", target.display()))
            })?
            .to_string_lossy()
            .into_owned();
        let root = match &options.staging_root {
            Some(root) => root.clone(),
            None => target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let staging = root.join(staging_name(options.staging_tag.as_deref(), &name));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(staging.join(PARTS_DIR))?;

        Ok(Self {
            staging,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.staging
    }

    /// Move the finished directory to its target
    pub(crate) fn commit(mut self) -> Result<PathBuf> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::rename(&self.staging, &self.target).is_err() {
            // staging root on another filesystem
            copy_dir(&self.staging, &self.target)?;
            fs::remove_dir_all(&self.staging)?;
        }
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for StagedSegment {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                warn!(path = %self.staging.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn staging_name(tag: Option<&str>, name: &str) -> String {
    match tag {
        Some(tag) => format!("{}{}-{}", STAGING_PREFIX, tag, name),
        None => format!("{}{}", STAGING_PREFIX, name),
    }
}

/// Whether a directory name marks an unfinished segment
pub fn is_staging_dir(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Remove unfinished segment directories left by a crash.
///
/// With `tag`, only directories staged under that owner tag are removed;
/// without it, every staging directory in `root` is.
pub fn remove_stale_staging(root: &Path, tag: Option<&str>) -> Result<usize> {
    let mut removed = 0;
    if !root.is_dir() {
        return Ok(0);
    }
    let owned = tag.map(|tag| staging_name(Some(tag), ""));
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = match &owned {
            Some(prefix) => name.starts_with(prefix.as_str()),
            None => is_staging_dir(&name),
        };
        if stale && entry.file_type()?.is_dir() {
            warn!(path = %entry.path().display(), "removing unfinished segment");
            fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Path of a part file inside a segment directory
pub fn part_path(dir: &Path, part: PartName) -> PathBuf {
    dir.join(PARTS_DIR).join(part.file_name())
}

/// Stream an ordered map of inverted lists into a part file
pub(crate) fn write_list_part<'a, I>(dir: &Path, part: PartName, lists: I) -> Result<PartSummary>
where
    I: IntoIterator<Item = (&'a Vec<u8>, &'a InvertedList)>,
{
    let codec = part.default_codec();
    let kind = codec
        .list_kind()
        .ok_or_else(|| GeodexError::UnsupportedPart(part.to_string()))?;
    let mut writer = PartWriter::create(&part_path(dir, part), codec)?;
    let mut payload = Vec::new();

    for (key, list) in lists {
        let mut list_writer = ListWriter::new(kind);
        for entry in list.iter() {
            list_writer.add_document(entry.document, entry.extents())?;
        }
        payload.clear();
        list_writer.finish_into(&mut payload);
        writer.add(key, &payload)?;
    }
    writer.finish()
}

/// One independent file of a flush
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlushTask {
    Names,
    Lengths,
    Part(PartName),
}

/// Writer for creating new segments from a memory segment
pub struct SegmentWriter {
    options: WriteOptions,
}

impl SegmentWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    /// Write `segment` to `target`.
    ///
    /// Returns `None` without touching the disk when the segment holds no
    /// documents or no postings.
    pub fn flush(&self, segment: &MemorySegment, target: &Path) -> Result<Option<SegmentSummary>> {
        if segment.is_empty() || segment.postings().is_empty() {
            debug!(
                documents = segment.document_count(),
                "skipping flush of empty segment"
            );
            return Ok(None);
        }

        let start = Instant::now();
        let staged = StagedSegment::create(target, &self.options)?;
        let dir = staged.path().to_path_buf();

        let mut tasks = vec![FlushTask::Names, FlushTask::Lengths];
        tasks.extend(segment.parts().into_iter().map(|(p, _)| FlushTask::Part(p)));

        let part_bytes = if self.options.threaded {
            run_threaded(&tasks, |task| write_task(segment, &dir, task))?
        } else {
            let mut total = 0;
            for &task in &tasks {
                total += write_task(segment, &dir, task)?;
            }
            total
        };

        let mut manifest =
            SegmentManifest::new(segment.statistics(), segment.document_number_offset());
        for (part, codec) in segment.parts() {
            manifest = manifest.with_part(part, codec);
        }
        manifest.write(&dir)?;
        let path = staged.commit()?;

        info!(
            path = %path.display(),
            documents = manifest.document_count,
            terms = segment.postings().len(),
            bytes = part_bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "flushed segment"
        );

        Ok(Some(SegmentSummary {
            path,
            manifest,
            part_bytes,
        }))
    }
}

/// Run independent write tasks on scoped threads; the first error wins
pub(crate) fn run_threaded<T, F>(tasks: &[T], run: F) -> Result<u64>
where
    T: Copy + Send + Sync + std::fmt::Debug,
    F: Fn(T) -> Result<u64> + Sync,
{
    let results = crossbeam::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|&task| {
                let run = &run;
                scope.spawn(move |_| run(task))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(GeodexError::Merge("writer thread panicked".into())))
            })
            .collect::<Vec<_>>()
    })
    .map_err(|_| GeodexError::Merge("writer scope panicked".to_string()))?;

    let mut total = 0;
    for result in results {
        total += result?;
    }
    Ok(total)
}

fn write_task(segment: &MemorySegment, dir: &Path, task: FlushTask) -> Result<u64> {
    let offset: DocumentNumber = segment.document_number_offset();
    match task {
        FlushTask::Names => {
            let names = segment
                .names()
                .iter()
                .enumerate()
                .map(|(i, n)| (offset + i as u64, n.as_str()));
            let data = encode_names(names, segment.names().len());
            fs::write(dir.join(NAMES_FILE), &data)?;
            Ok(0)
        }
        FlushTask::Lengths => {
            let lengths = segment
                .lengths()
                .iter()
                .enumerate()
                .map(|(i, l)| (offset + i as u64, l));
            let data = encode_lengths(lengths, segment.lengths().len());
            fs::write(dir.join(LENGTHS_FILE), &data)?;
            Ok(0)
        }
        FlushTask::Part(part @ PartName::Postings) => {
            Ok(write_list_part(dir, part, segment.postings().iter())?.bytes)
        }
        FlushTask::Part(part @ PartName::StemmedPostings) => match segment.stemmed_postings() {
            Some(buffer) => Ok(write_list_part(dir, part, buffer.iter())?.bytes),
            None => Err(GeodexError::UnsupportedPart(part.to_string())),
        },
        FlushTask::Part(part @ PartName::Extents) => {
            Ok(write_list_part(dir, part, segment.extents().iter())?.bytes)
        }
        FlushTask::Part(PartName::Corpus) => {
            let corpus = segment
                .corpus()
                .ok_or_else(|| GeodexError::UnsupportedPart(PartName::Corpus.to_string()))?;
            let mut writer = PartWriter::create(
                &part_path(dir, PartName::Corpus),
                PartName::Corpus.default_codec(),
            )?;
            for (identifier, document) in corpus {
                writer.add(identifier.as_bytes(), &encode_document(document)?)?;
            }
            Ok(writer.finish()?.bytes)
        }
    }
}
