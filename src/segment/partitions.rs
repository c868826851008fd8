//! Generational segment sets and the radix merge policy
//!
//! Freshly flushed segments enter generation 1. Once a generation holds
//! `radix` segments they are merged into one segment of the next generation,
//! so the number of live segments stays logarithmic in the index size.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use super::reader::SegmentReader;
use crate::error::Result;

/// Something that can be opened from a segment directory
pub trait OpenShard: Sized {
    fn open_shard(path: &Path) -> Result<Self>;
}

impl OpenShard for SegmentReader {
    fn open_shard(path: &Path) -> Result<Self> {
        SegmentReader::open(path)
    }
}

/// Segments of a single generation, ordered by path
#[derive(Debug)]
pub struct Bin<S> {
    generation: usize,
    shards: BTreeMap<PathBuf, Arc<S>>,
}

impl<S> Bin<S> {
    fn new(generation: usize) -> Self {
        Self {
            generation,
            shards: BTreeMap::new(),
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.shards.keys().map(|p| p.as_path())
    }

    pub fn shards(&self) -> impl Iterator<Item = (&Path, &Arc<S>)> + '_ {
        self.shards.iter().map(|(p, s)| (p.as_path(), s))
    }
}

/// Why a merge was selected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// A generation reached the radix
    GenerationFull,
    /// Everything merged into one segment (at close)
    Forced,
}

/// A set of segments chosen to be merged together
#[derive(Debug)]
pub struct MergeCandidates<S> {
    /// Generation the merged segment belongs to
    pub generation: usize,
    /// Generations the inputs were taken from, ascending
    pub source_generations: Vec<usize>,
    pub shards: Vec<(PathBuf, Arc<S>)>,
    pub reason: MergeReason,
}

impl<S> MergeCandidates<S> {
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.shards.iter().map(|(p, _)| p.as_path())
    }

    pub fn readers(&self) -> Vec<Arc<S>> {
        self.shards.iter().map(|(_, s)| Arc::clone(s)).collect()
    }
}

#[derive(Debug)]
pub struct GeometricPartitions<S = SegmentReader> {
    radix: usize,
    bins: BTreeMap<usize, Bin<S>>,
}

impl<S> GeometricPartitions<S> {
    pub fn new(radix: usize) -> Self {
        Self {
            radix: radix.max(2),
            bins: BTreeMap::new(),
        }
    }

    pub fn radix(&self) -> usize {
        self.radix
    }

    /// Open the segment at `path` and register it under `generation`
    pub fn add(&mut self, generation: usize, path: &Path) -> Result<Arc<S>>
    where
        S: OpenShard,
    {
        let shard = Arc::new(S::open_shard(path)?);
        self.add_shard(generation, path.to_path_buf(), Arc::clone(&shard));
        Ok(shard)
    }

    /// Register an already opened segment
    pub fn add_shard(&mut self, generation: usize, path: PathBuf, shard: Arc<S>) {
        let generation = generation.max(1);
        for bin in self.bins.values_mut() {
            bin.shards.remove(&path);
        }
        self.bins
            .entry(generation)
            .or_insert_with(|| Bin::new(generation))
            .shards
            .insert(path, shard);
        self.bins.retain(|_, bin| !bin.is_empty());
    }

    /// Pick the segments to merge starting at generation `size`.
    ///
    /// Generation `size` qualifies once it holds `radix` segments. With
    /// `cascade`, each following generation is pulled in while its own
    /// segments plus the one produced from below would reach `radix`.
    pub fn find_merge_candidates(&self, size: usize, cascade: bool) -> Option<MergeCandidates<S>> {
        let bin = self.bins.get(&size)?;
        if bin.len() < self.radix {
            trace!(generation = size, segments = bin.len(), "no merge needed");
            return None;
        }

        let mut source_generations = vec![size];
        let mut shards: Vec<_> = bin
            .shards
            .iter()
            .map(|(p, s)| (p.clone(), Arc::clone(s)))
            .collect();

        let mut last = size;
        if cascade {
            while let Some(next) = self.bins.get(&(last + 1)) {
                if next.len() + 1 < self.radix {
                    break;
                }
                last += 1;
                source_generations.push(last);
                shards.extend(next.shards.iter().map(|(p, s)| (p.clone(), Arc::clone(s))));
            }
        }

        debug!(
            generations = ?source_generations,
            segments = shards.len(),
            target = last + 1,
            "selected merge candidates"
        );
        Some(MergeCandidates {
            generation: last + 1,
            source_generations,
            shards,
            reason: MergeReason::GenerationFull,
        })
    }

    /// Every live segment, for a final merge. `None` when there is none.
    ///
    /// A single live segment is still returned so the caller can rewrite it
    /// under its final name.
    pub fn find_forced_merge(&self) -> Option<MergeCandidates<S>> {
        if self.is_empty() {
            return None;
        }
        let source_generations: Vec<_> = self.bins.keys().copied().collect();
        let generation = source_generations.last().map_or(1, |g| g + 1);
        Some(MergeCandidates {
            generation,
            source_generations,
            shards: self.all_shards(),
            reason: MergeReason::Forced,
        })
    }

    /// Union of every generation, oldest generation last
    pub fn all_shards(&self) -> Vec<(PathBuf, Arc<S>)> {
        self.bins
            .values()
            .rev()
            .flat_map(|bin| bin.shards.iter().map(|(p, s)| (p.clone(), Arc::clone(s))))
            .collect()
    }

    /// Forget the consumed segments; their files are left alone
    pub fn remove_shards(&mut self, candidates: &MergeCandidates<S>) {
        for path in candidates.paths() {
            for bin in self.bins.values_mut() {
                bin.shards.remove(path);
            }
        }
        self.bins.retain(|_, bin| !bin.is_empty());
    }

    /// Generation a segment is registered under
    pub fn generation_of(&self, path: &Path) -> Option<usize> {
        self.bins
            .values()
            .find(|bin| bin.shards.contains_key(path))
            .map(|bin| bin.generation)
    }

    /// Registered paths per generation
    pub fn generations(&self) -> Vec<(usize, Vec<PathBuf>)> {
        self.bins
            .values()
            .map(|bin| (bin.generation, bin.shards.keys().cloned().collect()))
            .collect()
    }

    pub fn bins(&self) -> impl Iterator<Item = &Bin<S>> + '_ {
        self.bins.values()
    }

    /// Total number of live segments
    pub fn len(&self) -> usize {
        self.bins.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn partitions(radix: usize, layout: &[(usize, usize)]) -> GeometricPartitions<()> {
        let mut p = GeometricPartitions::new(radix);
        let mut n = 0;
        for &(generation, count) in layout {
            for _ in 0..count {
                p.add_shard(generation, PathBuf::from(format!("s{}", n)), Arc::new(()));
                n += 1;
            }
        }
        p
    }

    /// Register a new generation-1 segment and apply at most one merge pass
    fn flush_and_maintain(p: &mut GeometricPartitions<()>, name: String) {
        p.add_shard(1, PathBuf::from(name.clone()), Arc::new(()));
        if let Some(candidates) = p.find_merge_candidates(1, true) {
            p.remove_shards(&candidates);
            p.add_shard(
                candidates.generation,
                PathBuf::from(format!("{}-merged", name)),
                Arc::new(()),
            );
        }
    }

    #[test]
    fn test_below_radix_no_merge() {
        let p = partitions(3, &[(1, 2), (2, 2)]);
        assert!(p.find_merge_candidates(1, true).is_none());
        assert!(p.find_merge_candidates(5, true).is_none());
    }

    #[test]
    fn test_full_generation_merges() {
        let p = partitions(3, &[(1, 3), (2, 1)]);
        let c = p.find_merge_candidates(1, true).unwrap();
        assert_eq!(c.generation, 2);
        assert_eq!(c.source_generations, vec![1]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.reason, MergeReason::GenerationFull);
    }

    #[test]
    fn test_cascade_pulls_next_generation() {
        let p = partitions(3, &[(1, 3), (2, 2), (3, 1)]);
        let c = p.find_merge_candidates(1, true).unwrap();
        assert_eq!(c.source_generations, vec![1, 2]);
        assert_eq!(c.generation, 3);
        assert_eq!(c.len(), 5);

        let plain = p.find_merge_candidates(1, false).unwrap();
        assert_eq!(plain.generation, 2);
        assert_eq!(plain.len(), 3);
    }

    #[test]
    fn test_cascade_stops_at_gap() {
        let p = partitions(2, &[(1, 2), (3, 1)]);
        let c = p.find_merge_candidates(1, true).unwrap();
        assert_eq!(c.source_generations, vec![1]);
        assert_eq!(c.generation, 2);
    }

    #[test]
    fn test_remove_and_all_shards() {
        let mut p = partitions(2, &[(1, 2), (2, 1)]);
        assert_eq!(p.len(), 3);
        let c = p.find_merge_candidates(1, false).unwrap();
        p.remove_shards(&c);
        assert_eq!(p.len(), 1);
        assert_eq!(p.generations(), vec![(2, vec![PathBuf::from("s2")])]);
        assert_eq!(p.generation_of(Path::new("s2")), Some(2));
        assert_eq!(p.all_shards().len(), 1);
    }

    #[test]
    fn test_readding_moves_generation() {
        let mut p = partitions(3, &[(1, 1)]);
        p.add_shard(4, PathBuf::from("s0"), Arc::new(()));
        assert_eq!(p.len(), 1);
        assert_eq!(p.generation_of(Path::new("s0")), Some(4));
    }

    #[test]
    fn test_forced_merge() {
        let p = partitions(3, &[(1, 2), (3, 1)]);
        let c = p.find_forced_merge().unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.generation, 4);
        assert_eq!(c.reason, MergeReason::Forced);

        let single = partitions(3, &[(2, 1)]).find_forced_merge().unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single.generation, 3);
        assert!(partitions(3, &[]).find_forced_merge().is_none());
    }

    #[test]
    fn test_open_failure_is_error() {
        let mut p: GeometricPartitions = GeometricPartitions::new(2);
        assert!(p.add(1, Path::new("/nonexistent/shard-00000001")).is_err());
        assert!(p.is_empty());
    }

    /// Steps of a randomized ingest schedule
    #[derive(Clone, Copy, Debug)]
    enum Step {
        Flush,
        FlushAndMaintain,
        Maintain,
        Force,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Flush),
            4 => Just(Step::FlushAndMaintain),
            2 => Just(Step::Maintain),
            1 => Just(Step::Force),
        ]
    }

    /// Each shard carries the number of flushes folded into it
    fn merge_into(
        p: &mut GeometricPartitions<usize>,
        candidates: MergeCandidates<usize>,
        name: String,
    ) {
        let weight = candidates.shards.iter().map(|(_, w)| **w).sum();
        p.remove_shards(&candidates);
        p.add_shard(candidates.generation, PathBuf::from(name), Arc::new(weight));
    }

    fn weight(p: &GeometricPartitions<usize>) -> usize {
        p.all_shards().iter().map(|(_, w)| **w).sum()
    }

    proptest! {
        #[test]
        fn prop_generations_stay_below_radix(radix in 2usize..6, flushes in 1usize..200) {
            let mut p = GeometricPartitions::new(radix);
            for i in 0..flushes {
                flush_and_maintain(&mut p, format!("f{}", i));
                for bin in p.bins() {
                    prop_assert!(bin.len() < radix);
                }
            }
            // every flush is either live or folded into exactly one merged segment
            prop_assert!(p.len() <= flushes);
            prop_assert!(!p.is_empty());
        }

        #[test]
        fn prop_interleaved_schedule_drains_on_next_pass(
            radix in 2usize..6,
            steps in prop::collection::vec(step(), 1..150),
        ) {
            let mut p: GeometricPartitions<usize> = GeometricPartitions::new(radix);
            let mut flushes = 0;
            for (i, step) in steps.into_iter().enumerate() {
                if matches!(step, Step::Flush | Step::FlushAndMaintain) {
                    p.add_shard(1, PathBuf::from(format!("f{}", i)), Arc::new(1));
                    flushes += 1;
                }
                match step {
                    Step::Flush => {}
                    Step::FlushAndMaintain | Step::Maintain => {
                        if let Some(candidates) = p.find_merge_candidates(1, true) {
                            prop_assert!(candidates.len() >= radix);
                            merge_into(&mut p, candidates, format!("m{}", i));
                        }
                        for bin in p.bins() {
                            prop_assert!(
                                bin.len() < radix,
                                "generation {} holds {}",
                                bin.generation(),
                                bin.len()
                            );
                        }
                    }
                    Step::Force => {
                        if let Some(candidates) = p.find_forced_merge() {
                            merge_into(&mut p, candidates, format!("m{}", i));
                        }
                        prop_assert!(p.len() <= 1);
                    }
                }
                // only generation 1 may overflow while maintenance is deferred
                for bin in p.bins().filter(|b| b.generation() > 1) {
                    prop_assert!(bin.len() < radix);
                }
                prop_assert_eq!(weight(&p), flushes);
            }
        }
    }
}
