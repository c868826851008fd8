//! Query evaluation across shards
//!
//! Evaluation runs in two passes. The first gathers, per shard, the
//! statistics of every scored node and fans them in with the key merger, so
//! that all shards score with the same index-wide counters. The second builds
//! the iterator tree on every shard, keeps each shard's best `count`
//! documents and merges them into the final ranking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::conjunction::{Conjunction, ExtentLoader};
use super::disjunction::Disjunction;
use super::iterator::{EmptyIterator, ExtentIterator, Scorer};
use super::node::QueryNode;
use super::scoring::{CombineIterator, ScoreIterator};
use super::source::QuerySource;
use crate::error::{GeodexError, Result};
use crate::models::{ScoredDocument, SearchResults};
use crate::segment::{
    merge_by_key, CollectionStatistics, DocumentNumber, ListStatistics, PartName, ScoringModel,
    SortedEntries,
};

pub type Shard = Arc<dyn QuerySource>;

/// Best `capacity` documents seen so far
#[derive(Debug)]
pub struct TopK {
    capacity: usize,
    heap: BinaryHeap<Ranked>,
}

/// Orders the worst-ranked document first in a max-heap
#[derive(Debug)]
struct Ranked(ScoredDocument);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(1024)),
        }
    }

    pub fn push(&mut self, candidate: ScoredDocument) {
        if self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Ranked(candidate));
            return;
        }
        let better = self
            .heap
            .peek()
            .map_or(false, |worst| candidate.rank_cmp(&worst.0) == Ordering::Less);
        if better {
            self.heap.pop();
            self.heap.push(Ranked(candidate));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Best first
    pub fn into_sorted_vec(self) -> Vec<ScoredDocument> {
        // ascending Ranked order is best first
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

/// Index-wide counters shared by every shard during one evaluation
#[derive(Clone, Debug, Default)]
pub struct QueryStatistics {
    pub collection: CollectionStatistics,
    nodes: BTreeMap<Vec<u8>, ListStatistics>,
}

impl QueryStatistics {
    pub fn node(&self, node: &QueryNode) -> ListStatistics {
        self.nodes
            .get(&node.statistics_key())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct QueryEvaluator {
    model: ScoringModel,
    threaded: bool,
}

impl QueryEvaluator {
    pub fn new(model: ScoringModel, threaded: bool) -> Self {
        Self { model, threaded }
    }

    /// Rank the best `count` documents of `shards` for `query`
    pub fn evaluate(&self, query: &QueryNode, count: usize, shards: &[Shard]) -> Result<SearchResults> {
        let start = Instant::now();
        query.validate()?;
        let root = query.clone().into_scored();

        let statistics = self.gather_statistics(&root, shards)?;
        let per_shard = self.fan_out(shards, |shard| {
            evaluate_shard(&root, count, shard.as_ref(), &statistics, self.model)
        })?;

        let mut top = TopK::new(count);
        let mut names = BTreeMap::new();
        for (results, shard_names) in per_shard {
            for result in results {
                top.push(result);
            }
            names.extend(shard_names);
        }
        let results = top.into_sorted_vec();
        names.retain(|document, _| results.iter().any(|r| r.document == *document));

        let took_ms = start.elapsed().as_millis() as u64;
        debug!(
            shards = shards.len(),
            results = results.len(),
            took_ms,
            "evaluated query"
        );
        Ok(SearchResults {
            results,
            names,
            took_ms,
        })
    }

    /// Sum the collection counters and every scored node's counters over all shards
    pub fn gather_statistics(&self, root: &QueryNode, shards: &[Shard]) -> Result<QueryStatistics> {
        let mut scored = Vec::new();
        scored_nodes(root, &mut scored);

        let mut iterators = self.fan_out(shards, |shard| {
            let mut entries = Vec::with_capacity(scored.len());
            for node in &scored {
                let statistics = node_statistics(node, shard.as_ref())?;
                entries.push((node.statistics_key(), statistics));
            }
            Ok(SortedEntries::new(entries))
        })?;

        let mut nodes = BTreeMap::new();
        merge_by_key(&mut iterators, |key, group, iterators| {
            let mut total = ListStatistics::default();
            for &i in group {
                if let Some(statistics) = iterators[i].value() {
                    total.merge(statistics);
                }
            }
            nodes.insert(key.to_vec(), total);
            Ok(())
        })?;

        let collection_statistics: Vec<_> = shards.iter().map(|s| s.statistics()).collect();
        Ok(QueryStatistics {
            collection: CollectionStatistics::aggregate(&collection_statistics),
            nodes,
        })
    }

    /// Run `task` on every shard, one scoped thread per shard when threaded
    fn fan_out<T, F>(&self, shards: &[Shard], task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&Shard) -> Result<T> + Sync,
    {
        if !self.threaded || shards.len() < 2 {
            return shards.iter().map(&task).collect();
        }

        let results = crossbeam::scope(|scope| {
            let handles: Vec<_> = shards
                .iter()
                .map(|shard| {
                    let task = &task;
                    scope.spawn(move |_| task(shard))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(GeodexError::InvalidRequest("query thread panicked".to_string()))
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| GeodexError::InvalidRequest("query scope panicked".to_string()))?;

        results.into_iter().collect()
    }
}

/// Extent children of every scoring node, in tree order
fn scored_nodes<'a>(node: &'a QueryNode, out: &mut Vec<&'a QueryNode>) {
    match node {
        QueryNode::Score { child, .. } => out.push(child),
        QueryNode::Combine { children, .. } => {
            for child in children {
                scored_nodes(child, out);
            }
        }
        _ => {}
    }
}

/// Counters of one extent node within one shard
fn node_statistics(node: &QueryNode, shard: &dyn QuerySource) -> Result<ListStatistics> {
    match node {
        QueryNode::Term { part, key } => Ok(shard
            .list_statistics(*part, key.as_bytes())?
            .unwrap_or_default()),
        QueryNode::Extent { tag } => Ok(shard
            .list_statistics(PartName::Extents, tag.as_bytes())?
            .unwrap_or_default()),
        compound => {
            let mut iterator = build_extents(compound, shard)?;
            let mut statistics = ListStatistics::default();
            while iterator.document().is_some() {
                statistics.document_frequency += 1;
                statistics.total_count += iterator.count() as u64;
                iterator.next_document()?;
            }
            Ok(statistics)
        }
    }
}

/// Build the extent iterator for `node` on one shard
pub fn build_extents(node: &QueryNode, shard: &dyn QuerySource) -> Result<ExtentIterator> {
    let children = |children: &[QueryNode]| -> Result<Vec<ExtentIterator>> {
        children.iter().map(|c| build_extents(c, shard)).collect()
    };
    let leaf = |part: PartName, key: &[u8]| -> Result<ExtentIterator> {
        Ok(shard
            .list(part, key)?
            .unwrap_or_else(|| Box::new(EmptyIterator)))
    };

    let iterator: ExtentIterator = match node {
        QueryNode::Term { part, key } => leaf(*part, key.as_bytes())?,
        QueryNode::Extent { tag } => leaf(PartName::Extents, tag.as_bytes())?,
        QueryNode::And { children: c } => {
            Box::new(Conjunction::new(children(c)?, ExtentLoader::AllExtents)?)
        }
        QueryNode::Or { children: c } => Box::new(Disjunction::new(children(c)?)),
        QueryNode::OrderedWindow { width, children: c } => Box::new(Conjunction::new(
            children(c)?,
            ExtentLoader::OrderedWindow { width: *width },
        )?),
        QueryNode::UnorderedWindow { width, children: c } => Box::new(Conjunction::new(
            children(c)?,
            ExtentLoader::UnorderedWindow { width: *width },
        )?),
        QueryNode::Score { .. } | QueryNode::Combine { .. } => {
            return Err(GeodexError::InvalidRequest(
                "scoring node where extents were expected".to_string(),
            ))
        }
    };
    Ok(iterator)
}

/// Build the scoring iterator for `node` on one shard
pub fn build_scorer(
    node: &QueryNode,
    shard: &dyn QuerySource,
    statistics: &QueryStatistics,
    model: ScoringModel,
) -> Result<Scorer> {
    match node {
        QueryNode::Score {
            child,
            model: override_model,
        } => Ok(Box::new(ScoreIterator::new(
            build_extents(child, shard)?,
            override_model.unwrap_or(model),
            statistics.node(child),
            statistics.collection,
        ))),
        QueryNode::Combine { children, weights } => {
            let children = children
                .iter()
                .map(|c| build_scorer(c, shard, statistics, model))
                .collect::<Result<Vec<_>>>()?;
            Ok(Box::new(CombineIterator::new(children, weights)))
        }
        extent => build_scorer(&QueryNode::score(extent.clone()), shard, statistics, model),
    }
}

type ShardResults = (Vec<ScoredDocument>, BTreeMap<DocumentNumber, String>);

fn evaluate_shard(
    root: &QueryNode,
    count: usize,
    shard: &dyn QuerySource,
    statistics: &QueryStatistics,
    model: ScoringModel,
) -> Result<ShardResults> {
    let mut scorer = build_scorer(root, shard, statistics, model)?;
    let mut top = TopK::new(count);
    while let Some(document) = scorer.document() {
        let length = shard.document_length(document).unwrap_or(0);
        top.push(ScoredDocument::new(document, scorer.score(document, length)));
        scorer.next_document()?;
    }

    let results = top.into_sorted_vec();
    let names = results
        .iter()
        .filter_map(|r| shard.document_name(r.document).map(|n| (r.document, n)))
        .collect();
    Ok((results, names))
}
