//! Queries evaluated across the memory segment and every on-disk segment.

use geodex::query::evaluator::build_extents;
use geodex::query::{collect_counts, Disjunction, ExtentIterator, QuerySource};
use geodex::segment::{
    MemorySegment, MemorySegmentOptions, SegmentReader, SegmentWriter, WriteOptions,
};
use geodex::{
    Document, GeometricConfig, GeometricIndex, MergeMode, PartName, QueryNode, ScoringModel,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn deferred(dir: &Path, block_size: u64) -> GeometricConfig {
    GeometricConfig::new(dir)
        .with_block_size(block_size)
        .with_merge_mode(MergeMode::Deferred)
        .with_threads(false)
}

fn doc(number: u64, text: &str) -> Document {
    Document::new(format!("doc-{}", number), number).with_terms(text.split_whitespace())
}

const TEXTS: [&str; 8] = [
    "the quick brown fox",
    "a lazy dog sleeps",
    "quick thinking saves the day",
    "the brown dog and the quick fox",
    "foxes are quick",
    "nothing to see here",
    "brown bread and brown butter",
    "the fox is quick and brown",
];

fn build(dir: &Path, block_size: u64) -> GeometricIndex {
    let index = GeometricIndex::open(deferred(dir, block_size)).unwrap();
    for (n, text) in TEXTS.iter().enumerate() {
        index.process(doc(n as u64, text)).unwrap();
    }
    index
}

#[test]
fn test_disjunction_across_shards() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(deferred(dir.path(), 2)).unwrap();
    let texts = ["zero", "red", "blue", "red", "zero", "red"];
    for (n, text) in texts.iter().enumerate() {
        index.process(doc(n as u64, text)).unwrap();
    }
    index.flush().unwrap();
    assert_eq!(index.segment_count(), 3);

    // each shard walks its own lists, in document order
    let view = index.view();
    let mut readers: Vec<_> = view.readers().to_vec();
    readers.sort_by_key(|r| r.document_number_offset());
    let mut matched = Vec::new();
    for reader in &readers {
        let shard: &dyn QuerySource = reader.as_ref();
        let children: Vec<ExtentIterator> = ["red", "blue"]
            .iter()
            .filter_map(|key| shard.list(PartName::Postings, key.as_bytes()).unwrap())
            .collect();
        let mut disjunction = Disjunction::new(children);
        matched.extend(collect_counts(&mut disjunction).unwrap());
    }
    assert_eq!(matched, vec![(1, 1), (2, 1), (3, 1), (5, 1)]);

    let query = QueryNode::Or {
        children: vec![QueryNode::term("red"), QueryNode::term("blue")],
    };
    let mut documents = index.evaluate(&query, 10).unwrap().documents();
    documents.sort();
    assert_eq!(documents, vec![1, 2, 3, 5]);
}

fn shard(dir: &Path, name: &str, first: u64, texts: &[&str]) -> Arc<SegmentReader> {
    let mut segment = MemorySegment::new(first, &MemorySegmentOptions::default());
    for (i, text) in texts.iter().enumerate() {
        segment.process(doc(first + i as u64, text)).unwrap();
    }
    let target = dir.join(name);
    SegmentWriter::new(WriteOptions::default())
        .flush(&segment, &target)
        .unwrap()
        .unwrap();
    Arc::new(SegmentReader::open(&target).unwrap())
}

#[test]
fn test_disjunction_interleaves_shard_lists() {
    let dir = TempDir::new().unwrap();
    let first = shard(
        dir.path(),
        "shard-00000001",
        1,
        &["sample", "other", "sample text sample", "other", "sample"],
    );
    let second = shard(dir.path(), "shard-00000002", 2, &["sample"]);

    let children: Vec<ExtentIterator> = [&first, &second]
        .into_iter()
        .map(|reader| {
            let source: &dyn QuerySource = reader.as_ref();
            source
                .list(PartName::Postings, b"sample")
                .unwrap()
                .unwrap()
        })
        .collect();
    let mut disjunction = Disjunction::new(children);
    assert_eq!(
        collect_counts(&mut disjunction).unwrap(),
        vec![(1, 1), (2, 1), (3, 2), (5, 1)]
    );
}

#[test]
fn test_split_index_scores_like_single_segment() {
    let query = QueryNode::bag_of_words(["quick", "brown", "fox"]);

    let single_dir = TempDir::new().unwrap();
    let single = build(single_dir.path(), 100);
    single.flush().unwrap();
    assert_eq!(single.segment_count(), 1);

    let split_dir = TempDir::new().unwrap();
    let split = build(split_dir.path(), 3);
    // two segments plus documents still in memory
    assert_eq!(split.segment_count(), 2);

    let expected = single.evaluate(&query, 5).unwrap();
    let actual = split.evaluate(&query, 5).unwrap();
    assert_eq!(actual.documents(), expected.documents());
    for (a, e) in actual.results.iter().zip(&expected.results) {
        assert!((a.score - e.score).abs() < 1e-9);
    }
    assert_eq!(actual.names, expected.names);
}

#[test]
fn test_phrase_and_windows() {
    let dir = TempDir::new().unwrap();
    let index = build(dir.path(), 3);

    let mut phrase = index
        .evaluate(&QueryNode::phrase(["quick", "brown"]), 10)
        .unwrap()
        .documents();
    phrase.sort();
    assert_eq!(phrase, vec![0]);

    let unordered = QueryNode::UnorderedWindow {
        width: 3,
        children: vec![QueryNode::term("brown"), QueryNode::term("quick")],
    };
    let mut documents = index.evaluate(&unordered, 10).unwrap().documents();
    documents.sort();
    assert_eq!(documents, vec![0, 7]);

    let and = QueryNode::And {
        children: vec![QueryNode::term("dog"), QueryNode::term("the")],
    };
    assert_eq!(index.evaluate(&and, 10).unwrap().documents(), vec![3]);
}

#[test]
fn test_extent_restricted_terms() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(deferred(dir.path(), 2)).unwrap();
    index
        .process(doc(0, "rust memory safety").with_tag("title", 0, 2))
        .unwrap();
    index.process(doc(1, "memory of rust")).unwrap();
    index
        .process(doc(2, "safety first").with_tag("title", 0, 1))
        .unwrap();

    let titled = QueryNode::And {
        children: vec![QueryNode::term("rust"), QueryNode::extent("title")],
    };
    assert_eq!(index.evaluate(&titled, 10).unwrap().documents(), vec![0]);

    let view = index.view();
    let reader: &SegmentReader = view.readers()[0].as_ref();
    let mut titles = build_extents(&QueryNode::extent("title"), reader).unwrap();
    assert_eq!(collect_counts(titles.as_mut()).unwrap(), vec![(0, 1)]);
}

#[test]
fn test_stemmed_terms_need_stemming_everywhere() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(deferred(dir.path(), 2).with_stemming(true)).unwrap();
    for (n, text) in ["runs fast", "running late", "ran home"].iter().enumerate() {
        index.process(doc(n as u64, text)).unwrap();
    }
    let query = QueryNode::Term {
        part: PartName::StemmedPostings,
        key: "run".to_string(),
    };
    let mut documents = index.evaluate(&query, 10).unwrap().documents();
    documents.sort();
    assert_eq!(documents, vec![0, 1]);
}

#[test]
fn test_results_ranked_and_truncated() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(
        deferred(dir.path(), 2).with_scoring(ScoringModel::bm25()),
    )
    .unwrap();
    index.process(doc(0, "fish fish fish")).unwrap();
    index.process(doc(1, "fish and chips")).unwrap();
    index.process(doc(2, "fish fish tales")).unwrap();
    index.process(doc(3, "no match here")).unwrap();

    let results = index.evaluate(&QueryNode::term("fish"), 2).unwrap();
    assert_eq!(results.documents(), vec![0, 2]);
    assert!(results.results[0].score >= results.results[1].score);
    assert_eq!(results.name(2), Some("doc-2"));
    assert_eq!(results.name(1), None);
}

#[test]
fn test_invalid_query_rejected() {
    let dir = TempDir::new().unwrap();
    let index = build(dir.path(), 3);
    let query = QueryNode::OrderedWindow {
        width: 0,
        children: vec![QueryNode::term("quick")],
    };
    assert!(index.evaluate(&query, 10).is_err());
}
