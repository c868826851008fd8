//! End-to-end behaviour of the geometric index: flush cadence, merge
//! cascades, close and checkpoint recovery.

use geodex::segment::{Checkpoint, SegmentReader};
use geodex::{
    CollectionStatistics, Document, GeodexError, GeometricConfig, GeometricIndex, MergeMode,
    QueryNode,
};
use std::path::Path;
use tempfile::TempDir;

fn config(dir: &Path, block_size: u64, radix: usize) -> GeometricConfig {
    GeometricConfig::new(dir)
        .with_block_size(block_size)
        .with_radix(radix)
        .with_threads(false)
}

fn doc(number: u64, terms: &[&str]) -> Document {
    Document::new(format!("doc-{}", number), number).with_terms(terms.iter().copied())
}

fn corpus_terms(number: u64) -> Vec<&'static str> {
    const WORDS: [&str; 5] = ["apple", "banana", "cherry", "date", "elder"];
    (0..=number % 4)
        .map(|i| WORDS[((number + i) % 5) as usize])
        .collect()
}

#[test]
fn test_block_two_radix_two_five_documents() {
    let dir = TempDir::new().unwrap();
    let shards = dir.path();
    let index = GeometricIndex::open(config(shards, 2, 2)).unwrap();

    index.process(doc(0, &["a"])).unwrap();
    index.process(doc(1, &["b"])).unwrap();
    assert_eq!(
        index.generations(),
        vec![(1, vec![shards.join("shard-00000001")])]
    );

    index.process(doc(2, &["a"])).unwrap();
    index.process(doc(3, &["c"])).unwrap();
    // the second flush fills generation 1, which merges into generation 2
    assert_eq!(
        index.generations(),
        vec![(2, vec![shards.join("shard-00000003")])]
    );
    assert!(!shards.join("shard-00000001").exists());
    assert!(!shards.join("shard-00000002").exists());

    index.process(doc(4, &["a", "b"])).unwrap();
    assert_eq!(index.segment_count(), 1);
    assert_eq!(index.statistics(), CollectionStatistics::new(6, 5));

    let final_path = index.close().unwrap().unwrap();
    assert_eq!(final_path, shards.join("final"));
    assert_eq!(index.segment_count(), 1);
    assert!(!shards.join("shard-00000003").exists());
    assert!(!shards.join("shard-00000004").exists());

    let reader = SegmentReader::open(&final_path).unwrap();
    assert_eq!(reader.document_count(), 5);
    assert_eq!(reader.document_number_offset(), 0);
    assert_eq!(reader.highest_document(), Some(4));

    let checkpoint = Checkpoint::load(&shards.join("checkpoint"))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.segment_count(), 1);
    assert_eq!(checkpoint.next_document_number(), Some(5));
    assert_eq!(checkpoint.index_block_count, 3);

    let results = index.evaluate(&QueryNode::term("a"), 10).unwrap();
    let mut documents = results.documents();
    documents.sort();
    assert_eq!(documents, vec![0, 2, 4]);
}

#[test]
fn test_live_segments_stay_logarithmic() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(config(dir.path(), 1, 3)).unwrap();

    for n in 0..80 {
        index.process(doc(n, &corpus_terms(n))).unwrap();
        for (_, paths) in index.generations() {
            assert!(paths.len() < 3);
        }
    }
    // 80 blocks in base 3 is 2222, one segment short of a carry everywhere
    assert_eq!(index.segment_count(), 8);
    assert_eq!(index.statistics().document_count, 80);
}

#[test]
fn test_deferred_mode_merges_only_at_close() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(
        config(dir.path(), 2, 2).with_merge_mode(MergeMode::Deferred),
    )
    .unwrap();
    for n in 0..9 {
        index.process(doc(n, &["x"])).unwrap();
    }
    assert_eq!(index.segment_count(), 4);

    index.close().unwrap();
    assert_eq!(index.segment_count(), 1);
    assert_eq!(index.statistics(), CollectionStatistics::new(9, 9));
}

#[test]
fn test_restore_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let query = QueryNode::bag_of_words(["apple", "cherry"]);

    let (before, generations) = {
        let index = GeometricIndex::open(config(dir.path(), 2, 3)).unwrap();
        for n in 0..6 {
            index.process(doc(n, &corpus_terms(n))).unwrap();
        }
        assert_eq!(index.segment_count(), 1);
        (index.evaluate(&query, 10).unwrap(), index.generations())
        // dropped without close, as after a crash
    };

    let restored = GeometricIndex::open(config(dir.path(), 2, 3).with_resume(true)).unwrap();
    assert_eq!(restored.generations(), generations);
    assert_eq!(restored.next_document_number(), 6);
    let after = restored.evaluate(&query, 10).unwrap();
    assert_eq!(after.results, before.results);
    assert_eq!(after.names, before.names);
    drop(restored);

    // restoring twice gives the same segment set
    let again = GeometricIndex::open(config(dir.path(), 2, 3).with_resume(true)).unwrap();
    assert_eq!(again.generations(), generations);

    again.process(doc(6, &["apple"])).unwrap();
    assert!(matches!(
        again.process(doc(6, &["apple"])),
        Err(GeodexError::OutOfOrder { expected: 7, .. })
    ));
}

#[test]
fn test_restore_lost_buffer_is_refed() {
    let dir = TempDir::new().unwrap();
    {
        let index = GeometricIndex::open(config(dir.path(), 4, 2)).unwrap();
        for n in 0..6 {
            index.process(doc(n, &["a"])).unwrap();
        }
    }
    let index = GeometricIndex::open(config(dir.path(), 4, 2).with_resume(true)).unwrap();
    // documents 4 and 5 were never flushed
    assert_eq!(index.next_document_number(), 4);
    assert_eq!(index.statistics().document_count, 4);
}

#[test]
fn test_missing_segment_is_skipped_on_restore() {
    let dir = TempDir::new().unwrap();
    {
        let index = GeometricIndex::open(
            config(dir.path(), 1, 5).with_merge_mode(MergeMode::Deferred),
        )
        .unwrap();
        for n in 0..3 {
            index.process(doc(n, &["a"])).unwrap();
        }
    }
    std::fs::remove_dir_all(dir.path().join("shard-00000002")).unwrap();

    let index = GeometricIndex::open(config(dir.path(), 1, 5).with_resume(true)).unwrap();
    assert_eq!(index.segment_count(), 2);
    assert_eq!(index.next_document_number(), 3);
}

#[test]
fn test_corrupt_checkpoint_starts_fresh() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("checkpoint"), "lastDoc/number=12\n").unwrap();

    let index = GeometricIndex::open(
        config(dir.path(), 2, 2)
            .with_resume(true)
            .with_first_document_number(100),
    )
    .unwrap();
    assert_eq!(index.segment_count(), 0);
    assert_eq!(index.next_document_number(), 100);
}

#[test]
fn test_documents_retrievable_across_merges() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(config(dir.path(), 2, 2).with_corpus(true)).unwrap();
    for n in 0..7 {
        index
            .process(doc(n, &corpus_terms(n)).with_text(format!("text {}", n)))
            .unwrap();
    }
    for n in 0..7 {
        let stored = index.document(&format!("doc-{}", n)).unwrap().unwrap();
        assert_eq!(stored.number, n);
        assert_eq!(stored.text, Some(format!("text {}", n)));
    }
    index.close().unwrap();
    assert_eq!(
        index.document("doc-6").unwrap().unwrap().text.as_deref(),
        Some("text 6")
    );
}

#[test]
fn test_close_renames_single_segment_to_final() {
    let dir = TempDir::new().unwrap();
    let index = GeometricIndex::open(config(dir.path(), 3, 2)).unwrap();
    for n in 0..3 {
        index.process(doc(n, &["a"])).unwrap();
    }
    assert_eq!(
        index.generations(),
        vec![(1, vec![dir.path().join("shard-00000001")])]
    );

    let final_path = index.close().unwrap().unwrap();
    assert_eq!(final_path, dir.path().join("final"));
    assert!(!dir.path().join("shard-00000001").exists());
    assert_eq!(index.statistics(), CollectionStatistics::new(3, 3));

    let checkpoint = Checkpoint::load(&dir.path().join("checkpoint"))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.segment_count(), 1);
    drop(index);

    // an index that is already merged into `final` stays as it is
    let reopened = GeometricIndex::open(config(dir.path(), 3, 2).with_resume(true)).unwrap();
    assert_eq!(reopened.close().unwrap(), Some(dir.path().join("final")));
    assert_eq!(reopened.segment_count(), 1);
}

fn generation_sizes(index: &GeometricIndex) -> Vec<(usize, usize)> {
    index
        .generations()
        .into_iter()
        .map(|(generation, paths)| (generation, paths.len()))
        .collect()
}

#[test]
fn test_resumed_build_matches_uninterrupted_build() {
    let query = QueryNode::bag_of_words(["apple", "cherry", "elder"]);

    let whole_dir = TempDir::new().unwrap();
    let whole = GeometricIndex::open(config(whole_dir.path(), 3, 2)).unwrap();
    for n in 0..20 {
        whole.process(doc(n, &corpus_terms(n))).unwrap();
    }

    let split_dir = TempDir::new().unwrap();
    {
        let index = GeometricIndex::open(config(split_dir.path(), 3, 2)).unwrap();
        for n in 0..11 {
            index.process(doc(n, &corpus_terms(n))).unwrap();
        }
    }
    let resumed =
        GeometricIndex::open(config(split_dir.path(), 3, 2).with_resume(true)).unwrap();
    for n in resumed.next_document_number()..20 {
        resumed.process(doc(n, &corpus_terms(n))).unwrap();
    }

    assert_eq!(resumed.statistics(), whole.statistics());
    assert_eq!(resumed.statistics().document_count, 20);
    assert_eq!(generation_sizes(&resumed), generation_sizes(&whole));

    let expected = whole.evaluate(&query, 10).unwrap();
    let actual = resumed.evaluate(&query, 10).unwrap();
    assert_eq!(actual.results, expected.results);
    assert_eq!(actual.names, expected.names);
}
