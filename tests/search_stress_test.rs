use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;
use tempfile::TempDir;

use vault_search::{IndexConfig, RegexFlags, VaultIndex};

const SIMULATION_COUNT: usize = 2000;
const CONCURRENT_TASKS: usize = 4;

/// Create a test markdown file with frontmatter
fn create_test_note(dir: &Path, index: usize) -> PathBuf {
    let note_path = dir.join(format!("folder_{}/note_{:05}.md", index % 10, index));
    fs::create_dir_all(note_path.parent().unwrap()).expect("Failed to create folder");
    let content = format!(
        r#"---
title: Test Note {}
type: NOTE
priority: {}
tags:
  - test
  - simulation/batch{}
created: 2024-01-{:02}
---

# Test Note {}

This is test content for note number {}.

## Section 1

Lorem ipsum dolor sit amet, consectetur adipiscing elit.
테스트 한글 내용입니다. 검색 인덱스 테스트.

## Section 2

TODO: follow up on item {}
"#,
        index,
        index % 5,
        index % 3,
        (index % 28) + 1,
        index,
        index,
        index
    );
    fs::write(&note_path, content).expect("Failed to write test note");
    note_path
}

fn config() -> IndexConfig {
    IndexConfig {
        auto_refresh: false,
        ..IndexConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_refresh_and_query_mix() {
    println!("\n=== Full Refresh Test ({} notes) ===\n", SIMULATION_COUNT);

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    for i in 0..SIMULATION_COUNT {
        create_test_note(temp_dir.path(), i);
    }

    let index = VaultIndex::open(temp_dir.path(), config()).expect("Failed to open index");
    let start = Instant::now();
    let report = index.refresh().await.expect("Refresh failed");
    let elapsed = start.elapsed();
    println!("Indexed {} notes in {:?}", report.updated, elapsed);
    assert_eq!(report.scanned, SIMULATION_COUNT);
    assert_eq!(report.updated, SIMULATION_COUNT);
    assert_eq!(report.failed, 0);

    let start = Instant::now();
    let results = index.search("test", 50, 100).await.expect("Search failed");
    println!("Search for 'test' matched {} notes in {:?}", results.total_count, start.elapsed());
    assert_eq!(results.total_count, SIMULATION_COUNT);
    assert!(results.truncated);

    let start = Instant::now();
    let results = index.search("한글", 50, 100).await.expect("Search failed");
    println!("Search for '한글' matched {} notes in {:?}", results.total_count, start.elapsed());
    assert_eq!(results.total_count, SIMULATION_COUNT);

    let results = index.search("tag:simulation", 50, 1000).await.expect("Tag search failed");
    assert_eq!(results.total_count, SIMULATION_COUNT);
    let results = index.search("tag:batch1", 50, 1000).await.expect("Tag search failed");
    assert_eq!(results.total_count, (0..SIMULATION_COUNT).filter(|i| i % 3 == 1).count());

    let results = index.search("property:priority:>=4", 50, 1000).await.expect("Property search failed");
    assert_eq!(results.total_count, SIMULATION_COUNT / 5);

    let start = Instant::now();
    let results = index
        .search_by_regex(r"TODO: follow up on item \d+", RegexFlags::default(), 50, 20)
        .await
        .expect("Regex search failed");
    println!("Regex search returned {} files in {:?}", results.count, start.elapsed());
    assert_eq!(results.count, 20);
    assert!(results.truncated);
    assert!(results.results.iter().all(|r| r.matches[0].line > 1));

    // Nothing changed on disk: a second cycle is a pure stat pass
    let report = index.refresh().await.expect("Refresh failed");
    assert_eq!(report.updated, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_searches_during_refresh() {
    println!("\n=== Concurrent Search Test ({} tasks) ===\n", CONCURRENT_TASKS);

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    for i in 0..500 {
        create_test_note(temp_dir.path(), i);
    }
    let index = VaultIndex::open(temp_dir.path(), config()).expect("Failed to open index");
    index.refresh().await.expect("Initial refresh failed");

    // Touch a slice of the vault so the next cycle has work to do
    for i in 0..100 {
        let path = temp_dir.path().join(format!("folder_{}/note_{:05}.md", i % 10, i));
        fs::write(&path, format!("rewritten test note {}\n", i)).expect("Failed to rewrite");
    }
    assert!(index.trigger_refresh());

    let success = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..CONCURRENT_TASKS)
        .map(|task_id| {
            let index = index.clone();
            let success = Arc::clone(&success);
            tokio::spawn(async move {
                for round in 0..10 {
                    let query = if (task_id + round) % 2 == 0 { "test" } else { "path:folder_3" };
                    let results = index.search(query, 50, 100).await.expect("Search failed");
                    assert!(results.count > 0);
                    success.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("Search task panicked");
    }
    index.close().await;

    assert_eq!(success.load(Ordering::SeqCst), CONCURRENT_TASKS * 10);
    let rewritten = index.search("rewritten", 50, 1000).await.expect("Search failed");
    assert_eq!(rewritten.total_count, 100);
}

#[tokio::test]
async fn test_reopen_after_abandoned_instance() {
    println!("\n=== Reopen Simulation Test ===\n");

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    for i in 0..100 {
        create_test_note(temp_dir.path(), i);
    }

    for iteration in 0..5 {
        // Each instance is dropped without close(), like a killed process
        let index = VaultIndex::open(temp_dir.path(), config()).expect("Failed to open index");
        let report = index.refresh().await.expect("Refresh failed");
        if iteration == 0 {
            assert_eq!(report.updated, 100);
        } else {
            assert_eq!(report.updated, 0, "iteration {} re-ingested unchanged notes", iteration);
        }
        assert_eq!(index.backend(), vault_search::StoreKind::Persistent);
    }
}
