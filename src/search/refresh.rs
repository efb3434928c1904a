//! Staleness detection and the incremental refresh cycle.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

use super::ingest::{self, FileStat, IngestedDocument};
use super::store::IndexStore;
use super::IndexCore;
use crate::error::{IndexError, Result};

/// Observable state of the background refresh task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RefreshTaskState {
    Idle,
    Running,
    Done { report: RefreshReport },
    Failed { message: String },
}

/// How current the committed snapshot is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Freshness {
    Fresh,
    RefreshPending,
    Refreshing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    /// Markdown files seen by the walk
    pub scanned: usize,
    pub updated: usize,
    /// Files that needed an update but could not be ingested
    pub failed: usize,
    pub evicted: usize,
    /// The orphan sweep was skipped because the walk hit errors
    pub sweep_skipped: bool,
    pub duration_ms: u64,
}

/// Files found by one walk of the vault
#[derive(Debug, Default)]
pub struct VaultWalk {
    pub files: Vec<FileStat>,
    pub errors: usize,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Collect every markdown file under `root`, skipping hidden directories.
/// Errors are counted and logged per entry, never raised.
pub fn walk_vault(root: &Path) -> VaultWalk {
    let mut walk = VaultWalk::default();
    let entries = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("[refresh] {}", IndexError::Walk(e));
                walk.errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || !ingest::is_markdown(entry.path()) {
            continue;
        }
        let Some(rel_path) = ingest::relative_path(root, entry.path()) else {
            continue;
        };
        let stat = entry
            .metadata()
            .map_err(IndexError::from)
            .and_then(|md| {
                let mtime = md.modified().map_err(|e| IndexError::io(entry.path(), e))?;
                Ok((ingest::system_time_to_epoch(mtime), md.len()))
            });
        match stat {
            Ok((mtime, size)) => walk.files.push(FileStat {
                abs_path: entry.path().to_path_buf(),
                rel_path,
                mtime,
                size,
            }),
            Err(e) => {
                log::warn!("[refresh] Cannot stat {}: {}", rel_path, e);
                walk.errors += 1;
            }
        }
    }
    walk
}

/// True if there is no stored snapshot or its mtime or size differs.
pub fn needs_update(store: &dyn IndexStore, rel_path: &str, mtime: f64, size: u64) -> Result<bool> {
    Ok(match store.get(rel_path)? {
        Some(snapshot) => snapshot.is_stale(mtime, size),
        None => true,
    })
}

/// Read and parse one batch in parallel. Per-file failures are logged and counted.
fn read_batch(batch: &[FileStat], max_file_size: u64) -> (Vec<IngestedDocument>, usize) {
    let outcomes: Vec<Result<IngestedDocument>> = batch
        .par_iter()
        .map(|stat| ingest::read_document(stat, max_file_size))
        .collect();

    let mut docs = Vec::with_capacity(outcomes.len());
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                log::warn!("[ingest] Skipping file: {}", e);
                failed += 1;
            }
        }
    }
    (docs, failed)
}

/// One full cycle: walk, diff against the store, ingest stale files in
/// batches, then evict orphans. Store errors are returned to the caller,
/// which decides whether to degrade.
pub(super) async fn run_cycle(core: &IndexCore) -> Result<RefreshReport> {
    let started = Instant::now();
    let root = core.root.clone();
    let walk = tokio::task::spawn_blocking(move || walk_vault(&root)).await?;
    let walked: BTreeSet<String> = walk.files.iter().map(|f| f.rel_path.clone()).collect();

    let store = core.store();
    let scanned = walk.files.len();
    let stale: Vec<FileStat> = {
        let store = Arc::clone(&store);
        let files = walk.files;
        tokio::task::spawn_blocking(move || {
            let mut stale = Vec::new();
            for file in files {
                if needs_update(store.as_ref(), &file.rel_path, file.mtime, file.size)? {
                    stale.push(file);
                }
            }
            Ok::<_, IndexError>(stale)
        })
        .await??
    };

    log::info!(
        "[refresh] Starting: {} files walked, {} need update",
        scanned,
        stale.len()
    );

    let batch_size = core.config.batch_size.max(1);
    let max_file_size = core.config.max_file_size;
    let mut report = RefreshReport {
        scanned,
        ..RefreshReport::default()
    };

    for batch in stale.chunks(batch_size) {
        let batch = batch.to_vec();
        let (docs, failed) = tokio::task::spawn_blocking(move || read_batch(&batch, max_file_size)).await?;
        report.failed += failed;

        let guard = core.write_lock.lock().await;
        let store = Arc::clone(&store);
        report.updated += tokio::task::spawn_blocking(move || {
            for doc in &docs {
                store.put(doc)?;
            }
            Ok::<_, IndexError>(docs.len())
        })
        .await??;
        drop(guard);

        tokio::task::yield_now().await;
    }

    if walk.errors > 0 {
        log::warn!(
            "[refresh] Walk reported {} errors, skipping orphan sweep this cycle",
            walk.errors
        );
        report.sweep_skipped = true;
    } else {
        let _guard = core.write_lock.lock().await;
        let store = Arc::clone(&store);
        report.evicted = tokio::task::spawn_blocking(move || {
            let orphans: Vec<String> = store.all_paths()?.difference(&walked).cloned().collect();
            for path in &orphans {
                store.delete(path)?;
                log::info!("[refresh] Removed orphaned index entry: {}", path);
            }
            Ok::<_, IndexError>(orphans.len())
        })
        .await??;
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    log::info!(
        "[refresh] Finished in {}ms: {} updated, {} failed, {} evicted",
        report.duration_ms,
        report.updated,
        report.failed,
        report.evicted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_skips_hidden_and_non_markdown() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("notes/deep")).unwrap();
        fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        fs::write(dir.path().join("root.md"), "r").unwrap();
        fs::write(dir.path().join("notes/deep/a.markdown"), "a").unwrap();
        fs::write(dir.path().join("notes/image.png"), "png").unwrap();
        fs::write(dir.path().join(".obsidian/hidden.md"), "h").unwrap();
        fs::write(dir.path().join("notes/.draft.md"), "d").unwrap();

        let walk = walk_vault(dir.path());
        assert_eq!(walk.errors, 0);
        let mut paths: Vec<&str> = walk.files.iter().map(|f| f.rel_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["notes/deep/a.markdown", "root.md"]);
    }

    #[test]
    fn test_walk_of_missing_root_counts_an_error() {
        let dir = TempDir::new().unwrap();
        let walk = walk_vault(&dir.path().join("missing"));
        assert!(walk.files.is_empty());
        assert_eq!(walk.errors, 1);
    }

    #[test]
    fn test_needs_update_tracks_mtime_and_size() {
        let store = MemoryStore::new();
        assert!(needs_update(&store, "a.md", 10.0, 5).unwrap());

        store
            .put(&IngestedDocument::from_content("a.md", "hello".to_string(), 10.0, 5))
            .unwrap();
        assert!(!needs_update(&store, "a.md", 10.0, 5).unwrap());
        assert!(needs_update(&store, "a.md", 11.0, 5).unwrap());
        assert!(needs_update(&store, "a.md", 10.0, 6).unwrap());
    }

    #[test]
    fn test_read_batch_counts_failures() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.md"), "fine").unwrap();
        fs::write(dir.path().join("big.md"), "x".repeat(100)).unwrap();
        let batch: Vec<FileStat> = ["ok.md", "big.md"]
            .iter()
            .map(|name| ingest::stat_file(&dir.path().join(name), name).unwrap())
            .collect();

        let (docs, failed) = read_batch(&batch, 50);
        assert_eq!(docs.len(), 1);
        assert_eq!(failed, 1);
    }
}
