use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::ingest;
use super::VaultIndex;
use crate::error::{IndexError, Result};

/// Quiet period before a changed file is re-ingested
const BASE_DEBOUNCE: Duration = Duration::from_millis(250);
const EXTENDED_DEBOUNCE: Duration = Duration::from_millis(500);
/// Window and threshold for treating a flood of events as a bulk change
const BURST_WINDOW: Duration = Duration::from_secs(2);
const BURST_THRESHOLD: usize = 10;

/// Keeps the index in step with external edits between refresh cycles.
/// Dropping it stops the watch and lets the worker thread exit.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    worker: Option<thread::JoinHandle<()>>,
}

impl VaultWatcher {
    /// Watch the index's vault. Must be called from inside a tokio runtime;
    /// the worker thread drives index updates on that runtime.
    pub fn start(index: VaultIndex) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| IndexError::Task(format!("watcher needs a tokio runtime: {}", e)))?;
        let vault = index.root().to_path_buf();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default().with_poll_interval(Duration::from_millis(300)))?;
        watcher.watch(vault.as_path(), RecursiveMode::Recursive)?;
        log::info!("[Watcher] Watching {:?}", vault);

        let worker = thread::spawn(move || {
            let mut pending_paths: HashMap<PathBuf, Instant> = HashMap::new();
            let mut burst_event_count: usize = 0;
            let mut burst_window_start = Instant::now();

            loop {
                match rx.recv_timeout(BASE_DEBOUNCE) {
                    Ok(Ok(event)) => {
                        let now = Instant::now();
                        if burst_window_start.elapsed() > BURST_WINDOW {
                            burst_event_count = 0;
                            burst_window_start = now;
                        }
                        burst_event_count += event.paths.len();

                        if matches!(event.kind, EventKind::Remove(_)) {
                            for path in &event.paths {
                                pending_paths.remove(path);
                                if should_process_path(path, &vault) && !path.exists() {
                                    match runtime.block_on(index.remove_path(path)) {
                                        Ok(true) => log::debug!("[Watcher] Removed {}", path.display()),
                                        Ok(false) => {}
                                        Err(e) => log::warn!("[Watcher] Failed to remove {}: {}", path.display(), e),
                                    }
                                }
                            }
                            continue;
                        }

                        for path in &event.paths {
                            if should_process_path(path, &vault) {
                                pending_paths.insert(path.clone(), now);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("[Watcher] File watcher error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if pending_paths.is_empty() {
                            continue;
                        }
                        let bursting = burst_event_count > BURST_THRESHOLD;
                        let effective_debounce = if bursting { BURST_WINDOW } else { EXTENDED_DEBOUNCE };

                        let now = Instant::now();
                        let (stable, still_pending): (Vec<_>, Vec<_>) = pending_paths
                            .drain()
                            .partition(|(_, last_event)| now.duration_since(*last_event) >= effective_debounce);
                        pending_paths = still_pending.into_iter().collect();
                        if stable.is_empty() {
                            continue;
                        }

                        // A settled burst is cheaper as one refresh cycle than as many single ingests
                        if bursting && stable.len() > BURST_THRESHOLD {
                            log::info!(
                                "[Watcher] {} files changed in a burst, scheduling a refresh",
                                stable.len()
                            );
                            let _enter = runtime.enter();
                            index.trigger_refresh();
                            burst_event_count = 0;
                            continue;
                        }

                        log::debug!("[Watcher] Processing {} stable paths", stable.len());
                        for (path, _) in stable {
                            let outcome = if path.is_file() {
                                runtime.block_on(index.ingest_path(&path))
                            } else {
                                runtime.block_on(index.remove_path(&path))
                            };
                            if let Err(e) = outcome {
                                log::warn!("[Watcher] Failed to update {}: {}", path.display(), e);
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        log::debug!("[Watcher] Event channel closed, stopping");
                        break;
                    }
                }
            }
        });

        Ok(VaultWatcher {
            _watcher: watcher,
            worker: Some(worker),
        })
    }

    /// Stop watching and wait for the worker thread to finish.
    pub fn stop(mut self) {
        let worker = self.worker.take();
        drop(self);
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::warn!("[Watcher] Worker thread panicked");
            }
        }
    }
}

/// Markdown files inside the vault, outside hidden directories, that are
/// not editor temp files.
pub fn should_process_path(path: &Path, vault_path: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name.ends_with('~') || file_name.ends_with(".tmp") || file_name.ends_with(".swp") {
        return false;
    }
    ingest::is_markdown(path) && ingest::relative_path(vault_path, path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_processes_md_files() {
        let vault = PathBuf::from("/vault");
        assert!(should_process_path(&PathBuf::from("/vault/note.md"), &vault));
        assert!(should_process_path(&PathBuf::from("/vault/a/b/Note.MARKDOWN"), &vault));
    }

    #[test]
    fn test_skips_tmp_files() {
        let vault = PathBuf::from("/vault");
        assert!(!should_process_path(&PathBuf::from("/vault/note.md.tmp"), &vault));
        assert!(!should_process_path(&PathBuf::from("/vault/note.md~"), &vault));
    }

    #[test]
    fn test_skips_hidden_directory_and_outside_paths() {
        let vault = PathBuf::from("/vault");
        assert!(!should_process_path(&PathBuf::from("/vault/.obsidian/cache.md"), &vault));
        assert!(!should_process_path(&PathBuf::from("/elsewhere/note.md"), &vault));
    }

    #[test]
    fn test_skips_non_md_files() {
        let vault = PathBuf::from("/vault");
        assert!(!should_process_path(&PathBuf::from("/vault/image.png"), &vault));
        assert!(!should_process_path(&PathBuf::from("/vault/data.json"), &vault));
    }

    #[test]
    fn test_start_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig {
            persistent: false,
            ..IndexConfig::default()
        };
        let index = VaultIndex::open(dir.path(), config).unwrap();
        assert!(VaultWatcher::start(index).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_file_is_ingested() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig {
            persistent: false,
            auto_refresh: false,
            ..IndexConfig::default()
        };
        let index = VaultIndex::open(dir.path(), config).unwrap();
        let watcher = VaultWatcher::start(index.clone()).unwrap();

        fs::write(dir.path().join("fresh.md"), "watched content").unwrap();

        let mut indexed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if index.stats().await.unwrap().total_files == 1 {
                indexed = true;
                break;
            }
        }
        watcher.stop();
        assert!(indexed, "watcher should ingest a new note");
    }
}
