//! Vault content index: one handle that owns the store, the refresh task
//! and every query entry point.

pub mod dates;
pub mod ingest;
pub mod parser;
pub mod property;
pub mod refresh;
pub mod regex_search;
pub mod results;
pub mod snippet;
pub mod store;
pub mod tags;
pub mod watcher;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::validation::{
    validate_context_length, validate_date_search_params, validate_max_results, validate_property_name,
    validate_search_query,
};
use parser::{ParsedQuery, PropertyFilter, PropertyOp, QueryDialect};
use refresh::{Freshness, RefreshReport, RefreshTaskState};
use regex_search::RegexFlags;
use dates::{DateField, DateOperator};
use results::{DateSearchResponse, RegexSearchResponse, SearchHit, SearchResponse};
use store::{IndexStore, MemoryStore, SqliteStore, StoreKind};

/// Directory inside the vault that holds the index database
pub const INDEX_DIR: &str = ".obsidian";
pub const INDEX_FILE: &str = "search-index.db";

/// Pause before the single retry after a busy timeout
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RefreshSlot {
    state: RefreshTaskState,
    handle: Option<JoinHandle<()>>,
}

/// Shared state behind every clone of a [`VaultIndex`]
pub(crate) struct IndexCore {
    pub(crate) root: PathBuf,
    pub(crate) config: IndexConfig,
    store: RwLock<Arc<dyn IndexStore>>,
    /// Serializes every store mutation
    pub(crate) write_lock: tokio::sync::Mutex<()>,
    /// Held for the whole of one refresh cycle
    cycle_lock: tokio::sync::Mutex<()>,
    degraded: AtomicBool,
    closed: AtomicBool,
    refresh: Mutex<RefreshSlot>,
    last_refresh: Mutex<Option<Instant>>,
}

impl IndexCore {
    pub(crate) fn store(&self) -> Arc<dyn IndexStore> {
        let guard = self.store.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap the durable store for an empty in-memory one. Returns false when
    /// the index is already running in memory.
    fn degrade(&self, err: &IndexError) -> bool {
        {
            let mut guard = self.store.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.kind() == StoreKind::Memory {
                return false;
            }
            *guard = Arc::new(MemoryStore::new());
        }
        *lock(&self.last_refresh) = None;
        self.log_degraded(err);
        true
    }

    fn log_degraded(&self, err: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            log::error!(
                "[VaultIndex] Persistent index unavailable for {:?} ({}). Falling back to an in-memory index; \
                 searches keep working but nothing is saved between runs.",
                self.root,
                err
            );
        }
    }

    fn set_state(&self, state: RefreshTaskState) {
        lock(&self.refresh).state = state;
    }

    fn last_refresh(&self) -> Option<Instant> {
        *lock(&self.last_refresh)
    }
}

/// Run one refresh cycle while holding the cycle lock, restarting it once on
/// a fresh in-memory store if the durable store fails mid-cycle.
async fn run_tracked(core: &IndexCore) -> Result<RefreshReport> {
    let _cycle = core.cycle_lock.lock().await;
    core.set_state(RefreshTaskState::Running);

    let result = match retry_if_busy(|| refresh::run_cycle(core)).await {
        Err(e) if e.is_store_failure() && core.degrade(&e) => refresh::run_cycle(core).await,
        other => other,
    };

    match &result {
        Ok(report) => {
            *lock(&core.last_refresh) = Some(Instant::now());
            core.set_state(RefreshTaskState::Done { report: report.clone() });
        }
        Err(e) => {
            log::error!("[refresh] Cycle failed: {}", e);
            core.set_state(RefreshTaskState::Failed { message: e.to_string() });
        }
    }
    result
}

/// Run `attempt`, and once more after a short pause if the store was busy.
async fn retry_if_busy<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match attempt().await {
        Err(e) if e.is_busy() => {
            log::warn!("[VaultIndex] Index store busy ({}), retrying once", e);
            tokio::time::sleep(BUSY_RETRY_DELAY).await;
            attempt().await
        }
        other => other,
    }
}

async fn run_blocking<T, F>(store: Arc<dyn IndexStore>, op: Arc<F>) -> Result<T>
where
    F: Fn(&dyn IndexStore) -> Result<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(store.as_ref())).await?
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_files: usize,
    pub total_size: u64,
    pub last_indexed: Option<DateTime<Utc>>,
    pub backend: StoreKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteEntry {
    pub path: String,
    pub name: String,
}

/// Handle to one vault's index. Cheap to clone; all clones share the store
/// and the background refresh task.
#[derive(Clone)]
pub struct VaultIndex {
    core: Arc<IndexCore>,
}

impl VaultIndex {
    /// Open the index for `root`. A persistent store that cannot be opened
    /// is replaced by an in-memory one; opening never fails for that reason.
    pub fn open(root: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(IndexError::InvalidVault(root));
        }

        let mut open_error = None;
        let store: Arc<dyn IndexStore> = if config.persistent {
            match SqliteStore::open(&Self::db_path(&root)) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    open_error = Some(e);
                    Arc::new(MemoryStore::new())
                }
            }
        } else {
            log::info!("[VaultIndex] Persistence disabled, indexing {:?} in memory", root);
            Arc::new(MemoryStore::new())
        };

        let index = Self::with_store(root, config, store);
        if let Some(e) = open_error {
            index.core.log_degraded(&e);
        }
        Ok(index)
    }

    /// Build a handle over an already constructed store.
    pub fn with_store(root: impl Into<PathBuf>, config: IndexConfig, store: Arc<dyn IndexStore>) -> Self {
        let root = root.into();
        log::info!("[VaultIndex] Opened {:?} with {:?} store", root, store.kind());
        Self {
            core: Arc::new(IndexCore {
                root,
                config,
                store: RwLock::new(store),
                write_lock: tokio::sync::Mutex::new(()),
                cycle_lock: tokio::sync::Mutex::new(()),
                degraded: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                refresh: Mutex::new(RefreshSlot {
                    state: RefreshTaskState::Idle,
                    handle: None,
                }),
                last_refresh: Mutex::new(None),
            }),
        }
    }

    pub fn db_path(root: &Path) -> PathBuf {
        root.join(INDEX_DIR).join(INDEX_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.core.root
    }

    pub fn config(&self) -> &IndexConfig {
        &self.core.config
    }

    pub fn backend(&self) -> StoreKind {
        self.core.store().kind()
    }

    /// Whether the index has fallen back from the durable store
    pub fn is_degraded(&self) -> bool {
        self.core.degraded.load(Ordering::Acquire)
    }

    // ── Refresh ──────────────────────────────────────────────────────────

    /// Run a refresh cycle now and wait for it.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        run_tracked(&self.core).await
    }

    /// Start a background refresh unless one is already pending or running.
    /// Returns whether a task was started.
    pub fn trigger_refresh(&self) -> bool {
        if self.core.closed.load(Ordering::Acquire) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("[refresh] No async runtime available, background refresh not started");
            return false;
        };

        let mut slot = lock(&self.core.refresh);
        let busy = slot.state == RefreshTaskState::Running
            || slot.handle.as_ref().is_some_and(|h| !h.is_finished());
        if busy {
            log::debug!("[refresh] Refresh already in progress, not starting another");
            return false;
        }

        slot.state = RefreshTaskState::Running;
        let core = Arc::clone(&self.core);
        slot.handle = Some(runtime.spawn(async move {
            // Outcome is recorded in the task state
            let _ = run_tracked(&core).await;
        }));
        true
    }

    pub fn refresh_state(&self) -> RefreshTaskState {
        lock(&self.core.refresh).state.clone()
    }

    pub fn freshness(&self) -> Freshness {
        if self.refresh_state() == RefreshTaskState::Running {
            return Freshness::Refreshing;
        }
        match self.core.last_refresh() {
            Some(at) if at.elapsed() <= self.core.config.refresh_interval() => Freshness::Fresh,
            _ => Freshness::RefreshPending,
        }
    }

    /// Whether `rel_path` with the given mtime and size differs from the
    /// stored snapshot.
    pub async fn needs_update(&self, rel_path: &str, mtime: f64, size: u64) -> Result<bool> {
        let rel_path = rel_path.to_string();
        self.read(move |s| refresh::needs_update(s, &rel_path, mtime, size)).await
    }

    /// Re-ingest one file. Returns false when the path is not an indexable
    /// note inside the vault.
    pub async fn ingest_path(&self, abs_path: &Path) -> Result<bool> {
        let Some(rel_path) = ingest::relative_path(&self.core.root, abs_path) else {
            return Ok(false);
        };
        if !ingest::is_markdown(abs_path) {
            return Ok(false);
        }
        let stat = ingest::stat_file(abs_path, &rel_path)?;
        let max_file_size = self.core.config.max_file_size;
        let doc = tokio::task::spawn_blocking(move || ingest::read_document(&stat, max_file_size)).await??;
        self.write(move |s| s.put(&doc)).await?;
        log::debug!("[VaultIndex] Ingested {}", rel_path);
        Ok(true)
    }

    /// Drop one file from the index. Returns whether a row was removed.
    pub async fn remove_path(&self, abs_path: &Path) -> Result<bool> {
        let Some(rel_path) = ingest::relative_path(&self.core.root, abs_path) else {
            return Ok(false);
        };
        self.write(move |s| s.delete(&rel_path)).await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Route `query` by prefix (`tag:`, `path:`, `property:`) or search content.
    pub async fn search(&self, query: &str, context_length: usize, max_results: usize) -> Result<SearchResponse> {
        validate_search_query(query)?;
        validate_context_length(context_length)?;
        validate_max_results(max_results)?;
        let parsed = parser::parse_query(query)?;
        self.ensure_fresh().await;

        let dialect = parsed.dialect();
        match parsed {
            ParsedQuery::Tag(term) => {
                let hits = self.read(move |s| tags::search_tags(s, &term, context_length)).await?;
                Ok(SearchResponse::from_ranked(dialect, hits, max_results))
            }
            ParsedQuery::Path(pattern) => {
                let hits = self.read(move |s| search_paths(s, &pattern, context_length)).await?;
                Ok(SearchResponse::from_ranked(dialect, hits, max_results))
            }
            ParsedQuery::Property { name, filter } => {
                let hits = self.read(move |s| property::search_properties(s, &name, &filter)).await?;
                Ok(SearchResponse::from_ranked(dialect, hits, max_results))
            }
            ParsedQuery::Content(text) => {
                let needle = text.to_lowercase();
                let found = self.read(move |s| s.search_substring(&needle, max_results)).await?;
                let hits = found
                    .hits
                    .into_iter()
                    .map(|hit| {
                        let context = snippet::window(&hit.content, hit.first_match, context_length);
                        SearchHit::new(hit.path, hit.occurrences as f64, vec![text.clone()], context)
                    })
                    .collect();
                Ok(SearchResponse::new(dialect, hits, found.total_count, found.truncated))
            }
        }
    }

    /// Structured property search: `operator` is one of `=`, `!=`, `>`, `<`,
    /// `>=`, `<=`, `contains`, `exists`.
    pub async fn search_by_property(
        &self,
        name: &str,
        operator: &str,
        value: Option<&str>,
        context_length: usize,
        max_results: usize,
    ) -> Result<SearchResponse> {
        validate_property_name(name)?;
        validate_context_length(context_length)?;
        validate_max_results(max_results)?;
        let filter = PropertyFilter::new(PropertyOp::from_name(operator)?, value)?;
        self.ensure_fresh().await;

        let name = name.trim().to_string();
        let hits = self.read(move |s| property::search_properties(s, &name, &filter)).await?;
        Ok(SearchResponse::from_ranked(QueryDialect::Property, hits, max_results))
    }

    pub async fn search_by_regex(
        &self,
        pattern: &str,
        flags: RegexFlags,
        context_length: usize,
        max_results: usize,
    ) -> Result<RegexSearchResponse> {
        validate_context_length(context_length)?;
        validate_max_results(max_results)?;
        let regex = regex_search::compile(pattern, flags)?;
        self.ensure_fresh().await;

        let tuning = self.core.config.regex.clone();
        let first = retry_if_busy(|| {
            regex_search::search_regex(self.core.store(), regex.clone(), tuning.clone(), context_length, max_results)
        })
        .await;
        match first {
            Err(e) if e.is_store_failure() && self.recover(&e).await => {
                regex_search::search_regex(self.core.store(), regex, tuning, context_length, max_results).await
            }
            other => other,
        }
    }

    /// Notes `created` or `modified` `within` the last `days_ago` days (from
    /// the start of that day) or `exactly` that many days ago, newest first.
    pub async fn search_by_date(&self, date_type: &str, days_ago: i64, operator: &str) -> Result<DateSearchResponse> {
        validate_date_search_params(date_type, days_ago, operator)?;
        let field = DateField::from_name(date_type)?;
        let operator = DateOperator::from_name(operator)?;
        self.ensure_fresh().await;

        let root = self.core.root.clone();
        let dated = self.read(move |s| dates::dated_notes(s, &root, field)).await?;
        let results = dates::filter_by_date(dated, chrono::Local::now(), days_ago, operator);
        Ok(DateSearchResponse {
            query: dates::describe(field, days_ago, operator),
            count: results.len(),
            results,
        })
    }

    /// Indexed notes under `directory` (vault root when `None`), ordered by path.
    pub async fn list_notes(&self, directory: Option<&str>, recursive: bool) -> Result<Vec<NoteEntry>> {
        self.ensure_fresh().await;
        let prefix = directory
            .map(|d| d.replace('\\', "/").trim_matches('/').to_string())
            .filter(|d| !d.is_empty());
        let paths = self.read(|s| s.all_paths()).await?;

        Ok(paths
            .into_iter()
            .filter_map(|path| {
                let rest = match &prefix {
                    Some(dir) => path.strip_prefix(dir.as_str())?.strip_prefix('/')?,
                    None => path.as_str(),
                };
                if !recursive && rest.contains('/') {
                    return None;
                }
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                Some(NoteEntry { path, name })
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let stats = self.read(|s| s.stats()).await?;
        let last_indexed = stats
            .last_indexed
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single());
        Ok(IndexStats {
            total_files: stats.total_files,
            total_size: stats.total_size,
            last_indexed,
            backend: self.backend(),
        })
    }

    /// Stop accepting background refreshes and wait for the current one.
    pub async fn close(&self) {
        self.core.closed.store(true, Ordering::Release);
        let handle = lock(&self.core.refresh).handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("[VaultIndex] Refresh task ended abnormally: {}", e);
            }
        }
        log::info!("[VaultIndex] Closed {:?}", self.core.root);
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Cold start waits for one refresh; a stale index serves the current
    /// snapshot and refreshes in the background.
    async fn ensure_fresh(&self) {
        if !self.core.config.auto_refresh || self.core.closed.load(Ordering::Acquire) {
            return;
        }
        if self.core.last_refresh().is_none() {
            match self.read(|s| s.stats()).await {
                Ok(stats) if stats.total_files == 0 => {
                    if let Err(e) = self.refresh().await {
                        log::warn!("[VaultIndex] Initial refresh failed: {}", e);
                    }
                    return;
                }
                Ok(_) => {}
                Err(e) => log::warn!("[VaultIndex] Cannot read index stats: {}", e),
            }
        }
        if self.freshness() == Freshness::RefreshPending {
            self.trigger_refresh();
        }
    }

    /// Degrade after a store failure and repopulate the in-memory store.
    /// Returns whether a retry can expect a different store.
    async fn recover(&self, err: &IndexError) -> bool {
        if !self.core.degrade(err) {
            return false;
        }
        if let Err(e) = self.refresh().await {
            log::warn!("[VaultIndex] Rebuild after fallback failed: {}", e);
        }
        true
    }

    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: Fn(&dyn IndexStore) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let first = retry_if_busy(|| run_blocking(self.core.store(), Arc::clone(&op))).await;
        match first {
            Err(e) if e.is_store_failure() && self.recover(&e).await => run_blocking(self.core.store(), op).await,
            other => other,
        }
    }

    async fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: Fn(&dyn IndexStore) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let core = &self.core;
        let first = retry_if_busy(|| {
            let op = Arc::clone(&op);
            async move {
                let _guard = core.write_lock.lock().await;
                run_blocking(core.store(), op).await
            }
        })
        .await;
        match first {
            Err(e) if e.is_store_failure() && self.core.degrade(&e) => {
                let retried = {
                    let _guard = self.core.write_lock.lock().await;
                    run_blocking(self.core.store(), op).await
                };
                self.trigger_refresh();
                retried
            }
            other => other,
        }
    }
}

/// Notes whose path contains `pattern` (case-insensitive), ordered by path.
fn search_paths(store: &dyn IndexStore, pattern: &str, context_length: usize) -> Result<Vec<SearchHit>> {
    let pattern_lower = pattern.to_lowercase();
    let mut hits = Vec::new();
    for path in store.all_paths()? {
        if !path.to_lowercase().contains(&pattern_lower) {
            continue;
        }
        let context = match store.load(&path)? {
            Some(doc) => snippet::leading(&doc.content, context_length),
            None => continue,
        };
        hits.push(SearchHit::new(path, 1.0, vec![pattern.to_string()], context));
    }
    Ok(hits)
}
