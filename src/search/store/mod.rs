//! Durable and in-process backends for the content index.
//!
//! Both backends implement [`IndexStore`]; the handle picks one at open time
//! and never branches on the backend afterwards.

pub mod memory;
pub mod sqlite;

use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;

use crate::error::Result;
use crate::frontmatter::types::PropertyEntry;
use crate::search::ingest::IngestedDocument;
use crate::search::snippet;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Persistent,
    Memory,
}

/// Change-detection fields of a stored document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub mtime: f64,
    pub size: u64,
    pub content_hash: String,
    pub last_indexed: f64,
}

impl DocumentSnapshot {
    /// True when the on-disk `(mtime, size)` no longer matches this snapshot.
    pub fn is_stale(&self, mtime: f64, size: u64) -> bool {
        self.mtime != mtime || self.size != size
    }
}

/// Full stored row, as read back for scanning
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: String,
    pub content: String,
    pub mtime: f64,
    pub size: u64,
    pub line_offsets: Vec<usize>,
    pub metadata: serde_json::Value,
}

impl StoredDocument {
    pub fn tags(&self) -> Vec<String> {
        tags_from_metadata(&self.metadata)
    }
}

/// A document considered for a regex scan
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: String,
    pub size: u64,
    pub mtime: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRow {
    pub path: String,
    pub entry: PropertyEntry,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_size: u64,
    pub last_indexed: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SubstringHit {
    pub path: String,
    pub content: String,
    pub occurrences: usize,
    /// Byte range of the first occurrence in `content`
    pub first_match: Range<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SubstringSearch {
    pub hits: Vec<SubstringHit>,
    pub total_count: usize,
    pub truncated: bool,
}

pub trait IndexStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn get(&self, path: &str) -> Result<Option<DocumentSnapshot>>;

    /// Upsert one document. The row, its full-text mirror and its property
    /// rows are replaced together or not at all.
    fn put(&self, doc: &IngestedDocument) -> Result<()>;

    /// Remove a document and everything derived from it. Returns whether it existed.
    fn delete(&self, path: &str) -> Result<bool>;

    fn load(&self, path: &str) -> Result<Option<StoredDocument>>;

    fn all_paths(&self) -> Result<BTreeSet<String>>;

    /// Case-insensitive substring search over content. `needle_lower` must
    /// already be lowercased. Hits are ranked by occurrence count.
    fn search_substring(&self, needle_lower: &str, limit: usize) -> Result<SubstringSearch>;

    /// Regex scan candidates, smallest first then most recent. With a
    /// prefilter literal only documents that may contain it are returned;
    /// the result is a superset of the documents that actually do.
    fn candidates(&self, prefilter: Option<&str>) -> Result<Vec<Candidate>>;

    fn property_rows(&self, name: &str) -> Result<Vec<PropertyRow>>;

    /// `(path, tags)` for every document with at least one tag
    fn tagged_documents(&self) -> Result<Vec<(String, Vec<String>)>>;

    fn stats(&self) -> Result<StoreStats>;
}

pub fn tags_from_metadata(metadata: &serde_json::Value) -> Vec<String> {
    metadata
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|items| items.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Collects substring hits and applies the shared ranking: occurrence count
/// descending, then path ascending, cut to `limit`.
pub(crate) struct SubstringRanker<'a> {
    needle_lower: &'a str,
    hits: Vec<SubstringHit>,
}

impl<'a> SubstringRanker<'a> {
    pub(crate) fn new(needle_lower: &'a str) -> Self {
        Self {
            needle_lower,
            hits: Vec::new(),
        }
    }

    /// Record a document if it contains the needle. Returns whether it did.
    pub(crate) fn offer(&mut self, path: &str, content: &str, content_lower: &str) -> bool {
        if self.needle_lower.is_empty() {
            return false;
        }
        let occurrences = content_lower.matches(self.needle_lower).count();
        if occurrences == 0 {
            return false;
        }
        let first_match = snippet::find_ignore_case(content, content_lower, self.needle_lower)
            .unwrap_or(0..0);
        self.hits.push(SubstringHit {
            path: path.to_string(),
            content: content.to_string(),
            occurrences,
            first_match,
        });
        true
    }

    pub(crate) fn finish(mut self, limit: usize) -> SubstringSearch {
        self.hits
            .sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.path.cmp(&b.path)));
        let total_count = self.hits.len();
        let truncated = total_count > limit;
        self.hits.truncate(limit);
        SubstringSearch {
            hits: self.hits,
            total_count,
            truncated,
        }
    }
}

/// Size ascending, then mtime descending, then path for a stable order.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.size
            .cmp(&b.size)
            .then_with(|| b.mtime.total_cmp(&a.mtime))
            .then_with(|| a.path.cmp(&b.path))
    });
}

pub(crate) fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
