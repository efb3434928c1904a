use regex::RegexBuilder;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    now_epoch, sort_candidates, Candidate, DocumentSnapshot, IndexStore, PropertyRow, StoreKind, StoreStats,
    StoredDocument, SubstringRanker, SubstringSearch,
};
use crate::error::{IndexError, Result};
use crate::frontmatter::types::PropertyEntry;
use crate::search::ingest::IngestedDocument;

struct MemoryEntry {
    doc: StoredDocument,
    content_lower: String,
    content_hash: String,
    last_indexed: f64,
    properties: Vec<PropertyEntry>,
}

/// Non-persistent fallback. Same contract as the SQLite store, rebuilt from
/// the vault on every start.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryEntry>>> {
        self.entries
            .read()
            .map_err(|_| IndexError::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryEntry>>> {
        self.entries
            .write()
            .map_err(|_| IndexError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

impl IndexStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn get(&self, path: &str) -> Result<Option<DocumentSnapshot>> {
        Ok(self.read()?.get(path).map(|entry| DocumentSnapshot {
            mtime: entry.doc.mtime,
            size: entry.doc.size,
            content_hash: entry.content_hash.clone(),
            last_indexed: entry.last_indexed,
        }))
    }

    fn put(&self, doc: &IngestedDocument) -> Result<()> {
        let entry = MemoryEntry {
            doc: StoredDocument {
                path: doc.path.clone(),
                content: doc.content.clone(),
                mtime: doc.mtime,
                size: doc.size,
                line_offsets: doc.line_offsets.clone(),
                metadata: doc.metadata.clone(),
            },
            content_lower: doc.content_lower.clone(),
            content_hash: doc.content_hash.clone(),
            last_indexed: now_epoch(),
            properties: doc.properties.clone(),
        };
        self.write()?.insert(doc.path.clone(), entry);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.write()?.remove(path).is_some())
    }

    fn load(&self, path: &str) -> Result<Option<StoredDocument>> {
        Ok(self.read()?.get(path).map(|entry| entry.doc.clone()))
    }

    fn all_paths(&self) -> Result<BTreeSet<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn search_substring(&self, needle_lower: &str, limit: usize) -> Result<SubstringSearch> {
        let entries = self.read()?;
        let mut ranker = SubstringRanker::new(needle_lower);
        for (path, entry) in entries.iter() {
            ranker.offer(path, &entry.doc.content, &entry.content_lower);
        }
        Ok(ranker.finish(limit))
    }

    fn candidates(&self, prefilter: Option<&str>) -> Result<Vec<Candidate>> {
        // Same case folding as a case-insensitive pattern; `to_lowercase`
        // disagrees with it on letters such as final sigma
        let literal = prefilter
            .map(|lit| RegexBuilder::new(&regex::escape(lit)).case_insensitive(true).build())
            .transpose()?;
        let entries = self.read()?;
        let mut candidates: Vec<Candidate> = entries
            .values()
            .filter(|entry| match &literal {
                Some(lit) => lit.is_match(&entry.doc.content),
                None => true,
            })
            .map(|entry| Candidate {
                path: entry.doc.path.clone(),
                size: entry.doc.size,
                mtime: entry.doc.mtime,
            })
            .collect();
        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    fn property_rows(&self, name: &str) -> Result<Vec<PropertyRow>> {
        let entries = self.read()?;
        let mut rows: Vec<PropertyRow> = entries
            .values()
            .flat_map(|entry| {
                entry
                    .properties
                    .iter()
                    .filter(move |p| p.name == name)
                    .map(move |p| PropertyRow {
                        path: entry.doc.path.clone(),
                        entry: p.clone(),
                    })
            })
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(rows)
    }

    fn tagged_documents(&self) -> Result<Vec<(String, Vec<String>)>> {
        let entries = self.read()?;
        let mut tagged: Vec<(String, Vec<String>)> = entries
            .values()
            .map(|entry| (entry.doc.path.clone(), entry.doc.tags()))
            .filter(|(_, tags)| !tags.is_empty())
            .collect();
        tagged.sort();
        Ok(tagged)
    }

    fn stats(&self) -> Result<StoreStats> {
        let entries = self.read()?;
        Ok(StoreStats {
            total_files: entries.len(),
            total_size: entries.values().map(|e| e.doc.size).sum(),
            last_indexed: entries.values().map(|e| e.last_indexed).reduce(f64::max),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, content: &str) -> IngestedDocument {
        IngestedDocument::from_content(path, content.to_string(), 1.0, content.len() as u64)
    }

    #[test]
    fn test_contract_matches_persistent_store() {
        let store = MemoryStore::new();
        store.put(&doc("a.md", "---\nstatus: active\n---\nTODO: one #task")).unwrap();
        store.put(&doc("a.md", "---\nstatus: active\n---\nTODO: one #task")).unwrap();
        store.put(&doc("b.md", "todo two")).unwrap();

        assert_eq!(store.kind(), StoreKind::Memory);
        assert_eq!(store.all_paths().unwrap().len(), 2);
        assert_eq!(store.property_rows("status").unwrap().len(), 1);
        assert_eq!(store.search_substring("todo", 10).unwrap().total_count, 2);
        assert_eq!(store.candidates(Some("TODO")).unwrap().len(), 2);
        assert_eq!(store.tagged_documents().unwrap().len(), 1);

        assert!(store.delete("a.md").unwrap());
        assert!(store.property_rows("status").unwrap().is_empty());
        assert_eq!(store.stats().unwrap().total_files, 1);
    }

    #[test]
    fn test_prefilter_folds_case_like_the_regex_engine() {
        let store = MemoryStore::new();
        store.put(&doc("greek.md", "ΟΔΟΣ")).unwrap();
        store.put(&doc("other.md", "nothing here")).unwrap();

        let found = store.candidates(Some("οδοσ")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "greek.md");
        assert_eq!(store.candidates(Some("a.b")).unwrap().len(), 0);
    }
}
