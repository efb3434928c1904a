use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{
    now_epoch, sort_candidates, tags_from_metadata, Candidate, DocumentSnapshot, IndexStore, PropertyRow,
    StoreKind, StoreStats, StoredDocument, SubstringRanker, SubstringSearch,
};
use crate::error::{IndexError, Result};
use crate::frontmatter::types::{PropertyEntry, PropertyType};
use crate::search::ingest::IngestedDocument;

/// Bump when the table layout changes; older files are rebuilt from the vault.
const SCHEMA_VERSION: i32 = 1;

/// Shortest phrase the trigram tokenizer can match
const TRIGRAM_MIN: usize = 3;

pub struct SqliteStore {
    db_path: PathBuf,
    /// All writes go through this connection
    writer: Mutex<Connection>,
    /// Reads use their own connection so WAL readers never queue behind a writer
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store file. Fails when the file cannot be opened
    /// or the SQLite build lacks FTS5 with the trigram tokenizer.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }

        let writer = Connection::open(db_path)?;
        Self::init_schema(&writer)?;
        let reader = Connection::open(db_path)?;
        Self::apply_pragmas(&reader)?;

        log::info!("[VaultIndex] Opened index store at {:?}", db_path);
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        // WAL so a second process (or a restarted one) can reopen without a stale lock
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            ",
        )?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        Self::apply_pragmas(conn)?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            log::warn!(
                "[VaultIndex] Index schema v{} is incompatible (expected v{}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            conn.execute_batch(
                "
                DROP TABLE IF EXISTS file_index;
                DROP TABLE IF EXISTS file_search;
                DROP TABLE IF EXISTS file_properties;
                ",
            )?;
        }

        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS file_index (
                filepath TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                content_lower TEXT NOT NULL,
                mtime REAL NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                last_indexed REAL NOT NULL,
                metadata TEXT,
                line_offsets TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_file_index_mtime ON file_index(mtime);
            CREATE INDEX IF NOT EXISTS idx_file_index_size ON file_index(size);

            CREATE VIRTUAL TABLE IF NOT EXISTS file_search USING fts5(
                filepath UNINDEXED,
                content UNINDEXED,
                content_lower,
                tokenize = 'trigram case_sensitive 0'
            );

            CREATE TABLE IF NOT EXISTS file_properties (
                filepath TEXT NOT NULL,
                property_name TEXT NOT NULL,
                property_value TEXT,
                property_type TEXT NOT NULL,
                PRIMARY KEY (filepath, property_name)
            );
            CREATE INDEX IF NOT EXISTS idx_file_properties_name ON file_properties(property_name);

            PRAGMA user_version = {};
            ",
            SCHEMA_VERSION
        ))?;
        Ok(())
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| IndexError::StoreUnavailable("connection lock poisoned".to_string()))
    }
}

/// Quote a literal as a single FTS5 phrase.
fn fts_phrase(literal: &str) -> String {
    format!("\"{}\"", literal.replace('"', "\"\""))
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentSnapshot> {
    Ok(DocumentSnapshot {
        mtime: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        content_hash: row.get(2)?,
        last_indexed: row.get(3)?,
    })
}

fn candidate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        path: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        mtime: row.get(2)?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned + Default>(path: &str, column: &str, raw: Option<String>) -> T {
    match raw {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("[VaultIndex] Unreadable {} for {}: {}", column, path, e);
            T::default()
        }),
        None => T::default(),
    }
}

impl IndexStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Persistent
    }

    fn get(&self, path: &str) -> Result<Option<DocumentSnapshot>> {
        let conn = Self::lock(&self.reader)?;
        let snapshot = conn
            .query_row(
                "SELECT mtime, size, content_hash, last_indexed FROM file_index WHERE filepath = ?1",
                params![path],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn put(&self, doc: &IngestedDocument) -> Result<()> {
        let metadata = doc.metadata.to_string();
        let offsets = serde_json::to_string(&doc.line_offsets)
            .map_err(|e| IndexError::StoreUnavailable(format!("cannot encode line offsets: {}", e)))?;

        let mut conn = Self::lock(&self.writer)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO file_index
             (filepath, content, content_lower, mtime, size, content_hash, last_indexed, metadata, line_offsets)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doc.path,
                doc.content,
                doc.content_lower,
                doc.mtime,
                doc.size as i64,
                doc.content_hash,
                now_epoch(),
                metadata,
                offsets,
            ],
        )?;
        tx.execute("DELETE FROM file_search WHERE filepath = ?1", params![doc.path])?;
        tx.execute(
            "INSERT INTO file_search (filepath, content, content_lower) VALUES (?1, ?2, ?3)",
            params![doc.path, doc.content, doc.content_lower],
        )?;
        tx.execute("DELETE FROM file_properties WHERE filepath = ?1", params![doc.path])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO file_properties (filepath, property_name, property_value, property_type)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for prop in &doc.properties {
                stmt.execute(params![doc.path, prop.name, prop.value, prop.kind.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let mut conn = Self::lock(&self.writer)?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM file_index WHERE filepath = ?1", params![path])?;
        tx.execute("DELETE FROM file_search WHERE filepath = ?1", params![path])?;
        tx.execute("DELETE FROM file_properties WHERE filepath = ?1", params![path])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn load(&self, path: &str) -> Result<Option<StoredDocument>> {
        let conn = Self::lock(&self.reader)?;
        let row = conn
            .query_row(
                "SELECT content, mtime, size, metadata, line_offsets FROM file_index WHERE filepath = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(content, mtime, size, metadata, offsets)| StoredDocument {
            path: path.to_string(),
            content,
            mtime,
            size: size as u64,
            line_offsets: parse_json_column(path, "line_offsets", offsets),
            metadata: parse_json_column(path, "metadata", metadata),
        }))
    }

    fn all_paths(&self) -> Result<BTreeSet<String>> {
        let conn = Self::lock(&self.reader)?;
        let mut stmt = conn.prepare("SELECT filepath FROM file_index")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(paths)
    }

    fn search_substring(&self, needle_lower: &str, limit: usize) -> Result<SubstringSearch> {
        let mut ranker = SubstringRanker::new(needle_lower);
        if needle_lower.is_empty() {
            return Ok(ranker.finish(limit));
        }

        let conn = Self::lock(&self.reader)?;
        // Trigram MATCH narrows the rows; instr() confirms the exact substring
        let (sql, arg) = if needle_lower.chars().count() >= TRIGRAM_MIN {
            (
                "SELECT file_index.filepath, file_index.content, file_index.content_lower
                 FROM file_search JOIN file_index ON file_index.filepath = file_search.filepath
                 WHERE file_search MATCH ?1",
                fts_phrase(needle_lower),
            )
        } else {
            (
                "SELECT filepath, content, content_lower FROM file_index WHERE instr(content_lower, ?1) > 0",
                needle_lower.to_string(),
            )
        };

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params![arg])?;
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let content: String = row.get(1)?;
            let content_lower: String = row.get(2)?;
            ranker.offer(&path, &content, &content_lower);
        }
        Ok(ranker.finish(limit))
    }

    fn candidates(&self, prefilter: Option<&str>) -> Result<Vec<Candidate>> {
        let conn = Self::lock(&self.reader)?;
        let mut candidates = match prefilter {
            Some(literal) if literal.chars().count() >= TRIGRAM_MIN => {
                let mut stmt = conn.prepare(
                    "SELECT file_index.filepath, file_index.size, file_index.mtime
                     FROM file_search JOIN file_index ON file_index.filepath = file_search.filepath
                     WHERE file_search MATCH ?1",
                )?;
                let rows = stmt
                    .query_map(params![fts_phrase(&literal.to_lowercase())], candidate_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            _ => {
                let mut stmt = conn.prepare("SELECT filepath, size, mtime FROM file_index")?;
                let rows = stmt
                    .query_map([], candidate_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    fn property_rows(&self, name: &str) -> Result<Vec<PropertyRow>> {
        let conn = Self::lock(&self.reader)?;
        let mut stmt = conn.prepare(
            "SELECT filepath, property_value, property_type FROM file_properties
             WHERE property_name = ?1 ORDER BY filepath",
        )?;
        let rows = stmt
            .query_map(params![name], |row| {
                let path: String = row.get(0)?;
                let value: Option<String> = row.get(1)?;
                let kind: String = row.get(2)?;
                Ok(PropertyRow {
                    path,
                    entry: PropertyEntry {
                        name: name.to_string(),
                        value: value.unwrap_or_default(),
                        kind: PropertyType::from_tag(&kind),
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn tagged_documents(&self) -> Result<Vec<(String, Vec<String>)>> {
        let conn = Self::lock(&self.reader)?;
        let mut stmt = conn.prepare("SELECT filepath, metadata FROM file_index ORDER BY filepath")?;
        let mut rows = stmt.query([])?;
        let mut tagged = Vec::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let metadata: serde_json::Value = parse_json_column(&path, "metadata", row.get(1)?);
            let tags = tags_from_metadata(&metadata);
            if !tags.is_empty() {
                tagged.push((path, tags));
            }
        }
        Ok(tagged)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = Self::lock(&self.reader)?;
        let stats = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), MAX(last_indexed) FROM file_index",
            [],
            |row| {
                Ok(StoreStats {
                    total_files: row.get::<_, i64>(0)? as usize,
                    total_size: row.get::<_, i64>(1)? as u64,
                    last_indexed: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }
}
