//! Turns a markdown file into the row set the index stores for it.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{IndexError, Result};
use crate::frontmatter::types::{yaml_to_json, PropertyEntry};
use crate::frontmatter::FrontmatterParser;

pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// On-disk identity of a candidate file, as seen by one walk
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub abs_path: PathBuf,
    /// Vault-relative path with `/` separators
    pub rel_path: String,
    pub mtime: f64,
    pub size: u64,
}

/// Everything the store needs to write for one document
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub path: String,
    pub content: String,
    pub content_lower: String,
    pub mtime: f64,
    pub size: u64,
    pub content_hash: String,
    pub line_offsets: Vec<usize>,
    pub tags: Vec<String>,
    /// `{"frontmatter": {...}, "tags": [...]}`
    pub metadata: serde_json::Value,
    pub properties: Vec<PropertyEntry>,
}

impl IngestedDocument {
    /// Normalize already-read content. Never fails: a malformed frontmatter
    /// block is logged and the document is kept without properties.
    pub fn from_content(path: &str, content: String, mtime: f64, size: u64) -> Self {
        let note = FrontmatterParser::parse(&content);
        if let Some(err) = &note.frontmatter_error {
            log::warn!(
                "[ingest] {}",
                IndexError::Frontmatter {
                    path: path.to_string(),
                    message: err.clone(),
                }
            );
        }

        let frontmatter_json: serde_json::Map<String, serde_json::Value> = note
            .frontmatter
            .iter()
            .map(|(k, v)| (k.clone(), yaml_to_json(v)))
            .collect();
        let metadata = serde_json::json!({
            "frontmatter": frontmatter_json,
            "tags": note.tags,
        });

        IngestedDocument {
            path: path.to_string(),
            content_lower: content.to_lowercase(),
            content_hash: compute_hash(&content),
            line_offsets: line_offsets(&content),
            properties: note.properties(),
            tags: note.tags,
            metadata,
            content,
            mtime,
            size,
        }
    }
}

/// SHA-256 of the content, hex encoded. Used only for change detection.
pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Byte offset of the start of every line; `offsets[0] == 0`.
pub fn line_offsets(content: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    offsets.extend(
        content
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i + 1),
    );
    offsets
}

/// 1-based line containing byte `pos`, by binary search over line offsets.
pub fn line_number(offsets: &[usize], pos: usize) -> usize {
    offsets.partition_point(|&start| start <= pos).max(1)
}

/// 1-based line containing byte `pos`, counting newlines before it.
pub fn line_number_by_scan(content: &str, pos: usize) -> usize {
    let end = pos.min(content.len());
    content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

pub fn system_time_to_epoch(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MARKDOWN_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

/// Vault-relative path with `/` separators, or `None` if `abs` is outside
/// the vault or goes through a hidden component.
pub fn relative_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str()?;
                if part.starts_with('.') {
                    return None;
                }
                parts.push(part);
            }
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

pub fn stat_file(abs_path: &Path, rel_path: &str) -> Result<FileStat> {
    let metadata = fs::metadata(abs_path).map_err(|e| IndexError::io(abs_path, e))?;
    let mtime = metadata
        .modified()
        .map(system_time_to_epoch)
        .map_err(|e| IndexError::io(abs_path, e))?;
    Ok(FileStat {
        abs_path: abs_path.to_path_buf(),
        rel_path: rel_path.to_string(),
        mtime,
        size: metadata.len(),
    })
}

/// Read and normalize one file. Oversized and non-UTF-8 files are rejected.
pub fn read_document(stat: &FileStat, max_file_size: u64) -> Result<IngestedDocument> {
    if stat.size > max_file_size {
        return Err(IndexError::FileTooLarge {
            path: stat.abs_path.clone(),
            size: stat.size,
            limit: max_file_size,
        });
    }
    let bytes = fs::read(&stat.abs_path).map_err(|e| IndexError::io(&stat.abs_path, e))?;
    // The file may have grown between stat and read
    if bytes.len() as u64 > max_file_size {
        return Err(IndexError::FileTooLarge {
            path: stat.abs_path.clone(),
            size: bytes.len() as u64,
            limit: max_file_size,
        });
    }
    let content = String::from_utf8(bytes).map_err(|_| IndexError::Decode {
        path: stat.abs_path.clone(),
    })?;
    Ok(IngestedDocument::from_content(&stat.rel_path, content, stat.mtime, stat.size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_offsets_and_lookup() {
        let content = "a\nb\nTODO: x\n";
        let offsets = line_offsets(content);
        assert_eq!(offsets, vec![0, 2, 4, 12]);

        let pos = content.find("TODO").unwrap();
        assert_eq!(line_number(&offsets, pos), 3);
        assert_eq!(line_number_by_scan(content, pos), 3);
        assert_eq!(line_number(&offsets, 0), 1);
        assert_eq!(line_number(&offsets, 1), 1);
        assert_eq!(line_number(&offsets, 2), 2);
    }

    #[test]
    fn test_binary_search_agrees_with_scan() {
        let content = "first\n\nthird line\nfourth\n\n\nseventh";
        let offsets = line_offsets(content);
        for pos in 0..content.len() {
            assert_eq!(line_number(&offsets, pos), line_number_by_scan(content, pos), "pos {}", pos);
        }
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = compute_hash("hello");
        assert_eq!(a.len(), 64);
        assert_eq!(a, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        assert_ne!(a, compute_hash("hello!"));
    }

    #[test]
    fn test_from_content_builds_metadata_and_properties() {
        let content = "---\nstatus: Active\ntag: solo\n---\nBody #inline".to_string();
        let doc = IngestedDocument::from_content("notes/a.md", content.clone(), 1.5, content.len() as u64);

        assert_eq!(doc.content_lower, content.to_lowercase());
        assert_eq!(doc.tags, vec!["inline", "solo"]);
        assert_eq!(doc.metadata["tags"], serde_json::json!(["inline", "solo"]));
        assert_eq!(doc.metadata["frontmatter"]["status"], "Active");
        let names: Vec<&str> = doc.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["status", "tags"]);
    }

    #[test]
    fn test_relative_path_rules() {
        let root = Path::new("/vault");
        assert_eq!(relative_path(root, Path::new("/vault/a/b.md")), Some("a/b.md".to_string()));
        assert_eq!(relative_path(root, Path::new("/vault/.obsidian/x.md")), None);
        assert_eq!(relative_path(root, Path::new("/elsewhere/x.md")), None);
        assert!(is_markdown(Path::new("x.MD")));
        assert!(is_markdown(Path::new("x.markdown")));
        assert!(!is_markdown(Path::new("x.txt")));
    }

    #[test]
    fn test_read_document_rejects_oversize_and_binary() {
        let dir = TempDir::new().unwrap();
        let big = dir.path().join("big.md");
        fs::write(&big, "x".repeat(64)).unwrap();
        let stat = stat_file(&big, "big.md").unwrap();
        assert!(matches!(read_document(&stat, 32), Err(IndexError::FileTooLarge { .. })));
        assert!(read_document(&stat, 64).is_ok());

        let bin = dir.path().join("bin.md");
        fs::write(&bin, [0xff, 0xfe, 0x00]).unwrap();
        let stat = stat_file(&bin, "bin.md").unwrap();
        assert!(matches!(read_document(&stat, 1024), Err(IndexError::Decode { .. })));
    }
}
