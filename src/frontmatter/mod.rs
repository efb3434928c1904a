pub mod types;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use types::{yaml_key_string, FrontmatterMap, PropertyEntry};

/// Inline `#tag` tokens: must start a line or follow whitespace, so headings
/// (`# Title`) and URL fragments are not picked up.
static INLINE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|\s)#([\p{L}\p{N}_\-/]+)").expect("inline tag pattern is valid"));

/// Singular legacy keys and the plural key they fold into
const LEGACY_SYNONYMS: &[(&str, &str)] = &[("tag", "tags"), ("alias", "aliases"), ("cssclass", "cssclasses")];

/// Frontmatter, body and tags of one markdown document
#[derive(Debug, Clone, Default)]
pub struct ParsedNote {
    pub frontmatter: FrontmatterMap,
    pub tags: Vec<String>,
    /// Set when a frontmatter block exists but could not be parsed
    pub frontmatter_error: Option<String>,
}

impl ParsedNote {
    pub fn properties(&self) -> Vec<PropertyEntry> {
        flatten_properties(&self.frontmatter)
    }
}

pub struct FrontmatterParser;

impl FrontmatterParser {
    /// Split markdown content into the raw frontmatter block and the body.
    pub fn split(content: &str) -> (Option<&str>, &str) {
        if let Some(rest) = content.strip_prefix("---") {
            // The opening fence must be alone on its line
            if !(rest.starts_with('\n') || rest.starts_with("\r\n")) {
                return (None, content);
            }
            if let Some(end_idx) = rest.find("\n---") {
                let frontmatter = &rest[..end_idx];
                let after_fence = &rest[end_idx + 4..];
                let body = match after_fence.find('\n') {
                    Some(nl) => &after_fence[nl + 1..],
                    None => "",
                };
                return (Some(frontmatter), body);
            }
        }
        (None, content)
    }

    /// Parse a raw YAML block into a property map with legacy keys normalized.
    pub fn parse_yaml(raw: &str) -> Result<FrontmatterMap, String> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| format!("Failed to parse YAML: {}", e))?;

        let mut map = FrontmatterMap::new();
        match value {
            serde_yaml::Value::Null => {}
            serde_yaml::Value::Mapping(mapping) => {
                for (key, val) in mapping {
                    match yaml_key_string(&key) {
                        Some(key) => {
                            map.insert(key, val);
                        }
                        None => log::debug!("[frontmatter] Skipping non-scalar key {:?}", key),
                    }
                }
            }
            other => {
                return Err(format!(
                    "frontmatter must be a mapping, found {}",
                    yaml_kind(&other)
                ))
            }
        }

        normalize_legacy_keys(&mut map);
        Ok(map)
    }

    /// Parse a whole document. A malformed frontmatter block is reported in
    /// `frontmatter_error` rather than failing, so the body stays searchable.
    pub fn parse(content: &str) -> ParsedNote {
        let (raw, body) = Self::split(content);

        let (frontmatter, frontmatter_error) = match raw {
            Some(raw) => match Self::parse_yaml(raw) {
                Ok(map) => (map, None),
                Err(e) => (FrontmatterMap::new(), Some(e)),
            },
            None => (FrontmatterMap::new(), None),
        };

        let tags = extract_tags(&frontmatter, body);
        ParsedNote {
            frontmatter,
            tags,
            frontmatter_error,
        }
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a list",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Fold singular legacy keys (`tag`, `alias`, `cssclass`) into their plural
/// form. When both exist the values are merged into one list.
pub fn normalize_legacy_keys(map: &mut FrontmatterMap) {
    for (singular, plural) in LEGACY_SYNONYMS {
        let Some(legacy) = map.remove(*singular) else {
            continue;
        };
        let merged = match map.remove(*plural) {
            None => legacy,
            Some(existing) => {
                let mut items = as_sequence(existing);
                for item in as_sequence(legacy) {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                serde_yaml::Value::Sequence(items)
            }
        };
        map.insert(plural.to_string(), merged);
    }
}

fn as_sequence(value: serde_yaml::Value) -> Vec<serde_yaml::Value> {
    match value {
        serde_yaml::Value::Sequence(seq) => seq,
        serde_yaml::Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Strip namespace prefix from tag if present
fn strip_namespace_prefix<'a>(tag: &'a str, namespace: &str) -> &'a str {
    let prefix = format!("{}/", namespace);
    let mut result = tag;
    // Handle double prefixes like "domain/domain/tag"
    while let Some(rest) = result.strip_prefix(prefix.as_str()) {
        result = rest;
    }
    result
}

fn clean_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim_end_matches('/');
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

/// Collect the document's tags from the frontmatter `tags` property and from
/// inline `#tag` tokens in the body. Result is deduplicated and sorted.
///
/// Frontmatter accepts a list, a single comma/space separated string, or a
/// namespace mapping (`{domain: [ai]}` becomes `domain/ai`).
pub fn extract_tags(frontmatter: &FrontmatterMap, body: &str) -> Vec<String> {
    let mut tags: BTreeSet<String> = BTreeSet::new();

    if let Some(value) = frontmatter.get("tags") {
        match value {
            serde_yaml::Value::Mapping(mapping) => {
                for (namespace, tag_list) in mapping {
                    let ns = yaml_key_string(namespace).unwrap_or_else(|| "domain".to_string());
                    for tag in as_sequence(tag_list.clone()) {
                        if let Some(tag_str) = tag.as_str() {
                            let clean = strip_namespace_prefix(tag_str.trim_start_matches('#'), &ns);
                            if let Some(clean) = clean_tag(clean) {
                                tags.insert(format!("{}/{}", ns, clean));
                            }
                        }
                    }
                }
            }
            serde_yaml::Value::Sequence(seq) => {
                for tag in seq {
                    let raw = match tag {
                        serde_yaml::Value::String(s) => s.clone(),
                        serde_yaml::Value::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    if let Some(tag) = clean_tag(&raw) {
                        tags.insert(tag);
                    }
                }
            }
            serde_yaml::Value::String(s) => {
                for part in s.split(|c: char| c == ',' || c.is_whitespace()) {
                    if let Some(tag) = clean_tag(part) {
                        tags.insert(tag);
                    }
                }
            }
            _ => {}
        }
    }

    for cap in INLINE_TAG_RE.captures_iter(body) {
        if let Some(tag) = clean_tag(&cap[1]) {
            // Pure numbers are issue references (#123), not tags
            if !tag.chars().all(|c| c.is_ascii_digit()) {
                tags.insert(tag);
            }
        }
    }

    tags.into_iter().collect()
}

/// One property entry per top-level frontmatter key.
pub fn flatten_properties(frontmatter: &FrontmatterMap) -> Vec<PropertyEntry> {
    frontmatter
        .iter()
        .map(|(name, value)| PropertyEntry::from_yaml(name, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::PropertyType;

    #[test]
    fn test_parse_with_frontmatter() {
        let content = r#"---
title: "Test Note"
status: active
priority: 3
tags: [project, project/web]
---

This is the body content with #inline-tag."#;

        let note = FrontmatterParser::parse(content);
        assert!(note.frontmatter_error.is_none());
        assert_eq!(note.frontmatter.get("status").and_then(|v| v.as_str()), Some("active"));
        assert_eq!(note.tags, vec!["inline-tag", "project", "project/web"]);

        let props = note.properties();
        let priority = props.iter().find(|p| p.name == "priority").unwrap();
        assert_eq!(priority.kind, PropertyType::Number);
        assert_eq!(priority.value, "3");
    }

    #[test]
    fn test_parse_without_frontmatter() {
        let content = "Just some markdown content.";
        let (raw, body) = FrontmatterParser::split(content);
        assert!(raw.is_none());
        assert_eq!(body, content);

        let note = FrontmatterParser::parse(content);
        assert!(note.frontmatter.is_empty());
        assert!(note.tags.is_empty());
    }

    #[test]
    fn test_split_requires_fence_line() {
        let (raw, _) = FrontmatterParser::split("--- not a fence\n---\n");
        assert!(raw.is_none());

        let (raw, body) = FrontmatterParser::split("---\na: 1\n---\nbody\n");
        assert_eq!(raw, Some("\na: 1"));
        assert_eq!(body, "body\n");
    }

    #[test]
    fn test_malformed_frontmatter_keeps_inline_tags() {
        let content = "---\ntitle: [unclosed\n---\nBody with #keep";
        let note = FrontmatterParser::parse(content);
        assert!(note.frontmatter_error.is_some());
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.tags, vec!["keep"]);
    }

    #[test]
    fn test_scalar_frontmatter_is_an_error() {
        assert!(FrontmatterParser::parse_yaml("just a string").is_err());
        assert!(FrontmatterParser::parse_yaml("").unwrap().is_empty());
    }

    #[test]
    fn test_legacy_synonyms_are_folded() {
        let map = FrontmatterParser::parse_yaml("tag: solo\nalias: [Old Name]\ncssclass: wide").unwrap();
        assert!(map.get("tag").is_none());
        assert_eq!(map.get("tags").and_then(|v| v.as_str()), Some("solo"));
        assert!(map.get("aliases").unwrap().is_sequence());
        assert_eq!(map.get("cssclasses").and_then(|v| v.as_str()), Some("wide"));

        let merged = FrontmatterParser::parse_yaml("tag: a\ntags: [b, a]").unwrap();
        let items: Vec<&str> = merged
            .get("tags")
            .and_then(|v| v.as_sequence())
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(items, vec!["b", "a"]);
    }

    #[test]
    fn test_faceted_tags() {
        let map = FrontmatterParser::parse_yaml("tags:\n  domain: [ai, domain/ml]\n  who: ['#kim']").unwrap();
        let tags = extract_tags(&map, "");
        assert_eq!(tags, vec!["domain/ai", "domain/ml", "who/kim"]);
    }

    #[test]
    fn test_string_tags_and_inline_filtering() {
        let map = FrontmatterParser::parse_yaml("tags: \"#alpha, beta gamma\"").unwrap();
        let body = "# Heading\nSee http://x.org/#anchor and #123 but #design/web.";
        let tags = extract_tags(&map, body);
        assert_eq!(tags, vec!["alpha", "beta", "design/web", "gamma"]);
    }
}
