//! Hierarchical tag search.

use super::results::SearchHit;
use super::snippet;
use super::store::IndexStore;
use crate::error::Result;

/// Whether document tag `doc_tag` answers search term `term` (case-insensitive).
///
/// Matches when the tag is the term, the term is an ancestor (`project` for
/// `project/web`), the term is the leaf segment (`web` for `design/web`), or
/// the term is an interior segment (`b` for `a/b/c`).
pub fn tag_matches(doc_tag: &str, term: &str) -> bool {
    let tag = doc_tag.to_lowercase();
    let term = term.trim_start_matches('#').to_lowercase();
    if term.is_empty() {
        return false;
    }
    if tag == term || tag.starts_with(&format!("{}/", term)) {
        return true;
    }

    let segments: Vec<&str> = tag.split('/').collect();
    if segments.last().is_some_and(|leaf| *leaf == term) {
        return true;
    }
    segments.len() > 2 && segments[1..segments.len() - 1].iter().any(|s| *s == term)
}

pub fn matching_tags(doc_tags: &[String], term: &str) -> Vec<String> {
    doc_tags.iter().filter(|t| tag_matches(t, term)).cloned().collect()
}

/// Snippets around every inline `#tag` occurrence of the matched tags, or a
/// fixed note when they only appear in frontmatter.
pub fn tag_context(content: &str, matched: &[String], term: &str, context_length: usize) -> String {
    let content_lower = content.to_lowercase();
    let mut ranges = Vec::new();
    for tag in matched {
        let needle = format!("#{}", tag.to_lowercase());
        let mut from = 0;
        while let Some(pos) = content_lower[from..].find(&needle) {
            let start = from + pos;
            let end = start + needle.len();
            // Skip prefixes of a longer tag (`#web` inside `#website`)
            let boundary = content_lower[end..]
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '-'));
            if boundary {
                ranges.push(start..end);
            }
            from = end;
        }
    }

    if ranges.is_empty() {
        return format!("Note contains tag: #{}", term);
    }

    ranges.sort_by_key(|r| r.start);
    ranges.dedup_by_key(|r| r.start);
    ranges
        .into_iter()
        .filter_map(|r| {
            // Positions come from the lowercase text; map them back by character count
            let char_start = content_lower[..r.start].chars().count();
            let char_len = content_lower[r.clone()].chars().count();
            let start = snippet::char_to_byte(content, char_start);
            let end = snippet::char_to_byte(content, char_start + char_len);
            (start <= end).then(|| snippet::window(content, start..end, context_length))
        })
        .collect::<Vec<_>>()
        .join(" ... ")
}

/// All documents carrying a tag that matches `term`, ordered by path.
pub fn search_tags(store: &dyn IndexStore, term: &str, context_length: usize) -> Result<Vec<SearchHit>> {
    let mut hits = Vec::new();
    for (path, tags) in store.tagged_documents()? {
        let matched = matching_tags(&tags, term);
        if matched.is_empty() {
            continue;
        }
        let context = match store.load(&path)? {
            Some(doc) => tag_context(&doc.content, &matched, term, context_length),
            None => continue,
        };
        hits.push(SearchHit::new(path, 1.0, matched, context));
    }
    hits.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_hierarchy_rules() {
        let all = tags(&["project", "project/web", "design/web"]);
        assert_eq!(matching_tags(&all, "project"), tags(&["project", "project/web"]));
        assert_eq!(matching_tags(&all, "web"), tags(&["project/web", "design/web"]));
        assert_eq!(matching_tags(&all, "project/web"), tags(&["project/web"]));
    }

    #[test]
    fn test_interior_segment_and_case() {
        assert!(tag_matches("area/Work/meetings", "work"));
        assert!(tag_matches("Project", "#project"));
        assert!(!tag_matches("projects", "project"));
        assert!(!tag_matches("a/b", ""));
    }

    #[test]
    fn test_context_joins_occurrences() {
        let content = "Start #project here and later #project/web again";
        let ctx = tag_context(content, &tags(&["project", "project/web"]), "project", 10);
        assert!(ctx.contains(" ... "));
        assert!(ctx.contains("#project"));

        let ctx = tag_context("no inline tags", &tags(&["project"]), "project", 10);
        assert_eq!(ctx, "Note contains tag: #project");
    }
}
