//! Regex search over the index: literal-prefix pre-filtering, bounded
//! parallel batches, and chunked scanning for large documents.

use rayon::prelude::*;
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ingest::{line_number, line_number_by_scan};
use super::parser::QueryDialect;
use super::results::{RegexFileResult, RegexMatch, RegexSearchResponse};
use super::snippet;
use super::store::{Candidate, IndexStore, StoredDocument};
use crate::config::RegexTuning;
use crate::error::{IndexError, Result};

/// Compiled program size ceiling; keeps hostile patterns from exhausting memory
const REGEX_SIZE_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

pub fn compile(pattern: &str, flags: RegexFlags) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(IndexError::InvalidQuery("regex pattern cannot be empty".to_string()));
    }
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()?;
    Ok(regex)
}

/// Escapes that stand for the character itself. `\<` and `\>` are word
/// boundary assertions, not literals.
fn is_escapable(c: char) -> bool {
    (c.is_ascii_punctuation() && c != '<' && c != '>') || c == ' '
}

/// `|` outside any group or class makes every branch optional as a prefix.
fn has_top_level_alternation(pattern: &str) -> bool {
    let mut depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth = depth.saturating_sub(1),
            '|' if !in_class && depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Longest literal run at the start of `pattern` that every match must begin with.
///
/// Escaped metacharacters count as literals. The walk stops at the first
/// unescaped metacharacter or unsupported escape (`\d`, `\w`, ...). A
/// trailing `?`, `*` or `{` makes the preceding character optional, so it
/// is dropped. A leading `^` is skipped.
pub fn literal_prefix(pattern: &str) -> String {
    if has_top_level_alternation(pattern) {
        return String::new();
    }
    let body = pattern.strip_prefix('^').unwrap_or(pattern);
    let mut prefix = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if is_escapable(next) => {
                    prefix.push(next);
                    chars.next();
                }
                _ => break,
            },
            '?' | '*' | '{' => {
                prefix.pop();
                break;
            }
            '.' | '^' | '$' | '+' | '(' | ')' | '[' | ']' | '|' | '}' => break,
            c => prefix.push(c),
        }
    }
    prefix
}

/// The prefix to hand the full-text pre-filter, if it is long enough to help.
pub fn prefilter_literal(pattern: &str, min_prefix_len: usize) -> Option<String> {
    let prefix = literal_prefix(pattern);
    (prefix.chars().count() >= min_prefix_len.max(1)).then_some(prefix)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(s: &str, idx: usize) -> usize {
    s[idx..].chars().next().map_or(s.len(), |c| idx + c.len_utf8())
}

/// Call `on_match` for every non-overlapping match in order, the same
/// matches `Regex::captures_iter` reports over the whole content.
///
/// Content above `chunk_threshold` is scanned in windows of `chunk_size`.
/// In every window but the last, a match is only taken when it starts
/// before the trailing `chunk_overlap` bytes and ends before the window
/// edge. Anything else is re-read by the next window, which starts at that
/// match (or at the overlap when nothing was left over). A match longer
/// than a window grows the window until the match ends inside it, so long
/// matches are never split. An empty match right where the previous match
/// ended is skipped, as the iterator does.
pub fn for_each_match<F>(regex: &Regex, content: &str, tuning: &RegexTuning, mut on_match: F)
where
    F: FnMut(&Captures<'_>),
{
    if content.len() <= tuning.chunk_threshold {
        for caps in regex.captures_iter(content) {
            on_match(&caps);
        }
        return;
    }

    let overlap = tuning.chunk_overlap;
    let chunk = tuning.chunk_size.max(overlap + 1);
    let mut span = chunk;
    let mut window_start = 0usize;
    let mut last_start: Option<usize> = None;
    let mut last_end = 0usize;

    loop {
        let window_end = floor_char_boundary(content, window_start.saturating_add(span));
        let is_final = window_end >= content.len();
        let accept_before = if is_final {
            usize::MAX
        } else {
            window_end.saturating_sub(overlap)
        };
        let haystack = &content[..window_end];
        let mut resume_at: Option<usize> = None;

        let mut pos = window_start.max(last_end);
        while pos <= window_end {
            let Some(caps) = regex.captures_at(haystack, pos) else {
                break;
            };
            let Some(m) = caps.get(0) else {
                break;
            };
            if !is_final && (m.start() >= accept_before || m.end() >= window_end) {
                resume_at = Some(m.start());
                break;
            }
            let skip_empty = m.is_empty() && last_start.is_some() && m.start() == last_end;
            if !skip_empty && last_start.map_or(true, |s| m.start() > s) {
                on_match(&caps);
                last_start = Some(m.start());
                last_end = m.end();
            }
            pos = if !m.is_empty() {
                m.end()
            } else if m.end() < window_end {
                next_char_boundary(haystack, m.end())
            } else {
                break;
            };
        }

        if is_final {
            break;
        }
        let next_start = floor_char_boundary(content, resume_at.unwrap_or(accept_before).min(accept_before));
        if next_start > window_start {
            window_start = next_start;
            span = chunk;
        } else {
            // Nothing settled in this window: widen it instead of moving
            span = span.saturating_mul(2);
        }
    }
}

/// `min(matchCount / 5 + 1, 5)`
pub fn score(match_count: usize) -> f64 {
    (match_count as f64 / 5.0 + 1.0).min(5.0)
}

/// Run the regex over one stored document. `None` when nothing matches.
pub fn scan_document(
    regex: &Regex,
    doc: &StoredDocument,
    tuning: &RegexTuning,
    context_length: usize,
) -> Option<RegexFileResult> {
    let has_groups = regex.captures_len() > 1;
    let mut match_count = 0usize;
    let mut matches = Vec::new();

    for_each_match(regex, &doc.content, tuning, |caps| {
        match_count += 1;
        if matches.len() >= tuning.max_matches_per_file {
            return;
        }
        let Some(m) = caps.get(0) else {
            return;
        };
        let line = if doc.line_offsets.is_empty() {
            line_number_by_scan(&doc.content, m.start())
        } else {
            line_number(&doc.line_offsets, m.start())
        };
        let groups = has_groups.then(|| {
            (1..caps.len())
                .map(|i| caps.get(i).map(|g| g.as_str().to_string()))
                .collect()
        });
        matches.push(RegexMatch {
            text: m.as_str().to_string(),
            line,
            context: snippet::window(&doc.content, m.range(), context_length),
            groups,
        });
    });

    if match_count == 0 {
        return None;
    }
    Some(RegexFileResult {
        path: doc.path.clone(),
        match_count,
        score: score(match_count),
        matches,
    })
}

fn scan_batch(
    store: &dyn IndexStore,
    regex: &Regex,
    batch: &[Candidate],
    tuning: &RegexTuning,
    context_length: usize,
) -> Result<Vec<RegexFileResult>> {
    let found = batch
        .par_iter()
        .map(|candidate| {
            Ok(store
                .load(&candidate.path)?
                .and_then(|doc| scan_document(regex, &doc, tuning, context_length)))
        })
        .collect::<Result<Vec<Option<RegexFileResult>>>>()?;
    Ok(found.into_iter().flatten().collect())
}

/// Scan candidates in parallel batches until `max_results` files have matched.
///
/// `totalCount` counts matching files among the candidates actually scanned;
/// `truncated` is set when results were cut or candidates were left unscanned.
pub async fn search_regex(
    store: Arc<dyn IndexStore>,
    regex: Regex,
    tuning: RegexTuning,
    context_length: usize,
    max_results: usize,
) -> Result<RegexSearchResponse> {
    let prefilter = prefilter_literal(regex.as_str(), tuning.min_prefix_len);
    let candidates = {
        let store = Arc::clone(&store);
        let prefilter = prefilter.clone();
        tokio::task::spawn_blocking(move || store.candidates(prefilter.as_deref())).await??
    };
    log::debug!(
        "[regex] {} candidates for /{}/ (prefilter: {:?})",
        candidates.len(),
        regex.as_str(),
        prefilter
    );

    let width = tuning.parallel_width.max(1);
    let mut results: Vec<RegexFileResult> = Vec::new();
    let mut scanned = 0usize;

    for batch in candidates.chunks(width) {
        if results.len() >= max_results {
            break;
        }
        let batch = batch.to_vec();
        let batch_len = batch.len();
        let store = Arc::clone(&store);
        let regex = regex.clone();
        let tuning = tuning.clone();
        let found =
            tokio::task::spawn_blocking(move || scan_batch(store.as_ref(), &regex, &batch, &tuning, context_length))
                .await??;
        scanned += batch_len;
        results.extend(found);
        tokio::task::yield_now().await;
    }

    let total_count = results.len();
    let truncated = total_count > max_results || scanned < candidates.len();
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    results.truncate(max_results);

    Ok(RegexSearchResponse {
        count: results.len(),
        results,
        total_count,
        truncated,
        dialect: QueryDialect::Regex,
    })
}
