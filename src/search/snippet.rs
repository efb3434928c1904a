//! Context windows around matches. All widths are counted in characters,
//! never bytes, so multi-byte text is never split.

use std::ops::Range;

pub const ELLIPSIS: &str = "...";

/// Byte offset of the `char_idx`-th character, or `s.len()` past the end.
pub fn char_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map(|(i, _)| i).unwrap_or(s.len())
}

/// Locate the first case-insensitive occurrence of `needle_lower` in
/// `content`, given `content_lower == content.to_lowercase()`.
///
/// The position is found in the lowercase text and mapped back by character
/// count, which is exact unless lowercasing changed the character count
/// before the match (rare, e.g. `İ`). The returned range is always on char
/// boundaries of `content`.
pub fn find_ignore_case(content: &str, content_lower: &str, needle_lower: &str) -> Option<Range<usize>> {
    let pos = content_lower.find(needle_lower)?;
    let char_start = content_lower[..pos].chars().count();
    let char_len = needle_lower.chars().count();
    let start = char_to_byte(content, char_start);
    let end = char_to_byte(content, char_start + char_len).max(start);
    Some(start..end)
}

/// `context_length / 2` characters on each side of `range`, trimmed, with an
/// ellipsis on each side that was clipped.
pub fn window(content: &str, range: Range<usize>, context_length: usize) -> String {
    let half = context_length / 2;
    let start = range.start.min(content.len());
    let end = range.end.clamp(start, content.len());

    let before_chars = content[..start].chars().count();
    let window_start = char_to_byte(content, before_chars.saturating_sub(half));
    let window_end = end + char_to_byte(&content[end..], half);

    let mut out = String::new();
    if window_start > 0 {
        out.push_str(ELLIPSIS);
    }
    out.push_str(content[window_start..window_end].trim());
    if window_end < content.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

/// The first `context_length` characters, with an ellipsis when the content is longer.
pub fn leading(content: &str, context_length: usize) -> String {
    let cut = char_to_byte(content, context_length);
    let mut out = content[..cut].trim().to_string();
    if cut < content.len() {
        out.push_str(ELLIPSIS);
    }
    out
}
