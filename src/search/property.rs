//! Typed property filtering and ordering.

use chrono::NaiveDateTime;
use std::cmp::Ordering;

use super::parser::{PropertyFilter, PropertyOp};
use super::results::SearchHit;
use super::store::{IndexStore, PropertyRow};
use crate::error::Result;
use crate::frontmatter::types::{parse_date_like, PropertyEntry, PropertyType};

/// Compare a stored scalar with a query value: numerically for number
/// properties, chronologically when both sides parse as dates, otherwise
/// lexicographically.
pub fn compare_scalar(entry: &PropertyEntry, query: &str) -> Ordering {
    if entry.kind == PropertyType::Number {
        if let (Ok(stored), Ok(wanted)) = (entry.value.trim().parse::<f64>(), query.parse::<f64>()) {
            return stored.total_cmp(&wanted);
        }
    }
    if let (Some(stored), Some(wanted)) = (parse_date_like(&entry.value), parse_date_like(query)) {
        return stored.cmp(&wanted);
    }
    entry.value.as_str().cmp(query)
}

fn scalar_equals(entry: &PropertyEntry, query: &str) -> bool {
    match entry.kind {
        PropertyType::Number => match (entry.value.trim().parse::<f64>(), query.parse::<f64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => entry.value.eq_ignore_ascii_case(query),
        },
        PropertyType::Date => match (parse_date_like(&entry.value), parse_date_like(query)) {
            (Some(a), Some(b)) => a == b,
            _ => entry.value.to_lowercase() == query.to_lowercase(),
        },
        _ => entry.value.to_lowercase() == query.to_lowercase(),
    }
}

fn ordering_passes(op: PropertyOp, ordering: Ordering) -> bool {
    match op {
        PropertyOp::Gt => ordering == Ordering::Greater,
        PropertyOp::Lt => ordering == Ordering::Less,
        PropertyOp::Ge => ordering != Ordering::Less,
        PropertyOp::Le => ordering != Ordering::Greater,
        _ => false,
    }
}

/// Whether one stored property satisfies the filter.
///
/// Lists compare by length under comparison operators, by any element under
/// `contains`, and by membership under `=` / `!=`. Empty values never satisfy
/// a comparison.
pub fn evaluate(entry: &PropertyEntry, filter: &PropertyFilter) -> bool {
    if filter.op == PropertyOp::Exists {
        return true;
    }
    let Some(query) = filter.value.as_deref() else {
        return false;
    };
    let query_lower = query.to_lowercase();

    if entry.kind == PropertyType::List {
        let items = entry.list_items();
        return match filter.op {
            PropertyOp::Contains => items.iter().any(|i| i.to_lowercase().contains(&query_lower)),
            PropertyOp::Eq => items.iter().any(|i| i.to_lowercase() == query_lower),
            PropertyOp::Ne => !items.iter().any(|i| i.to_lowercase() == query_lower),
            op => match query.parse::<f64>() {
                Ok(wanted) => ordering_passes(op, (items.len() as f64).total_cmp(&wanted)),
                Err(_) => false,
            },
        };
    }

    match filter.op {
        PropertyOp::Contains => entry.value.to_lowercase().contains(&query_lower),
        PropertyOp::Eq => scalar_equals(entry, query),
        PropertyOp::Ne => !scalar_equals(entry, query),
        op => !entry.value.is_empty() && ordering_passes(op, compare_scalar(entry, query)),
    }
}

enum SortMode {
    Numeric,
    Chronological,
    ByPath,
}

fn sort_mode(rows: &[PropertyRow]) -> SortMode {
    if !rows.is_empty()
        && rows
            .iter()
            .all(|r| r.entry.kind == PropertyType::Number && r.entry.value.trim().parse::<f64>().is_ok())
    {
        SortMode::Numeric
    } else if !rows.is_empty() && rows.iter().all(|r| parse_date_like(&r.entry.value).is_some()) {
        SortMode::Chronological
    } else {
        SortMode::ByPath
    }
}

/// Order matched rows: numbers and dates by value descending (path breaks
/// ties), anything else by path.
pub fn sort_rows(rows: &mut [PropertyRow]) {
    match sort_mode(rows) {
        SortMode::Numeric => rows.sort_by(|a, b| {
            let a_val = a.entry.value.trim().parse::<f64>().unwrap_or(f64::MIN);
            let b_val = b.entry.value.trim().parse::<f64>().unwrap_or(f64::MIN);
            b_val.total_cmp(&a_val).then_with(|| a.path.cmp(&b.path))
        }),
        SortMode::Chronological => rows.sort_by(|a, b| {
            let a_val = parse_date_like(&a.entry.value).unwrap_or(NaiveDateTime::MIN);
            let b_val = parse_date_like(&b.entry.value).unwrap_or(NaiveDateTime::MIN);
            b_val.cmp(&a_val).then_with(|| a.path.cmp(&b.path))
        }),
        SortMode::ByPath => rows.sort_by(|a, b| a.path.cmp(&b.path)),
    }
}

/// Documents whose property `name` satisfies `filter`, fully ranked.
pub fn search_properties(store: &dyn IndexStore, name: &str, filter: &PropertyFilter) -> Result<Vec<SearchHit>> {
    let mut rows: Vec<PropertyRow> = store
        .property_rows(name)?
        .into_iter()
        .filter(|row| evaluate(&row.entry, filter))
        .collect();
    sort_rows(&mut rows);

    Ok(rows
        .into_iter()
        .map(|row| {
            let context = format!("{}: {}", row.entry.name, row.entry.value);
            let mut hit = SearchHit::new(row.path, 1.0, vec![row.entry.name.clone()], context);
            hit.property_value = Some(row.entry.typed_value());
            hit
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, kind: PropertyType) -> PropertyEntry {
        PropertyEntry {
            name: "p".to_string(),
            value: value.to_string(),
            kind,
        }
    }

    fn filter(expr: &str) -> PropertyFilter {
        PropertyFilter::parse(expr)
    }

    #[test]
    fn test_numeric_comparisons() {
        let five = entry("5", PropertyType::Number);
        let three = entry("3", PropertyType::Number);
        let ten = entry("10", PropertyType::Number);
        assert!(evaluate(&five, &filter(">3")));
        assert!(!evaluate(&three, &filter(">3")));
        assert!(evaluate(&three, &filter("<=3")));
        // Numeric, not lexicographic
        assert!(evaluate(&ten, &filter(">9")));
        assert!(evaluate(&entry("3.0", PropertyType::Number), &filter("3")));
    }

    #[test]
    fn test_date_and_text_comparisons() {
        let due = entry("2024-06-01", PropertyType::Date);
        assert!(evaluate(&due, &filter(">2024-05-31")));
        assert!(evaluate(&due, &filter("<2024-06-01T12:00")));
        assert!(evaluate(&entry("beta", PropertyType::Text), &filter(">alpha")));
        assert!(!evaluate(&entry("", PropertyType::Text), &filter("<zzz")));
    }

    #[test]
    fn test_text_equality_is_case_insensitive() {
        let status = entry("Active", PropertyType::Text);
        assert!(evaluate(&status, &filter("active")));
        assert!(!evaluate(&status, &filter("!=ACTIVE")));
        assert!(evaluate(&status, &filter("*CTI*")));
        assert!(evaluate(&status, &filter("*")));
    }

    #[test]
    fn test_list_semantics() {
        let list = entry(r#"["python","Rust","go"]"#, PropertyType::List);
        assert!(evaluate(&list, &filter(">2")));
        assert!(!evaluate(&list, &filter(">3")));
        assert!(evaluate(&list, &filter("rust")));
        assert!(evaluate(&list, &filter("!=java")));
        assert!(evaluate(&list, &filter("*ytho*")));
        assert!(!evaluate(&list, &filter(">abc")));
    }

    #[test]
    fn test_sorting() {
        let row = |path: &str, value: &str, kind| PropertyRow {
            path: path.to_string(),
            entry: entry(value, kind),
        };
        let mut rows = vec![
            row("a.md", "1", PropertyType::Number),
            row("b.md", "5", PropertyType::Number),
            row("c.md", "3", PropertyType::Number),
        ];
        sort_rows(&mut rows);
        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "c.md", "a.md"]);

        let mut rows = vec![row("z.md", "active", PropertyType::Text), row("a.md", "done", PropertyType::Text)];
        sort_rows(&mut rows);
        assert_eq!(rows[0].path, "a.md");
    }
}
