//! Date lookups: notes created or modified within, or exactly, N days ago.

use chrono::{DateTime, Local, TimeZone};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use super::ingest::system_time_to_epoch;
use super::results::DateHit;
use super::store::IndexStore;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Created,
    Modified,
}

impl DateField {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "created" => Ok(DateField::Created),
            "modified" => Ok(DateField::Modified),
            other => Err(IndexError::InvalidParameter {
                name: "date_type",
                message: format!("'{}' is not one of: created, modified", other),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateField::Created => "created",
            DateField::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOperator {
    /// From the start of the day N days ago until now
    Within,
    /// During the calendar day N days ago
    Exactly,
}

impl DateOperator {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "within" => Ok(DateOperator::Within),
            "exactly" => Ok(DateOperator::Exactly),
            other => Err(IndexError::InvalidParameter {
                name: "operator",
                message: format!("'{}' is not one of: within, exactly", other),
            }),
        }
    }
}

pub fn describe(field: DateField, days_ago: i64, operator: DateOperator) -> String {
    match operator {
        DateOperator::Within => format!("Notes {} within last {} days", field.as_str(), days_ago),
        DateOperator::Exactly => format!("Notes {} exactly {} days ago", field.as_str(), days_ago),
    }
}

fn local_from_epoch(secs: f64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt((secs * 1000.0) as i64).single()
}

fn start_of_day(at: DateTime<Local>) -> DateTime<Local> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .unwrap_or(at)
}

/// `[start, end)` bounds for the operator, in local time. `end` is open for `Within`.
pub fn day_window(
    now: DateTime<Local>,
    days_ago: i64,
    operator: DateOperator,
) -> (DateTime<Local>, Option<DateTime<Local>>) {
    let start = start_of_day(now - chrono::Duration::days(days_ago));
    match operator {
        DateOperator::Within => (start, None),
        DateOperator::Exactly => (start, Some(start_of_day(start + chrono::Duration::hours(36)))),
    }
}

/// Keep the `(path, epoch seconds)` pairs inside the window, newest first.
pub fn filter_by_date(
    dated: Vec<(String, f64)>,
    now: DateTime<Local>,
    days_ago: i64,
    operator: DateOperator,
) -> Vec<DateHit> {
    let (start, end) = day_window(now, days_ago, operator);
    let mut hits: Vec<(DateTime<Local>, DateHit)> = dated
        .into_iter()
        .filter_map(|(path, secs)| {
            let date = local_from_epoch(secs)?;
            if date < start || end.is_some_and(|end| date >= end) {
                return None;
            }
            let hit = DateHit {
                path,
                date: date.to_rfc3339(),
                days_ago: (now - date).num_days(),
            };
            Some((date, hit))
        })
        .collect();
    hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.path.cmp(&b.1.path)));
    hits.into_iter().map(|(_, hit)| hit).collect()
}

/// Creation time from the file system, or the stored mtime where the
/// platform does not record one. `None` when the file is gone.
fn created_at(root: &Path, rel_path: &str, stored_mtime: f64) -> Option<f64> {
    match fs::metadata(root.join(rel_path)) {
        Ok(md) => Some(md.created().map(system_time_to_epoch).unwrap_or(stored_mtime)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            log::debug!("[dates] Cannot stat {}: {}", rel_path, e);
            Some(stored_mtime)
        }
    }
}

/// Every indexed note with the requested timestamp. Modification times come
/// from the index; creation times need a stat per note.
pub fn dated_notes(store: &dyn IndexStore, root: &Path, field: DateField) -> Result<Vec<(String, f64)>> {
    let candidates = store.candidates(None)?;
    Ok(candidates
        .into_iter()
        .filter_map(|c| match field {
            DateField::Modified => Some((c.path, c.mtime)),
            DateField::Created => created_at(root, &c.path, c.mtime).map(|secs| (c.path, secs)),
        })
        .collect())
}
