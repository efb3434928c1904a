use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parsed frontmatter keyed by property name
pub type FrontmatterMap = BTreeMap<String, serde_yaml::Value>;

/// Type tag inferred for a property at ingestion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Text,
    Number,
    Boolean,
    Date,
    List,
    Object,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::List => "list",
            PropertyType::Object => "object",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); unknown tags read back as text.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "number" => PropertyType::Number,
            "boolean" => PropertyType::Boolean,
            "date" => PropertyType::Date,
            "list" => PropertyType::List,
            "object" => PropertyType::Object,
            _ => PropertyType::Text,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened frontmatter property, value stored as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub name: String,
    pub value: String,
    pub kind: PropertyType,
}

impl PropertyEntry {
    pub fn from_yaml(name: &str, value: &serde_yaml::Value) -> Self {
        let (value, kind) = match value {
            serde_yaml::Value::Null => (String::new(), PropertyType::Text),
            serde_yaml::Value::Bool(b) => (b.to_string(), PropertyType::Boolean),
            serde_yaml::Value::Number(n) => (n.to_string(), PropertyType::Number),
            serde_yaml::Value::String(s) => {
                let kind = if parse_date_like(s).is_some() {
                    PropertyType::Date
                } else {
                    PropertyType::Text
                };
                (s.clone(), kind)
            }
            serde_yaml::Value::Sequence(_) => (yaml_to_json(value).to_string(), PropertyType::List),
            serde_yaml::Value::Mapping(_) => (yaml_to_json(value).to_string(), PropertyType::Object),
            serde_yaml::Value::Tagged(tagged) => return Self::from_yaml(name, &tagged.value),
        };
        PropertyEntry {
            name: name.to_string(),
            value,
            kind,
        }
    }

    /// Value as typed JSON: numbers stay numbers, lists stay arrays.
    pub fn typed_value(&self) -> serde_json::Value {
        typed_value(&self.value, self.kind)
    }

    /// List elements rendered as plain strings (empty for non-lists).
    pub fn list_items(&self) -> Vec<String> {
        if self.kind != PropertyType::List {
            return Vec::new();
        }
        match serde_json::from_str::<serde_json::Value>(&self.value) {
            Ok(serde_json::Value::Array(items)) => items.iter().map(json_scalar_string).collect(),
            _ => Vec::new(),
        }
    }
}

pub fn typed_value(raw: &str, kind: PropertyType) -> serde_json::Value {
    match kind {
        PropertyType::Number => {
            if let Ok(i) = raw.parse::<i64>() {
                serde_json::Value::from(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(raw.to_string()))
            } else {
                serde_json::Value::String(raw.to_string())
            }
        }
        PropertyType::Boolean => match raw {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            other => serde_json::Value::String(other.to_string()),
        },
        PropertyType::List | PropertyType::Object => {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        }
        PropertyType::Text | PropertyType::Date => serde_json::Value::String(raw.to_string()),
    }
}

fn json_scalar_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert a YAML value to JSON, stringifying non-string mapping keys.
pub fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(mapping) => {
            let mut object = serde_json::Map::new();
            for (key, val) in mapping {
                if let Some(key) = yaml_key_string(key) {
                    object.insert(key, yaml_to_json(val));
                }
            }
            serde_json::Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Mapping keys are usually strings, but YAML allows numbers and booleans too
pub fn yaml_key_string(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 date or datetime. Plain `YYYY-MM-DD` is tried first,
/// then naive datetime variants, then RFC 3339 with an offset (normalized to UTC).
pub fn parse_date_like(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    // Cheap shape check before trying formats: must start with YYYY-MM-DD
    let bytes = s.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc())
}
