//! Query dialect detection and the property filter grammar.

use serde::Serialize;
use std::fmt;

use crate::error::{IndexError, Result};
use crate::validation::validate_property_name;

/// Which strategy answered a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDialect {
    Tag,
    Path,
    Property,
    Content,
    Regex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    /// Tag term, lowercased, leading `#` removed
    Tag(String),
    Path(String),
    Property { name: String, filter: PropertyFilter },
    Content(String),
}

impl ParsedQuery {
    pub fn dialect(&self) -> QueryDialect {
        match self {
            ParsedQuery::Tag(_) => QueryDialect::Tag,
            ParsedQuery::Path(_) => QueryDialect::Path,
            ParsedQuery::Property { .. } => QueryDialect::Property,
            ParsedQuery::Content(_) => QueryDialect::Content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    Exists,
}

impl PropertyOp {
    /// Operator names accepted by the structured property search call.
    pub fn from_name(op: &str) -> Result<Self> {
        match op.trim() {
            "=" | "==" => Ok(PropertyOp::Eq),
            "!=" => Ok(PropertyOp::Ne),
            ">" => Ok(PropertyOp::Gt),
            "<" => Ok(PropertyOp::Lt),
            ">=" => Ok(PropertyOp::Ge),
            "<=" => Ok(PropertyOp::Le),
            "contains" => Ok(PropertyOp::Contains),
            "exists" => Ok(PropertyOp::Exists),
            other => Err(IndexError::InvalidQuery(format!(
                "unknown property operator '{}' (expected one of =, !=, >, <, >=, <=, contains, exists)",
                other
            ))),
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, PropertyOp::Gt | PropertyOp::Lt | PropertyOp::Ge | PropertyOp::Le)
    }
}

impl fmt::Display for PropertyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyOp::Eq => "=",
            PropertyOp::Ne => "!=",
            PropertyOp::Gt => ">",
            PropertyOp::Lt => "<",
            PropertyOp::Ge => ">=",
            PropertyOp::Le => "<=",
            PropertyOp::Contains => "contains",
            PropertyOp::Exists => "exists",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub op: PropertyOp,
    /// Absent only for `Exists`
    pub value: Option<String>,
}

impl PropertyFilter {
    pub fn new(op: PropertyOp, value: Option<&str>) -> Result<Self> {
        let value = value.map(|v| v.trim().to_string());
        if op != PropertyOp::Exists && value.is_none() {
            return Err(IndexError::InvalidQuery(format!("operator '{}' requires a value", op)));
        }
        Ok(Self {
            op,
            value: if op == PropertyOp::Exists { None } else { value },
        })
    }

    /// Parse the `<expr>` part of `property:<name>:<expr>`.
    ///
    /// `*` is existence, `*v*` is containment, a leading comparison operator
    /// (two-character forms checked first) compares, anything else is equality.
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        if expr.is_empty() || expr == "*" {
            return Self {
                op: PropertyOp::Exists,
                value: None,
            };
        }
        if expr.len() > 2 && expr.starts_with('*') && expr.ends_with('*') {
            return Self {
                op: PropertyOp::Contains,
                value: Some(expr[1..expr.len() - 1].to_string()),
            };
        }

        const OPERATORS: &[(&str, PropertyOp)] = &[
            (">=", PropertyOp::Ge),
            ("<=", PropertyOp::Le),
            ("!=", PropertyOp::Ne),
            (">", PropertyOp::Gt),
            ("<", PropertyOp::Lt),
            ("=", PropertyOp::Eq),
        ];
        for (prefix, op) in OPERATORS {
            if let Some(rest) = expr.strip_prefix(prefix) {
                return Self {
                    op: *op,
                    value: Some(rest.trim().to_string()),
                };
            }
        }

        Self {
            op: PropertyOp::Eq,
            value: Some(expr.to_string()),
        }
    }
}

/// Route a query string to its dialect. Prefixes are checked in a fixed
/// order: `tag:`, `path:`, `property:`, then plain content.
pub fn parse_query(query: &str) -> Result<ParsedQuery> {
    if let Some(rest) = query.strip_prefix("tag:") {
        let tag = rest.trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() {
            return Err(IndexError::InvalidQuery("tag search needs a tag after 'tag:'".to_string()));
        }
        return Ok(ParsedQuery::Tag(tag));
    }

    if let Some(rest) = query.strip_prefix("path:") {
        let pattern = rest.trim();
        if pattern.is_empty() {
            return Err(IndexError::InvalidQuery("path search needs a pattern after 'path:'".to_string()));
        }
        return Ok(ParsedQuery::Path(pattern.to_string()));
    }

    if let Some(rest) = query.strip_prefix("property:") {
        let Some((name, expr)) = rest.split_once(':') else {
            return Err(IndexError::InvalidQuery(format!(
                "property search must look like property:<name>:<value>, got '{}'",
                query
            )));
        };
        let name = name.trim();
        validate_property_name(name)?;
        return Ok(ParsedQuery::Property {
            name: name.to_string(),
            filter: PropertyFilter::parse(expr),
        });
    }

    Ok(ParsedQuery::Content(query.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_order() {
        assert_eq!(parse_query("tag:#Project").unwrap(), ParsedQuery::Tag("project".to_string()));
        assert_eq!(parse_query("path:Daily/").unwrap(), ParsedQuery::Path("Daily/".to_string()));
        assert_eq!(
            parse_query("machine learning").unwrap(),
            ParsedQuery::Content("machine learning".to_string())
        );
        // A tag query whose term looks like a path is still a tag query
        assert_eq!(parse_query("tag:path:x").unwrap().dialect(), QueryDialect::Tag);
        assert!(parse_query("tag:#").is_err());
    }

    #[test]
    fn test_property_filter_grammar() {
        let cases = [
            ("*", PropertyOp::Exists, None),
            ("*act*", PropertyOp::Contains, Some("act")),
            (">=5", PropertyOp::Ge, Some("5")),
            ("<=3", PropertyOp::Le, Some("3")),
            ("!=done", PropertyOp::Ne, Some("done")),
            (">3", PropertyOp::Gt, Some("3")),
            ("<2024-01-01", PropertyOp::Lt, Some("2024-01-01")),
            ("=active", PropertyOp::Eq, Some("active")),
            ("active", PropertyOp::Eq, Some("active")),
        ];
        for (expr, op, value) in cases {
            let filter = PropertyFilter::parse(expr);
            assert_eq!(filter.op, op, "expr {}", expr);
            assert_eq!(filter.value.as_deref(), value, "expr {}", expr);
        }
    }

    #[test]
    fn test_property_query_parsing() {
        match parse_query("property:priority:>3").unwrap() {
            ParsedQuery::Property { name, filter } => {
                assert_eq!(name, "priority");
                assert_eq!(filter.op, PropertyOp::Gt);
                assert_eq!(filter.value.as_deref(), Some("3"));
            }
            other => panic!("unexpected {:?}", other),
        }
        // Value may itself contain colons
        match parse_query("property:due:2024-01-01T10:00").unwrap() {
            ParsedQuery::Property { filter, .. } => assert_eq!(filter.value.as_deref(), Some("2024-01-01T10:00")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_query("property:status").is_err());
        assert!(parse_query("property::x").is_err());
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(PropertyOp::from_name("contains").unwrap(), PropertyOp::Contains);
        assert_eq!(PropertyOp::from_name(">=").unwrap(), PropertyOp::Ge);
        assert!(PropertyOp::from_name("~=").unwrap_err().is_validation());
        assert!(PropertyFilter::new(PropertyOp::Gt, None).is_err());
        assert!(PropertyFilter::new(PropertyOp::Exists, None).is_ok());
    }
}
