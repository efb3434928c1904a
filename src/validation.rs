//! Parameter checks shared by every query entry point.

use crate::error::{IndexError, Result};

pub const MAX_QUERY_LEN: usize = 500;
pub const MIN_CONTEXT_LENGTH: usize = 10;
pub const MAX_CONTEXT_LENGTH: usize = 500;
pub const MAX_RESULTS_LIMIT: usize = 1000;
pub const MAX_DAYS_AGO: i64 = 365;

pub fn validate_search_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(IndexError::InvalidQuery(
            "search query cannot be empty (try keywords, tag:#project, path:Daily/ or property:status:active)"
                .to_string(),
        ));
    }
    let len = query.chars().count();
    if len > MAX_QUERY_LEN {
        return Err(IndexError::InvalidQuery(format!(
            "search query too long: {} characters (max: {})",
            len, MAX_QUERY_LEN
        )));
    }
    Ok(())
}

pub fn validate_context_length(length: usize) -> Result<()> {
    if !(MIN_CONTEXT_LENGTH..=MAX_CONTEXT_LENGTH).contains(&length) {
        return Err(IndexError::InvalidParameter {
            name: "context_length",
            message: format!(
                "{} is out of range ({}..={})",
                length, MIN_CONTEXT_LENGTH, MAX_CONTEXT_LENGTH
            ),
        });
    }
    Ok(())
}

pub fn validate_max_results(max_results: usize) -> Result<()> {
    if max_results == 0 || max_results > MAX_RESULTS_LIMIT {
        return Err(IndexError::InvalidParameter {
            name: "max_results",
            message: format!("{} is out of range (1..={})", max_results, MAX_RESULTS_LIMIT),
        });
    }
    Ok(())
}

pub fn validate_property_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IndexError::InvalidQuery("property name cannot be empty".to_string()));
    }
    if name.contains(':') {
        return Err(IndexError::InvalidQuery(format!(
            "property name cannot contain ':' ({})",
            name
        )));
    }
    Ok(())
}

/// `date_type` and `operator` are checked by name; `days_ago` must be in `0..=365`.
pub fn validate_date_search_params(date_type: &str, days_ago: i64, operator: &str) -> Result<()> {
    if !matches!(date_type, "created" | "modified") {
        return Err(IndexError::InvalidParameter {
            name: "date_type",
            message: format!("'{}' is not one of: created, modified", date_type),
        });
    }
    if !matches!(operator, "within" | "exactly") {
        return Err(IndexError::InvalidParameter {
            name: "operator",
            message: format!("'{}' is not one of: within, exactly", operator),
        });
    }
    if days_ago < 0 {
        return Err(IndexError::InvalidParameter {
            name: "days_ago",
            message: format!("{} is negative", days_ago),
        });
    }
    if days_ago > MAX_DAYS_AGO {
        return Err(IndexError::InvalidParameter {
            name: "days_ago",
            message: format!("{} is too large (max: {})", days_ago, MAX_DAYS_AGO),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_bounds() {
        assert!(validate_search_query("machine learning").is_ok());
        assert!(validate_search_query("   ").is_err());
        assert!(validate_search_query(&"x".repeat(501)).is_err());
        assert!(validate_search_query(&"가".repeat(500)).is_ok());
    }

    #[test]
    fn test_numeric_bounds() {
        assert!(validate_context_length(100).is_ok());
        assert!(validate_context_length(9).is_err());
        assert!(validate_context_length(501).is_err());
        assert!(validate_max_results(1).is_ok());
        assert!(validate_max_results(0).is_err());
        assert!(validate_max_results(1001).is_err());
    }

    #[test]
    fn test_property_name() {
        assert!(validate_property_name("status").is_ok());
        assert!(validate_property_name("").is_err());
        assert!(validate_property_name("a:b").is_err());
    }

    #[test]
    fn test_date_search_params() {
        assert!(validate_date_search_params("modified", 7, "within").is_ok());
        assert!(validate_date_search_params("created", 0, "exactly").is_ok());
        assert!(validate_date_search_params("created", 365, "within").is_ok());
        assert!(validate_date_search_params("accessed", 7, "within").is_err());
        assert!(validate_date_search_params("modified", 7, "before").is_err());
        assert!(validate_date_search_params("modified", -1, "within").is_err());
        assert!(validate_date_search_params("modified", 366, "within").is_err());
    }
}
