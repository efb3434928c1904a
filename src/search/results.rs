use serde::Serialize;

use super::parser::QueryDialect;

/// One document in a search envelope. The shape is the same for every dialect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub path: String,
    pub score: f64,
    pub matches: Vec<String>,
    pub context: String,
    /// Set by property searches only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_value: Option<serde_json::Value>,
}

impl SearchHit {
    pub fn new(path: impl Into<String>, score: f64, matches: Vec<String>, context: String) -> Self {
        Self {
            path: path.into(),
            score,
            matches,
            context,
            property_value: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub total_count: usize,
    pub truncated: bool,
    pub dialect: QueryDialect,
}

impl SearchResponse {
    /// Envelope for hits that were already cut by the producer.
    pub fn new(dialect: QueryDialect, results: Vec<SearchHit>, total_count: usize, truncated: bool) -> Self {
        Self {
            count: results.len(),
            results,
            total_count,
            truncated,
            dialect,
        }
    }

    /// Envelope for a fully ranked hit list, cut to `max_results` here.
    pub fn from_ranked(dialect: QueryDialect, mut results: Vec<SearchHit>, max_results: usize) -> Self {
        let total_count = results.len();
        let truncated = total_count > max_results;
        results.truncate(max_results);
        Self::new(dialect, results, total_count, truncated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegexMatch {
    #[serde(rename = "match")]
    pub text: String,
    /// 1-based
    pub line: usize,
    pub context: String,
    /// Capture groups 1..n, present only when the pattern has groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexFileResult {
    pub path: String,
    /// Every match in the file, not just the ones listed in `matches`
    pub match_count: usize,
    pub score: f64,
    pub matches: Vec<RegexMatch>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexSearchResponse {
    pub results: Vec<RegexFileResult>,
    pub count: usize,
    pub total_count: usize,
    pub truncated: bool,
    pub dialect: QueryDialect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateHit {
    pub path: String,
    /// RFC 3339, local time
    pub date: String,
    pub days_ago: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateSearchResponse {
    /// Human-readable description of the lookup
    pub query: String,
    pub count: usize,
    pub results: Vec<DateHit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serializes_camel_case() {
        let hits = (0..3)
            .map(|i| SearchHit::new(format!("{}.md", i), 1.0, vec!["q".to_string()], String::new()))
            .collect();
        let response = SearchResponse::from_ranked(QueryDialect::Content, hits, 2);
        assert_eq!(response.count, 2);
        assert_eq!(response.total_count, 3);
        assert!(response.truncated);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["totalCount"], 3);
        assert_eq!(json["dialect"], "content");
        assert!(json["results"][0].get("propertyValue").is_none());
    }

    #[test]
    fn test_regex_match_field_names() {
        let m = RegexMatch {
            text: "TODO: x".to_string(),
            line: 3,
            context: "TODO: x".to_string(),
            groups: None,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["match"], "TODO: x");
        assert!(json.get("groups").is_none());
    }
}
