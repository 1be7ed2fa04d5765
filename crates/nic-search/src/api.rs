/// Wire types for the HTTP API and parsing of `/search` request bodies.
///
/// The browser client posts either multipart form data (`query`, `result_count`,
/// `search_mode`, `show_metrics`) or JSON, where `count`, `mode` and `metrics` are accepted
/// as shorter aliases and win over the long names.
use std::collections::HashMap;

use axum::extract::{Form, FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{SearchMetrics, SearchResult};
use crate::search::SearchMode;

pub const DEFAULT_RESULT_COUNT: usize = 10;
pub const MAX_RESULT_COUNT: usize = 100;

/// `/search` parameters as received, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSearchParams {
    pub query: Option<String>,
    pub count: Option<String>,
    pub mode: Option<String>,
    pub metrics: bool,
    pub language: Option<String>,
}

/// `/search` parameters after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub count: usize,
    pub mode: SearchMode,
    pub metrics: bool,
    pub language: Option<String>,
}

impl RawSearchParams {
    /// Read a JSON object body. Any other JSON value is rejected.
    pub fn from_json(body: &Value) -> Result<Self, String> {
        let obj = body
            .as_object()
            .ok_or_else(|| "Request body must be a JSON object".to_string())?;
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(json_text).filter(|s| not_blank(s)))
        };

        Ok(Self {
            query: first(&["query"]),
            count: first(&["count", "result_count"]),
            mode: first(&["mode", "search_mode"]),
            metrics: ["metrics", "show_metrics"]
                .iter()
                .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
                .is_some_and(json_flag),
            language: first(&["language"]),
        })
    }

    /// Read form fields (URL-encoded or multipart).
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| fields.get(*k).cloned().filter(|s| not_blank(s)))
        };
        Self {
            query: first(&["query"]),
            count: first(&["count", "result_count"]),
            mode: first(&["mode", "search_mode"]),
            metrics: first(&["metrics", "show_metrics"]).is_some_and(|v| form_flag(&v)),
            language: first(&["language"]),
        }
    }

    pub fn validate(self) -> Result<SearchParams, String> {
        let query = normalize_query(self.query.as_deref().unwrap_or_default());
        if query.is_empty() {
            return Err("Empty query".to_string());
        }

        let count = match self.count {
            None => DEFAULT_RESULT_COUNT,
            Some(raw) => parse_count(&raw).ok_or_else(|| {
                format!("Invalid result_count: must be an integer between 1 and {MAX_RESULT_COUNT}")
            })?,
        };

        let mode = match self.mode {
            None => SearchMode::default(),
            Some(raw) => SearchMode::parse(&raw).ok_or_else(|| {
                format!(
                    "Invalid search_mode '{raw}': must be one of {}",
                    SearchMode::NAMES.join(", ")
                )
            })?,
        };

        Ok(SearchParams {
            query,
            count,
            mode,
            metrics: self.metrics,
            language: self.language,
        })
    }
}

/// Extract `/search` parameters according to the request's `Content-Type`.
pub async fn read_search_params(request: Request) -> Result<RawSearchParams, String> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<Value>::from_request(request, &())
            .await
            .map_err(|e| format!("Invalid JSON body: {}", e.body_text()))?;
        RawSearchParams::from_json(&body)
    } else if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| format!("Invalid multipart body: {}", e.body_text()))?;
        let mut fields = HashMap::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("Invalid multipart body: {}", e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let value = field
                .text()
                .await
                .map_err(|e| format!("Invalid multipart field {name}: {}", e.body_text()))?;
            fields.entry(name).or_insert(value);
        }
        Ok(RawSearchParams::from_fields(&fields))
    } else {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| format!("Invalid form body: {}", e.body_text()))?;
        Ok(RawSearchParams::from_fields(&fields))
    }
}

/// Trim and collapse internal whitespace.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_count(raw: &str) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=MAX_RESULT_COUNT).contains(n))
}

fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => form_flag(s),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn form_flag(value: &str) -> bool {
    let v = value.trim();
    v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("on")
}

/// Body of every `/search` response, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
    /// Seconds, three decimals.
    pub elapsed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SearchMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn error(message: impl Into<String>, elapsed: f64) -> Self {
        Self {
            results: Vec::new(),
            count: 0,
            elapsed,
            query: None,
            language: None,
            metrics: None,
            error: Some(message.into()),
        }
    }
}

/// `{ status, message }` envelope used by the admin and recording endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageRequest {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexStatsQuery {
    #[serde(default)]
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn json_short_keys_take_precedence() {
        let raw = RawSearchParams::from_json(&json!({
            "query": "  bakery   products ",
            "count": "5",
            "result_count": 50,
            "mode": "strict",
            "search_mode": "relaxed",
            "metrics": true,
            "language": "hindi"
        }))
        .unwrap();
        let params = raw.validate().unwrap();
        assert_eq!(params.query, "bakery products");
        assert_eq!(params.count, 5);
        assert_eq!(params.mode, SearchMode::Strict);
        assert!(params.metrics);
        assert_eq!(params.language.as_deref(), Some("hindi"));
    }

    #[test]
    fn json_long_keys_and_defaults() {
        let params = RawSearchParams::from_json(&json!({
            "query": "tea",
            "result_count": 20,
            "show_metrics": "on"
        }))
        .unwrap()
        .validate()
        .unwrap();
        assert_eq!(params.count, 20);
        assert_eq!(params.mode, SearchMode::Standard);
        assert!(params.metrics);

        let params = RawSearchParams::from_json(&json!({"query": "tea"}))
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(params.count, DEFAULT_RESULT_COUNT);
        assert!(!params.metrics);

        assert!(RawSearchParams::from_json(&json!(["tea"])).is_err());
    }

    #[test]
    fn blank_json_fields_count_as_absent() {
        let raw = RawSearchParams::from_json(&json!({
            "query": "tea",
            "mode": "",
            "search_mode": "strict",
            "count": " ",
            "language": ""
        }))
        .unwrap();
        assert_eq!(raw.language, None);
        let params = raw.validate().unwrap();
        assert_eq!(params.mode, SearchMode::Strict);
        assert_eq!(params.count, DEFAULT_RESULT_COUNT);

        let params = RawSearchParams::from_json(&json!({"query": "tea", "mode": ""}))
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(params.mode, SearchMode::Standard);
    }

    #[test]
    fn form_fields_parse_flags() {
        let raw = RawSearchParams::from_fields(&fields(&[
            ("query", "rice milling"),
            ("result_count", "3"),
            ("search_mode", "relaxed"),
            ("show_metrics", "TRUE"),
        ]));
        let params = raw.validate().unwrap();
        assert_eq!(params.count, 3);
        assert_eq!(params.mode, SearchMode::Relaxed);
        assert!(params.metrics);

        let raw = RawSearchParams::from_fields(&fields(&[
            ("query", "rice"),
            ("show_metrics", "false"),
            ("result_count", ""),
        ]));
        assert!(!raw.metrics);
        assert_eq!(raw.validate().unwrap().count, DEFAULT_RESULT_COUNT);
    }

    #[test]
    fn validation_errors() {
        let err = |pairs: &[(&str, &str)]| {
            RawSearchParams::from_fields(&fields(pairs))
                .validate()
                .unwrap_err()
        };
        assert_eq!(err(&[("query", "   ")]), "Empty query");
        assert_eq!(err(&[]), "Empty query");
        for count in ["0", "101", "ten"] {
            assert!(err(&[("query", "x"), ("result_count", count)])
                .starts_with("Invalid result_count"));
        }
        assert!(err(&[("query", "x"), ("search_mode", "fuzzy")])
            .contains("standard, strict, relaxed"));
    }
}
