//! Search and scroll request/response types.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;

/// Hard per-request document ceiling imposed by the engine.
pub const MAX_DOCS_PER_REQUEST: u64 = 10_000;

/// Response filter for bulk requests: only error information is decoded on
/// the success path, bounding parse cost for requests carrying thousands of
/// rows.
pub const BULK_RESPONSE_FILTER: &str = "errors,items.*.error";

/// Response filter for search and scroll requests.
pub const SEARCH_RESPONSE_FILTER: &str = "_scroll_id,_shards.failed,hits.total,\
                                          hits.hits.fields.*,hits.hits._id,\
                                          hits.hits._score,hits.hits.highlight.*";

/// Server-side validity window for scroll cursors.
pub const SCROLL_TTL: &str = "10m";

/// Sort direction for an explicit sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Use the field's natural default.
    #[default]
    Default,
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    fn as_str(self, default_desc: bool) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
            SortDirection::Default => {
                if default_desc {
                    "desc"
                } else {
                    "asc"
                }
            }
        }
    }
}

/// Per-field highlighting configuration, passed through verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightSpec {
    /// Field to highlight.
    pub field: String,
    /// Engine-native highlight options for the field.
    pub options: Value,
}

impl HighlightSpec {
    /// Creates a highlight spec with default options.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            options: json!({}),
        }
    }

    /// Sets the engine-native options object.
    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Builder for the search request body sent when opening a scroll cursor.
///
/// Sort resolution: a limit forces scoring on (a limited result must favor
/// top-scoring matches); an explicit sort field wins; otherwise a requested
/// sort defaults to score-descending when scoring is active and to
/// locator-ascending when not, giving deterministic pagination without
/// relevance ranking.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    query: Value,
    track_scores: bool,
    sort_field: Option<String>,
    direction: SortDirection,
    need_sort: bool,
    highlights: Vec<HighlightSpec>,
}

impl SearchRequest {
    /// Creates a request for an already-translated query fragment.
    pub fn new(query: Value) -> Self {
        Self {
            query,
            track_scores: false,
            sort_field: None,
            direction: SortDirection::Default,
            need_sort: false,
            highlights: Vec::new(),
        }
    }

    /// Requests relevance scores.
    #[must_use]
    pub fn with_scores(mut self, track: bool) -> Self {
        self.track_scores = track;
        self
    }

    /// Requests sorted results, optionally by an explicit field.
    #[must_use]
    pub fn with_sort(mut self, field: Option<String>, direction: SortDirection) -> Self {
        self.need_sort = true;
        self.sort_field = field;
        self.direction = direction;
        self
    }

    /// Adds per-field highlight specs.
    #[must_use]
    pub fn with_highlights(mut self, highlights: Vec<HighlightSpec>) -> Self {
        self.highlights = highlights;
        self
    }

    /// Whether scoring is active for this request.
    #[must_use]
    pub fn track_scores(&self) -> bool {
        self.track_scores
    }

    /// Builds the JSON request body.
    #[must_use]
    pub fn body(&self) -> String {
        let sort = if self.need_sort {
            let (field, default_desc) = match &self.sort_field {
                Some(field) => (field.as_str(), false),
                None if self.track_scores => ("_score", true),
                None => (crate::types::CTID_FIELD, false),
            };
            json!([{ field: self.direction.as_str(default_desc) }])
        } else if self.track_scores {
            json!(["_score"])
        } else {
            json!(["_doc"])
        };

        let mut body = Map::new();
        body.insert("track_scores".into(), Value::Bool(self.track_scores));
        body.insert("sort".into(), sort);
        body.insert("query".into(), self.query.clone());

        if !self.highlights.is_empty() {
            let mut fields = Map::new();
            for spec in &self.highlights {
                fields.insert(spec.field.clone(), spec.options.clone());
            }
            body.insert("highlight".into(), json!({ "fields": fields }));
        }

        Value::Object(body).to_string()
    }
}

/// Body of a scroll page-refill request.
#[must_use]
pub fn scroll_body(scroll_id: &str, ttl: &str) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "{{\"scroll\":{},\"scroll_id\":{}}}",
        serde_json::to_string(ttl).unwrap_or_default(),
        serde_json::to_string(scroll_id).unwrap_or_default()
    );
    body
}

/// The filtered search/scroll response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Engine-reported error, fatal when present.
    #[serde(default)]
    pub error: Option<Value>,
    /// Cursor token for the next page.
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    /// Shard completion summary.
    #[serde(rename = "_shards", default)]
    pub shards: Option<ShardInfo>,
    /// The matched-hits envelope. Absent on error responses.
    #[serde(default)]
    pub hits: Option<HitsPage>,
}

/// Shard completion counts from the filtered response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardInfo {
    /// Number of shards that failed to execute the request.
    #[serde(default)]
    pub failed: u32,
}

/// One page of hits plus the declared total match count.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitsPage {
    /// Declared total number of matches across all pages.
    #[serde(default)]
    pub total: u64,
    /// The hits on this page.
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// A single decoded hit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hit {
    /// Engine-assigned document id.
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// Relevance score, when scoring is active.
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    /// Requested docvalue fields; values arrive as single-element arrays.
    #[serde(default)]
    pub fields: Option<Map<String, Value>>,
    /// Highlight fragments per field, when highlighting was requested.
    #[serde(default)]
    pub highlight: Option<Value>,
}

impl Hit {
    /// Returns the first value of a docvalue field as a `u64`, if present.
    #[must_use]
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.fields
            .as_ref()
            .and_then(|fields| fields.get(name))
            .and_then(|value| value.as_array())
            .and_then(|array| array.first())
            .and_then(|value| value.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CTID_FIELD;

    #[test]
    fn unsorted_body_uses_doc_order() {
        let body = SearchRequest::new(json!({"match_all": {}})).body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["track_scores"], false);
        assert_eq!(value["sort"], json!(["_doc"]));
        assert_eq!(value["query"], json!({"match_all": {}}));
        assert!(value.get("highlight").is_none());
    }

    #[test]
    fn scored_unsorted_body_uses_score_order() {
        let body = SearchRequest::new(json!({"match_all": {}}))
            .with_scores(true)
            .body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["sort"], json!(["_score"]));
    }

    #[test]
    fn default_sort_prefers_score_when_scoring() {
        let body = SearchRequest::new(json!({}))
            .with_scores(true)
            .with_sort(None, SortDirection::Default)
            .body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["sort"], json!([{"_score": "desc"}]));
    }

    #[test]
    fn default_sort_falls_back_to_locator_order() {
        let body = SearchRequest::new(json!({}))
            .with_sort(None, SortDirection::Default)
            .body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["sort"], json!([{ CTID_FIELD: "asc" }]));
    }

    #[test]
    fn explicit_sort_field_wins() {
        let body = SearchRequest::new(json!({}))
            .with_scores(true)
            .with_sort(Some("price".into()), SortDirection::Desc)
            .body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["sort"], json!([{"price": "desc"}]));
    }

    #[test]
    fn highlights_are_passed_through() {
        let body = SearchRequest::new(json!({}))
            .with_highlights(vec![
                HighlightSpec::new("title").with_options(json!({"fragment_size": 50}))
            ])
            .body();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["highlight"]["fields"]["title"]["fragment_size"], 50);
    }

    #[test]
    fn scroll_body_escapes_token() {
        let body = scroll_body("abc==", "10m");
        assert_eq!(body, "{\"scroll\":\"10m\",\"scroll_id\":\"abc==\"}");
    }

    #[test]
    fn response_decodes_filtered_shape() {
        let raw = r#"{
            "_scroll_id": "token-1",
            "_shards": {"failed": 0},
            "hits": {
                "total": 2,
                "hits": [
                    {"_id": "a", "_score": 1.5, "fields": {"esm_ctid": [30064771075]}},
                    {"_id": "b"}
                ]
            }
        }"#;
        let response: SearchResponse = serde_json::from_str(raw).unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.scroll_id.as_deref(), Some("token-1"));
        let hits = response.hits.unwrap();
        assert_eq!(hits.total, 2);
        assert_eq!(hits.hits[0].field_u64("esm_ctid"), Some(30064771075));
        assert_eq!(hits.hits[1].score, None);
    }

    #[test]
    fn response_surfaces_error_object() {
        let raw = r#"{"error": {"type": "search_phase_execution_exception"}}"#;
        let response: SearchResponse = serde_json::from_str(raw).unwrap();
        assert!(response.error.is_some());
        assert!(response.hits.is_none());
    }
}
