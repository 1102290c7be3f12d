//! Backend response-envelope normalization.
//!
//! The listing backend has grown three response shapes over time:
//!
//! 1. a result wrapper: `{"result": {"success": true, "properties": [...],
//!    "total": 40, "page": 2, "pages": 4}}`
//! 2. a bare paged object: `{"properties": [...], "total": 40, ...}`
//!    (`"items"` is accepted as an alias for `"properties"` in both)
//! 3. a bare array: `[...]`
//!
//! Each shape has its own adapter function, enumerated and tested
//! individually. `normalize()` tries them in order and never errors: anything
//! unrecognized becomes `RemoteQueryResult::failed()`, which callers render
//! as an explicit "try again" state distinct from zero matches.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// One listing item as received from the backend. The `id` is extracted up
/// front (numeric or string); remaining fields are kept verbatim for display.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemSnapshot {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// The single result contract every backend shape normalizes into.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteQueryResult {
    pub success: bool,
    pub items: Vec<ItemSnapshot>,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

impl RemoteQueryResult {
    /// The normalized error shape: not a success, no items.
    pub fn failed() -> Self {
        RemoteQueryResult {
            success: false,
            items: Vec::new(),
            total: 0,
            page: 0,
            pages: 0,
        }
    }
}

/// Why a payload could not be normalized. Internal: callers of `normalize`
/// only ever see `RemoteQueryResult::failed()`.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unrecognized envelope shape")]
    UnrecognizedShape,
    #[error("result wrapper reported failure")]
    ReportedFailure,
}

/// Normalize a raw response body into the one result contract. Never errors.
pub fn normalize(raw: &str) -> RemoteQueryResult {
    match try_normalize(raw) {
        Ok(result) => result,
        Err(err) => {
            warn!(error = %err, "response body did not normalize");
            RemoteQueryResult::failed()
        }
    }
}

/// Shape dispatch. Adapters are tried most-specific first.
pub fn try_normalize(raw: &str) -> Result<RemoteQueryResult, EnvelopeError> {
    let value: Value = serde_json::from_str(raw)?;
    match &value {
        Value::Object(obj) if obj.contains_key("result") => from_result_wrapper(obj),
        Value::Object(obj) => from_paged_object(obj),
        Value::Array(arr) => Ok(from_bare_array(arr)),
        _ => Err(EnvelopeError::UnrecognizedShape),
    }
}

// ── Per-shape adapters ──────────────────────────────────────────────────────

/// Shape 1: `{"result": {"success": bool, ...paged object...}}`.
fn from_result_wrapper(obj: &Map<String, Value>) -> Result<RemoteQueryResult, EnvelopeError> {
    let inner = obj
        .get("result")
        .and_then(Value::as_object)
        .ok_or(EnvelopeError::UnrecognizedShape)?;
    if !inner.get("success").and_then(Value::as_bool).unwrap_or(true) {
        return Err(EnvelopeError::ReportedFailure);
    }
    from_paged_object(inner)
}

/// Shape 2: a bare object carrying a `properties` or `items` array plus
/// optional paging fields.
fn from_paged_object(obj: &Map<String, Value>) -> Result<RemoteQueryResult, EnvelopeError> {
    let arr = obj
        .get("properties")
        .or_else(|| obj.get("items"))
        .and_then(Value::as_array)
        .ok_or(EnvelopeError::UnrecognizedShape)?;
    let items = collect_items(arr);
    let total = obj
        .get("total")
        .and_then(Value::as_u64)
        .unwrap_or(items.len() as u64);
    Ok(RemoteQueryResult {
        success: true,
        total,
        page: obj.get("page").and_then(Value::as_u64).unwrap_or(1),
        pages: obj.get("pages").and_then(Value::as_u64).unwrap_or(1),
        items,
    })
}

/// Shape 3: a bare array of items — one unpaged page.
fn from_bare_array(arr: &[Value]) -> RemoteQueryResult {
    let items = collect_items(arr);
    RemoteQueryResult {
        success: true,
        total: items.len() as u64,
        page: 1,
        pages: 1,
        items,
    }
}

/// Items must be objects with an `id` (number or string); anything else is
/// dropped rather than failing the whole page.
fn collect_items(arr: &[Value]) -> Vec<ItemSnapshot> {
    arr.iter()
        .filter_map(|v| {
            let obj = v.as_object()?;
            let id = item_id(obj.get("id")?)?;
            Some(ItemSnapshot {
                id,
                fields: obj.clone(),
            })
        })
        .collect()
}

fn item_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Autocomplete suggestions ────────────────────────────────────────────────

/// What a suggestion points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    City,
    Region,
    Project,
    Property,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::City => "city",
            SuggestionKind::Region => "region",
            SuggestionKind::Project => "project",
            SuggestionKind::Property => "property",
        }
    }
}

/// One autocomplete suggestion entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub name: String,
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
    pub id: Value,
    #[serde(rename = "matchCount", default)]
    pub match_count: Option<u64>,
}

/// Parse an autocomplete response. Fails closed: any malformed payload, or
/// entries with an unknown `type`, yield no suggestions rather than an error.
pub fn parse_suggestions(raw: &str) -> Vec<Suggestion> {
    let values: Vec<Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "autocomplete body did not parse");
            return Vec::new();
        }
    };
    values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

// ============================================
// Tests
// ============================================
