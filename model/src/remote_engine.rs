// ============================================================================
// REMOTE ENGINE — backend request lifecycle and response normalization
// ============================================================================
//
// The façade in front of every listing backend call. The engine never does
// network I/O itself; it hands out request descriptors and normalizes what
// comes back:
//
//   - JS calls begin_search(filters_json, page, page_size) → request id
//   - JS reads request_url_params(id), performs the fetch, then calls
//     settle_success(id, body) or settle_error(id, message)
//   - the engine normalizes the body (three legacy envelope shapes) into the
//     one result contract and exposes it through accessors
//
// LATEST WINS: each query slot (search/category, detail, autocomplete,
// membership) remembers its newest request id. Settling an older request
// marks it stale and leaves the visible result untouched — there is no
// network cancellation primitive, stale responses are simply discarded.
//
// FAILURE IS A RESULT: settle_error never throws; it normalizes to a failed
// result (success == false) that callers must render as an explicit
// "try again" state, distinguishable from a successful empty page.
//
// DEBOUNCE: autocomplete_input(term, now_ms) records keystrokes; a request
// is only minted by take_due_autocomplete(now_ms) once the input has been
// stable for the debounce window. A newer keystroke unconditionally replaces
// the pending one, and terms under the minimum length clear the timer and
// the suggestion list without ever issuing a request.
// ============================================================================

use serde_json::{json, Value};
use tracing::debug;
use wasm_bindgen::prelude::*;

use propsearch_shared::envelope::{
    normalize, parse_suggestions, RemoteQueryResult, Suggestion,
};
use propsearch_shared::{DEBOUNCE_WINDOW_MS, DEFAULT_PAGE_SIZE, MIN_AUTOCOMPLETE_LEN};

// ── Internal types ─────────────────────────────────────────────────────────

/// Which result slot a request settles into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Search,
    Detail,
    Autocomplete,
    Membership,
}

/// Request status codes.
const STATUS_PENDING: u8 = 0;
const STATUS_SUCCESS: u8 = 1;
const STATUS_ERROR: u8 = 2;
const STATUS_STALE: u8 = 3;

#[derive(Clone, Debug)]
struct RequestEntry {
    id: u32,
    slot: Slot,
    /// JSON params the fetch layer should send.
    url_params: String,
    /// Request-local context: autocomplete term or membership item id.
    context: String,
    status: u8,
}

/// The closed category set for queryByCategory.
const CATEGORIES: [&str; 3] = ["rental", "for-sale", "new-development"];

#[derive(Clone, Debug)]
struct PendingInput {
    term: String,
    due_at: f64,
}

// ── RemoteEngine ───────────────────────────────────────────────────────────

#[wasm_bindgen]
pub struct RemoteEngine {
    requests: Vec<RequestEntry>,
    next_request_id: u32,
    /// Newest request id per slot; older settlements are stale.
    latest: [u32; 4],

    search_result: RemoteQueryResult,
    search_settled: bool,

    detail_found: bool,
    detail_body: String,

    pending_input: Option<PendingInput>,
    suggestions: Vec<Suggestion>,

    membership_item: String,
    membership_in_set: bool,
    membership_count: u64,
    membership_message: String,
    membership_settled: bool,

    data_version: u32,
}

#[wasm_bindgen]
impl RemoteEngine {
    // ── Constructor ────────────────────────────────────────────────────

    #[wasm_bindgen(constructor)]
    pub fn new() -> RemoteEngine {
        RemoteEngine {
            requests: Vec::new(),
            next_request_id: 1,
            latest: [0; 4],
            search_result: RemoteQueryResult::failed(),
            search_settled: false,
            detail_found: false,
            detail_body: String::new(),
            pending_input: None,
            suggestions: Vec::new(),
            membership_item: String::new(),
            membership_in_set: false,
            membership_count: 0,
            membership_message: String::new(),
            membership_settled: false,
            data_version: 0,
        }
    }

    // ── Version tracking ───────────────────────────────────────────────

    #[wasm_bindgen(getter)]
    pub fn data_version(&self) -> u32 {
        self.data_version
    }

    fn bump_version(&mut self) {
        self.data_version = self.data_version.wrapping_add(1);
    }

    // ── Beginning requests ─────────────────────────────────────────────

    /// General filtered search. `filters_json` is the query engine's
    /// filters_json(); pages are 1-based; `page_size = 0` uses the default.
    pub fn begin_search(&mut self, filters_json: &str, page: usize, page_size: usize) -> u32 {
        let filters: Value =
            serde_json::from_str(filters_json).unwrap_or_else(|_| json!({}));
        let params = json!({
            "filters": filters,
            "page": page.max(1),
            "pageSize": if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size },
            "order": "newest",
        });
        self.begin(Slot::Search, params.to_string(), String::new())
    }

    /// Curated category query. The category set is closed; anything else is
    /// rejected with request id 0 and no request is issued.
    pub fn begin_category(&mut self, category: &str, limit: usize, page: usize) -> u32 {
        if !CATEGORIES.contains(&category) {
            debug!(category, "rejected unknown listing category");
            return 0;
        }
        let params = json!({
            "filters": { "category": category },
            "page": page.max(1),
            "pageSize": if limit == 0 { DEFAULT_PAGE_SIZE } else { limit },
            "order": "newest",
        });
        self.begin(Slot::Search, params.to_string(), String::new())
    }

    /// Single-listing detail fetch.
    pub fn begin_detail(&mut self, item_id: &str) -> u32 {
        let params = json!({ "id": item_id });
        self.begin(Slot::Detail, params.to_string(), item_id.to_string())
    }

    /// Server-side membership toggle (logged-in saved list).
    pub fn begin_membership_toggle(&mut self, item_id: &str) -> u32 {
        let params = json!({ "itemId": item_id });
        self.begin(Slot::Membership, params.to_string(), item_id.to_string())
    }

    /// The JSON params the fetch layer should send for a request id.
    pub fn request_url_params(&self, request_id: u32) -> String {
        self.find(request_id)
            .map(|r| r.url_params.clone())
            .unwrap_or_default()
    }

    /// Request-local context (autocomplete term / membership item id).
    pub fn request_context(&self, request_id: u32) -> String {
        self.find(request_id)
            .map(|r| r.context.clone())
            .unwrap_or_default()
    }

    /// Request status: "pending", "success", "error", "stale", or "".
    pub fn request_status(&self, request_id: u32) -> String {
        self.find(request_id)
            .map(|r| match r.status {
                STATUS_PENDING => "pending",
                STATUS_SUCCESS => "success",
                STATUS_ERROR => "error",
                STATUS_STALE => "stale",
                _ => "",
            })
            .unwrap_or("")
            .to_string()
    }

    // ── Settling requests ──────────────────────────────────────────────

    /// Settle a request with a raw response body. Never throws: a body that
    /// fails to normalize settles the slot as failed. A request that is no
    /// longer the newest of its slot is marked stale and ignored.
    pub fn settle_success(&mut self, request_id: u32, body: &str) {
        let Some((slot, context)) = self.prepare_settle(request_id, STATUS_SUCCESS) else {
            return;
        };
        match slot {
            Slot::Search => {
                self.search_result = normalize(body);
                self.search_settled = true;
            }
            Slot::Detail => {
                self.settle_detail(body);
            }
            Slot::Autocomplete => {
                self.suggestions = parse_suggestions(body);
            }
            Slot::Membership => {
                self.settle_membership(&context, body);
            }
        }
        self.bump_version();
    }

    /// Settle a request as failed (network error, HTTP failure). The slot's
    /// result becomes the explicit failed state.
    pub fn settle_error(&mut self, request_id: u32, message: &str) {
        let Some((slot, context)) = self.prepare_settle(request_id, STATUS_ERROR) else {
            return;
        };
        debug!(request_id, message, "remote request failed");
        match slot {
            Slot::Search => {
                self.search_result = RemoteQueryResult::failed();
                self.search_settled = true;
            }
            Slot::Detail => {
                self.detail_found = false;
                self.detail_body.clear();
            }
            Slot::Autocomplete => {
                // Fails closed: no suggestions.
                self.suggestions.clear();
            }
            Slot::Membership => {
                self.membership_item = context;
                self.membership_in_set = false;
                self.membership_count = 0;
                self.membership_message = message.to_string();
                self.membership_settled = false;
            }
        }
        self.bump_version();
    }

    // ── Search result accessors ────────────────────────────────────────

    /// Whether any search/category request has settled since construction
    /// (before that, success=false just means "nothing asked yet").
    pub fn search_settled(&self) -> bool {
        self.search_settled
    }

    /// False means "failed — render a try-again state", which is distinct
    /// from success with zero items ("no matches").
    pub fn search_success(&self) -> bool {
        self.search_result.success
    }

    pub fn search_total(&self) -> u64 {
        self.search_result.total
    }

    pub fn search_page(&self) -> u64 {
        self.search_result.page
    }

    pub fn search_page_count(&self) -> u64 {
        self.search_result.pages
    }

    pub fn search_item_count(&self) -> usize {
        self.search_result.items.len()
    }

    pub fn search_item_id(&self, index: usize) -> String {
        self.search_result
            .items
            .get(index)
            .map(|i| i.id.clone())
            .unwrap_or_default()
    }

    /// A display field of a result item, stringified ("" when absent).
    pub fn search_item_field(&self, index: usize, field: &str) -> String {
        self.search_result
            .items
            .get(index)
            .and_then(|i| i.fields.get(field))
            .map(field_to_string)
            .unwrap_or_default()
    }

    // ── Detail accessors ───────────────────────────────────────────────

    pub fn detail_found(&self) -> bool {
        self.detail_found
    }

    /// The detail item as a JSON object string ("" when not found).
    pub fn detail_json(&self) -> String {
        self.detail_body.clone()
    }

    // ── Autocomplete ───────────────────────────────────────────────────

    /// Record an autocomplete keystroke. Terms under the minimum length
    /// clear the pending timer and the current suggestions; the façade is
    /// never invoked for them. Otherwise the debounce timer restarts.
    pub fn autocomplete_input(&mut self, term: &str, now_ms: f64) {
        let term = term.trim();
        if term.chars().count() < MIN_AUTOCOMPLETE_LEN {
            self.pending_input = None;
            if !self.suggestions.is_empty() {
                self.suggestions.clear();
                self.bump_version();
            }
            return;
        }
        self.pending_input = Some(PendingInput {
            term: term.to_string(),
            due_at: now_ms + DEBOUNCE_WINDOW_MS,
        });
    }

    /// Mint the debounced autocomplete request once the input has been
    /// stable for the debounce window. Returns the request id, or 0 when
    /// nothing is due. The term travels in request_context().
    pub fn take_due_autocomplete(&mut self, now_ms: f64) -> u32 {
        let due = match &self.pending_input {
            Some(p) if now_ms >= p.due_at => p.term.clone(),
            _ => return 0,
        };
        self.pending_input = None;
        let params = json!({ "term": due, "limit": 10 });
        self.begin(Slot::Autocomplete, params.to_string(), due)
    }

    pub fn has_pending_autocomplete(&self) -> bool {
        self.pending_input.is_some()
    }

    pub fn suggestion_count(&self) -> usize {
        self.suggestions.len()
    }

    pub fn suggestion_kind(&self, index: usize) -> String {
        self.suggestions
            .get(index)
            .map(|s| s.kind.as_str().to_string())
            .unwrap_or_default()
    }

    pub fn suggestion_name(&self, index: usize) -> String {
        self.suggestions
            .get(index)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    pub fn suggestion_full_name(&self, index: usize) -> String {
        self.suggestions
            .get(index)
            .and_then(|s| s.full_name.clone())
            .unwrap_or_default()
    }

    pub fn suggestion_id(&self, index: usize) -> String {
        self.suggestions
            .get(index)
            .map(|s| field_to_string(&s.id))
            .unwrap_or_default()
    }

    pub fn suggestion_match_count(&self, index: usize) -> u64 {
        self.suggestions
            .get(index)
            .and_then(|s| s.match_count)
            .unwrap_or(0)
    }

    // ── Membership toggle result ───────────────────────────────────────

    /// Whether the last membership toggle settled successfully. When true,
    /// the embedder forwards membership_item/membership_in_set to
    /// CollectionEngine::reconcile_membership — the remote answer wins.
    pub fn membership_settled(&self) -> bool {
        self.membership_settled
    }

    pub fn membership_item(&self) -> String {
        self.membership_item.clone()
    }

    pub fn membership_in_set(&self) -> bool {
        self.membership_in_set
    }

    pub fn membership_count(&self) -> u64 {
        self.membership_count
    }

    pub fn membership_message(&self) -> String {
        self.membership_message.clone()
    }

    // ── Reset ──────────────────────────────────────────────────────────

    /// Reset all state to defaults.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.next_request_id = 1;
        self.latest = [0; 4];
        self.search_result = RemoteQueryResult::failed();
        self.search_settled = false;
        self.detail_found = false;
        self.detail_body.clear();
        self.pending_input = None;
        self.suggestions.clear();
        self.membership_item.clear();
        self.membership_in_set = false;
        self.membership_count = 0;
        self.membership_message.clear();
        self.membership_settled = false;
        self.bump_version();
    }
}

impl Default for RemoteEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ── Private implementation ─────────────────────────────────────────────────

impl RemoteEngine {
    fn begin(&mut self, slot: Slot, url_params: String, context: String) -> u32 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.requests.push(RequestEntry {
            id,
            slot,
            url_params,
            context,
            status: STATUS_PENDING,
        });
        self.latest[slot_index(slot)] = id;
        self.bump_version();
        id
    }

    fn find(&self, request_id: u32) -> Option<&RequestEntry> {
        self.requests.iter().find(|r| r.id == request_id)
    }

    /// Shared settle preamble: resolve the request, apply latest-wins.
    /// Returns the slot and context when the settlement should be applied.
    fn prepare_settle(&mut self, request_id: u32, status: u8) -> Option<(Slot, String)> {
        let pos = self.requests.iter().position(|r| r.id == request_id)?;
        if self.requests[pos].status != STATUS_PENDING {
            return None;
        }
        let slot = self.requests[pos].slot;
        if self.latest[slot_index(slot)] != request_id {
            // A newer request for this slot is in flight or settled; this
            // result is discarded.
            self.requests[pos].status = STATUS_STALE;
            self.bump_version();
            return None;
        }
        self.requests[pos].status = status;
        let context = self.requests[pos].context.clone();
        Some((slot, context))
    }

    fn settle_detail(&mut self, body: &str) {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(obj)) if !obj.is_empty() => {
                self.detail_found = true;
                self.detail_body = Value::Object(obj).to_string();
            }
            _ => {
                self.detail_found = false;
                self.detail_body.clear();
            }
        }
    }

    fn settle_membership(&mut self, item_id: &str, body: &str) {
        let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let success = value
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.membership_item = item_id.to_string();
        self.membership_settled = success;
        self.membership_in_set = value
            .get("inSet")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.membership_count = value
            .get("newCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.membership_message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
    }
}

fn slot_index(slot: Slot) -> usize {
    match slot {
        Slot::Search => 0,
        Slot::Detail => 1,
        Slot::Autocomplete => 2,
        Slot::Membership => 3,
    }
}

/// Stringify a display field: strings verbatim, scalars via to_string.
fn field_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_BODY: &str = r#"{"properties": [
        {"id": 1, "name": "Flat A", "price": 120000},
        {"id": 2, "name": "Flat B", "price": 250000}
    ], "total": 2, "page": 1, "pages": 1}"#;

    #[test]
    fn test_search_lifecycle() {
        let mut r = RemoteEngine::new();
        assert!(!r.search_settled());
        let id = r.begin_search(r#"{"city_id":"5"}"#, 1, 0);
        assert_eq!(r.request_status(id), "pending");
        let params: Value =
            serde_json::from_str(&r.request_url_params(id)).expect("valid params");
        assert_eq!(params["filters"]["city_id"], "5");
        assert_eq!(params["pageSize"], DEFAULT_PAGE_SIZE as u64);

        r.settle_success(id, PAGE_BODY);
        assert!(r.search_settled());
        assert!(r.search_success());
        assert_eq!(r.search_total(), 2);
        assert_eq!(r.search_item_count(), 2);
        assert_eq!(r.search_item_id(0), "1");
        assert_eq!(r.search_item_field(1, "name"), "Flat B");
        assert_eq!(r.search_item_field(1, "price"), "250000");
        assert_eq!(r.request_status(id), "success");
    }

    #[test]
    fn test_error_is_distinct_from_empty() {
        let mut r = RemoteEngine::new();
        let id = r.begin_search("{}", 1, 0);
        r.settle_error(id, "network unreachable");
        assert!(r.search_settled());
        assert!(!r.search_success());
        assert_eq!(r.search_item_count(), 0);

        // A successful empty page is a success with zero items.
        let id = r.begin_search("{}", 1, 0);
        r.settle_success(id, r#"{"items": [], "total": 0}"#);
        assert!(r.search_success());
        assert_eq!(r.search_total(), 0);
    }

    #[test]
    fn test_stale_search_discarded() {
        let mut r = RemoteEngine::new();
        let old = r.begin_search(r#"{"keyword":"ap"}"#, 1, 0);
        let new = r.begin_search(r#"{"keyword":"apt"}"#, 1, 0);

        // The newer response lands first; the older one must not clobber it.
        r.settle_success(new, PAGE_BODY);
        r.settle_success(old, r#"{"items": [], "total": 0}"#);
        assert_eq!(r.search_item_count(), 2);
        assert_eq!(r.request_status(old), "stale");
        assert_eq!(r.request_status(new), "success");
    }

    #[test]
    fn test_category_closed_set() {
        let mut r = RemoteEngine::new();
        assert_eq!(r.begin_category("mansions", 6, 1), 0);
        let id = r.begin_category("rental", 6, 1);
        assert_ne!(id, 0);
        let params: Value =
            serde_json::from_str(&r.request_url_params(id)).expect("valid params");
        assert_eq!(params["filters"]["category"], "rental");
        assert_eq!(params["pageSize"], 6);
    }

    #[test]
    fn test_detail_lifecycle() {
        let mut r = RemoteEngine::new();
        let id = r.begin_detail("42");
        r.settle_success(id, r#"{"id": 42, "name": "Penthouse"}"#);
        assert!(r.detail_found());
        assert!(r.detail_json().contains("Penthouse"));

        let id = r.begin_detail("404");
        r.settle_success(id, "null");
        assert!(!r.detail_found());
        assert_eq!(r.detail_json(), "");
    }

    #[test]
    fn test_autocomplete_debounce_last_term_wins() {
        let mut r = RemoteEngine::new();
        r.autocomplete_input("ap", 0.0);
        r.autocomplete_input("apt", 100.0);

        // Not due until the newer keystroke has been stable for the window.
        assert_eq!(r.take_due_autocomplete(350.0), 0);
        let id = r.take_due_autocomplete(400.0);
        assert_ne!(id, 0);
        assert_eq!(r.request_context(id), "apt");

        // Exactly one request: nothing further is due.
        assert_eq!(r.take_due_autocomplete(1000.0), 0);
    }

    #[test]
    fn test_autocomplete_short_term_never_requests() {
        let mut r = RemoteEngine::new();
        let id = r.begin_search("{}", 1, 0); // unrelated slot untouched
        r.autocomplete_input("lisbon", 0.0);
        r.autocomplete_input("l", 100.0);
        assert!(!r.has_pending_autocomplete());
        assert_eq!(r.take_due_autocomplete(10_000.0), 0);
        assert_eq!(r.request_status(id), "pending");
    }

    #[test]
    fn test_autocomplete_settle_and_stale() {
        let mut r = RemoteEngine::new();
        r.autocomplete_input("li", 0.0);
        let old = r.take_due_autocomplete(300.0);
        r.autocomplete_input("lis", 400.0);
        let new = r.take_due_autocomplete(700.0);

        r.settle_success(
            new,
            r#"[{"type": "city", "name": "Lisbon", "id": 5, "matchCount": 12}]"#,
        );
        // Old response arrives late and is discarded.
        r.settle_success(old, r#"[{"type": "region", "name": "Liguria", "id": 9}]"#);

        assert_eq!(r.suggestion_count(), 1);
        assert_eq!(r.suggestion_name(0), "Lisbon");
        assert_eq!(r.suggestion_kind(0), "city");
        assert_eq!(r.suggestion_id(0), "5");
        assert_eq!(r.suggestion_match_count(0), 12);
        assert_eq!(r.request_status(old), "stale");
    }

    #[test]
    fn test_autocomplete_error_fails_closed() {
        let mut r = RemoteEngine::new();
        r.autocomplete_input("li", 0.0);
        let id = r.take_due_autocomplete(300.0);
        r.settle_success(id, r#"[{"type": "city", "name": "Lisbon", "id": 5}]"#);
        assert_eq!(r.suggestion_count(), 1);

        r.autocomplete_input("lix", 400.0);
        let id = r.take_due_autocomplete(700.0);
        r.settle_error(id, "timeout");
        assert_eq!(r.suggestion_count(), 0);
    }

    #[test]
    fn test_membership_toggle_settlement() {
        let mut r = RemoteEngine::new();
        let id = r.begin_membership_toggle("42");
        let params: Value =
            serde_json::from_str(&r.request_url_params(id)).expect("valid params");
        assert_eq!(params["itemId"], "42");

        r.settle_success(
            id,
            r#"{"success": true, "inSet": true, "newCount": 7, "message": "saved"}"#,
        );
        assert!(r.membership_settled());
        assert_eq!(r.membership_item(), "42");
        assert!(r.membership_in_set());
        assert_eq!(r.membership_count(), 7);
        assert_eq!(r.membership_message(), "saved");
    }

    #[test]
    fn test_membership_error_not_settled() {
        let mut r = RemoteEngine::new();
        let id = r.begin_membership_toggle("42");
        r.settle_error(id, "offline");
        assert!(!r.membership_settled());
        assert_eq!(r.membership_message(), "offline");
    }

    #[test]
    fn test_double_settle_ignored() {
        let mut r = RemoteEngine::new();
        let id = r.begin_search("{}", 1, 0);
        r.settle_success(id, PAGE_BODY);
        r.settle_error(id, "late duplicate");
        assert!(r.search_success());
        assert_eq!(r.search_item_count(), 2);
    }

    #[test]
    fn test_garbage_filters_json_tolerated() {
        let mut r = RemoteEngine::new();
        let id = r.begin_search("not json", 1, 0);
        let params: Value =
            serde_json::from_str(&r.request_url_params(id)).expect("valid params");
        assert_eq!(params["filters"], json!({}));
    }
}
