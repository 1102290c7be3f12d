// ============================================================================
// QUERY STATE ENGINE — search filters mirrored to the URL query string
// ============================================================================
//
// Owns the FilterState for the property-search page and the codec between
// that state and the address bar. The JS shell owns the History API; the
// engine tells it what to do:
//
//   - JS calls set_filter("city_id", "5") on every filter-control change
//     → engine stores/drops the value, marks a pending "replace" history
//       action (keystrokes must not pollute the back-stack) and a pending
//       re-query
//   - JS calls set_page(2) on pagination clicks → pending "push" action, so
//     back/forward moves between result pages
//   - JS drains take_history_action() + query_string() and calls
//     replaceState/pushState accordingly, then drains take_needs_requery()
//     and re-issues the search through the remote engine
//   - on popstate JS calls apply_navigation(location.search) — the engine
//     re-decodes the URL into state and requests a re-query, with no further
//     history action (required: in-memory state must follow the address bar)
//
// Known filter keys are registered in init_filters(), the primary
// customization point. Unknown keys are ignored on decode; a key holding an
// unset value (empty, "false" for flags, "all" for choices) is removed and
// never encoded, so repeated encodes of unchanged state are idempotent and
// cleared state encodes to the bare path.
// ============================================================================

use wasm_bindgen::prelude::*;

use propsearch_shared::filters::{
    accepts, decode_component, encode_component, is_unset, FilterKind,
};

// ── Internal types ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct FilterDef {
    key: &'static str,
    kind: FilterKind,
}

/// Pending history action codes, exposed as strings.
const HISTORY_NONE: u8 = 0;
const HISTORY_REPLACE: u8 = 1;
const HISTORY_PUSH: u8 = 2;

// ── QueryStateEngine ───────────────────────────────────────────────────────

#[wasm_bindgen]
pub struct QueryStateEngine {
    defs: Vec<FilterDef>,
    /// Active constraints, keyed by position in `defs` (encoding order is
    /// registration order, which keeps encodes stable).
    values: Vec<Option<String>>,
    page: usize, // 1-based; page 1 is never encoded
    pending_history: u8,
    needs_requery: bool,
    data_version: u32,
}

#[wasm_bindgen]
impl QueryStateEngine {
    // ── Constructor ────────────────────────────────────────────────────

    #[wasm_bindgen(constructor)]
    pub fn new() -> QueryStateEngine {
        let mut engine = QueryStateEngine {
            defs: Vec::new(),
            values: Vec::new(),
            page: 1,
            pending_history: HISTORY_NONE,
            needs_requery: false,
            data_version: 0,
        };
        engine.init_filters();
        engine.values = vec![None; engine.defs.len()];
        engine
    }

    // ── CUSTOMIZATION POINT — Register the filter keys here ────────────

    /// The closed set of filter keys this search page understands, in
    /// encoding order. Called once from the constructor.
    fn init_filters(&mut self) {
        use FilterKind::*;
        self.register("service", Choice);
        self.register("property_type", Choice);
        self.register("city_id", Choice);
        self.register("district_id", Choice);
        self.register("min_price", Numeric);
        self.register("max_price", Numeric);
        self.register("min_area", Numeric);
        self.register("max_area", Numeric);
        self.register("bedrooms", Numeric);
        self.register("bathrooms", Numeric);
        self.register("furnished", Flag);
        self.register("parking", Flag);
        self.register("balcony", Flag);
        self.register("elevator", Flag);
        self.register("pets_allowed", Flag);
        self.register("keyword", Text);
    }

    // ── Version tracking ───────────────────────────────────────────────

    #[wasm_bindgen(getter)]
    pub fn data_version(&self) -> u32 {
        self.data_version
    }

    fn bump_version(&mut self) {
        self.data_version = self.data_version.wrapping_add(1);
    }

    // ── Filter mutations ───────────────────────────────────────────────

    /// Apply one filter-control change. Unknown keys and rejected values
    /// (non-numeric in a numeric key, non-literal bool in a flag) are
    /// ignored; unset values remove the key. Any accepted change resets the
    /// page, marks a pending "replace" history action, and requests a
    /// re-query.
    pub fn set_filter(&mut self, key: &str, value: &str) {
        let Some(idx) = self.def_index(key) else {
            return;
        };
        let kind = self.defs[idx].kind;
        let next = if is_unset(kind, value) {
            None
        } else if accepts(kind, value) {
            Some(value.to_string())
        } else {
            return;
        };
        if self.values[idx] == next {
            return;
        }
        self.values[idx] = next;
        self.page = 1;
        self.pending_history = HISTORY_REPLACE;
        self.needs_requery = true;
        self.bump_version();
    }

    /// Reset every filter and the page. The encoded query becomes the empty
    /// string, i.e. the bare path.
    pub fn clear_all(&mut self) {
        if self.values.iter().all(Option::is_none) && self.page == 1 {
            return;
        }
        for v in &mut self.values {
            *v = None;
        }
        self.page = 1;
        self.pending_history = HISTORY_REPLACE;
        self.needs_requery = true;
        self.bump_version();
    }

    /// Navigate to a result page (1-based). Page changes push a history
    /// entry so back/forward moves between pages.
    pub fn set_page(&mut self, page: usize) {
        let page = page.max(1);
        if page == self.page {
            return;
        }
        self.page = page;
        self.pending_history = HISTORY_PUSH;
        self.needs_requery = true;
        self.bump_version();
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Current value of a filter key ("" when unset or unknown).
    pub fn filter(&self, key: &str) -> String {
        self.def_index(key)
            .and_then(|idx| self.values[idx].clone())
            .unwrap_or_default()
    }

    pub fn active_filter_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    #[wasm_bindgen(getter)]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Active constraints as a JSON object, for the remote engine's search
    /// request. Registration order.
    pub fn filters_json(&self) -> String {
        let mut out = String::from("{");
        let mut first = true;
        for (def, value) in self.defs.iter().zip(&self.values) {
            if let Some(v) = value {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&format!(
                    "{}:{}",
                    serde_json::to_string(def.key).unwrap_or_default(),
                    serde_json::to_string(v).unwrap_or_default()
                ));
            }
        }
        out.push('}');
        out
    }

    // ── URL codec ──────────────────────────────────────────────────────

    /// Encode the current state as a query string (no leading '?'). Unset
    /// keys are omitted, ordering is stable, page 1 is implicit — encoding
    /// unchanged state twice yields the same string.
    pub fn query_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (def, value) in self.defs.iter().zip(&self.values) {
            if let Some(v) = value {
                parts.push(format!("{}={}", def.key, encode_component(v)));
            }
        }
        if self.page > 1 {
            parts.push(format!("page={}", self.page));
        }
        parts.join("&")
    }

    /// Decode a query string (with or without a leading '?') into state,
    /// replacing whatever was set. Unknown keys are ignored; values that the
    /// key's kind rejects are ignored too.
    pub fn decode(&mut self, query: &str) {
        for v in &mut self.values {
            *v = None;
        }
        self.page = 1;
        let query = query.strip_prefix('?').unwrap_or(query);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, raw_value) = match pair.find('=') {
                Some(idx) => (&pair[..idx], &pair[idx + 1..]),
                None => (pair, ""),
            };
            let value = decode_component(raw_value);
            if key == "page" {
                if let Ok(p) = value.parse::<usize>() {
                    self.page = p.max(1);
                }
                continue;
            }
            if let Some(idx) = self.def_index(key) {
                let kind = self.defs[idx].kind;
                if !is_unset(kind, &value) && accepts(kind, &value) {
                    self.values[idx] = Some(value);
                }
            }
        }
        self.bump_version();
    }

    /// Handle a browser back/forward navigation: re-decode the URL and
    /// request a re-query, with no further history action.
    pub fn apply_navigation(&mut self, query: &str) {
        self.decode(query);
        self.pending_history = HISTORY_NONE;
        self.needs_requery = true;
    }

    // ── Pending-action drains ──────────────────────────────────────────

    /// The history action the embedder should perform now: "replace",
    /// "push", or "" when none is pending. Draining resets it.
    pub fn take_history_action(&mut self) -> String {
        let action = match self.pending_history {
            HISTORY_REPLACE => "replace",
            HISTORY_PUSH => "push",
            _ => "",
        };
        self.pending_history = HISTORY_NONE;
        action.to_string()
    }

    /// Whether the remote search should be re-issued for the current state.
    /// Draining resets the flag.
    pub fn take_needs_requery(&mut self) -> bool {
        let due = self.needs_requery;
        self.needs_requery = false;
        due
    }

    // ── Reset ──────────────────────────────────────────────────────────

    /// Reset all state to defaults.
    pub fn reset(&mut self) {
        for v in &mut self.values {
            *v = None;
        }
        self.page = 1;
        self.pending_history = HISTORY_NONE;
        self.needs_requery = false;
        self.bump_version();
    }
}

impl Default for QueryStateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ── Private implementation ─────────────────────────────────────────────────

impl QueryStateEngine {
    fn register(&mut self, key: &'static str, kind: FilterKind) {
        self.defs.push(FilterDef { key, kind });
    }

    fn def_index(&self, key: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.key == key)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_encode() {
        let mut q = QueryStateEngine::new();
        q.set_filter("city_id", "5");
        q.set_filter("min_price", "100000");
        q.set_filter("furnished", "true");
        assert_eq!(
            q.query_string(),
            "city_id=5&min_price=100000&furnished=true"
        );
        assert_eq!(q.filter("city_id"), "5");
        assert_eq!(q.active_filter_count(), 3);
    }

    #[test]
    fn test_unset_values_never_encode() {
        let mut q = QueryStateEngine::new();
        q.set_filter("service", "all");
        q.set_filter("furnished", "false");
        q.set_filter("keyword", "");
        assert_eq!(q.query_string(), "");
        assert_eq!(q.active_filter_count(), 0);

        // Setting then unsetting removes the key again.
        q.set_filter("service", "rental");
        q.set_filter("service", "all");
        assert_eq!(q.query_string(), "");
    }

    #[test]
    fn test_rejected_values_ignored() {
        let mut q = QueryStateEngine::new();
        q.set_filter("min_price", "cheap");
        q.set_filter("furnished", "yes");
        q.set_filter("unknown_key", "1");
        assert_eq!(q.query_string(), "");
    }

    #[test]
    fn test_encoding_is_stable() {
        let mut q = QueryStateEngine::new();
        // Registration order wins regardless of set order.
        q.set_filter("max_price", "900");
        q.set_filter("service", "rental");
        let encoded = q.query_string();
        assert_eq!(encoded, "service=rental&max_price=900");
        assert_eq!(q.query_string(), encoded);
    }

    #[test]
    fn test_decode_encode_canonicalizes() {
        let mut q = QueryStateEngine::new();
        q.decode("?max_price=900&bogus=1&service=rental&furnished=false");
        // Canonical form: registration order, unset and unknown keys gone.
        assert_eq!(q.query_string(), "service=rental&max_price=900");

        // Idempotent thereafter.
        let canonical = q.query_string();
        q.decode(&canonical);
        assert_eq!(q.query_string(), canonical);
    }

    #[test]
    fn test_keyword_roundtrip_with_encoding() {
        let mut q = QueryStateEngine::new();
        q.set_filter("keyword", "sea view");
        assert_eq!(q.query_string(), "keyword=sea%20view");
        q.decode("keyword=sea%20view");
        assert_eq!(q.filter("keyword"), "sea view");
    }

    #[test]
    fn test_clear_all_resets_to_bare_path() {
        let mut q = QueryStateEngine::new();
        q.decode("city_id=5&min_price=100000&page=3");
        assert_eq!(q.active_filter_count(), 2);
        q.clear_all();
        assert_eq!(q.query_string(), "");
        assert_eq!(q.page(), 1);
        assert_eq!(q.active_filter_count(), 0);
    }

    #[test]
    fn test_filter_changes_replace_history_and_requery() {
        let mut q = QueryStateEngine::new();
        q.set_filter("city_id", "5");
        assert_eq!(q.take_history_action(), "replace");
        assert!(q.take_needs_requery());
        // Drains are one-shot.
        assert_eq!(q.take_history_action(), "");
        assert!(!q.take_needs_requery());
        // A no-op set pends nothing.
        q.set_filter("city_id", "5");
        assert_eq!(q.take_history_action(), "");
    }

    #[test]
    fn test_pagination_pushes_history() {
        let mut q = QueryStateEngine::new();
        q.set_filter("city_id", "5");
        let _ = q.take_history_action();
        q.set_page(2);
        assert_eq!(q.take_history_action(), "push");
        assert_eq!(q.query_string(), "city_id=5&page=2");

        // Filter change folds back to page 1.
        q.set_filter("min_area", "50");
        assert_eq!(q.page(), 1);
        assert!(!q.query_string().contains("page="));
    }

    #[test]
    fn test_popstate_requeries_without_history_action() {
        let mut q = QueryStateEngine::new();
        q.set_filter("city_id", "5");
        let _ = q.take_history_action();
        let _ = q.take_needs_requery();

        q.apply_navigation("?city_id=9&page=2");
        assert_eq!(q.filter("city_id"), "9");
        assert_eq!(q.page(), 2);
        assert!(q.take_needs_requery());
        assert_eq!(q.take_history_action(), "");
    }

    #[test]
    fn test_filters_json() {
        let mut q = QueryStateEngine::new();
        q.set_filter("city_id", "5");
        q.set_filter("pets_allowed", "true");
        assert_eq!(q.filters_json(), r#"{"city_id":"5","pets_allowed":"true"}"#);
    }
}
