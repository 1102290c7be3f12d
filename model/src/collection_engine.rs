// ============================================================================
// COLLECTION ENGINE — bounded, deduplicated listing collections
// ============================================================================
//
// One instance per user-facing collection (favorites, comparison set). The
// engine owns the ordered id list, the per-id display-metadata cache, and the
// persistence/change signals; the JS shell owns localStorage and the DOM.
//
// THE PATTERN:
//   - embedder constructs `new CollectionEngine("favorites", 0)` explicitly
//     (no module-level singletons; `max_size = 0` means unbounded)
//   - on load, JS reads localStorage[engine.storage_key()] and calls
//     hydrate(raw) — garbage in storage hydrates to an empty collection
//   - user clicks call add/remove/toggle; duplicate and overflow are named
//     outcomes ("duplicate"/"full"), not errors — the caller branches and
//     shows an inline notice
//   - after any successful mutation JS drains take_persist_payload() and
//     writes it back to localStorage; a throwing write is reported via
//     note_persist_failure() and the session continues on memory alone
//   - reflector instances consume the drainable change-event queue; the
//     engine never touches the DOM
//
// CLEARING is destructive and therefore two-phase, like the router template's
// guard protocol: request_clear() hands out a single-use token, the host UI
// renders its own confirmation however it likes, then confirm_clear(token)
// performs the mutation (or cancel_clear(token) abandons it). No blocking
// dialog anywhere.
//
// REMOTE RECONCILIATION: for server-tracked collections the remote answer is
// authoritative. reconcile_membership() forces local membership to match a
// settled toggle; forcing an insert into a full collection evicts the oldest
// entry.
// ============================================================================

use serde_json::{json, Map, Value};
use tracing::warn;
use wasm_bindgen::prelude::*;

use crate::storage::{self, SavedCollection};

// ── Change events ──────────────────────────────────────────────────────────

/// Event kind codes, also exposed as strings via event_kind().
const KIND_ADDED: u8 = 0;
const KIND_REMOVED: u8 = 1;
const KIND_CLEARED: u8 = 2;
const KIND_DUPLICATE: u8 = 3;
const KIND_FULL: u8 = 4;
const KIND_EVICTED: u8 = 5;

#[derive(Clone, Debug)]
struct ChangeEvent {
    kind: u8,
    id: String,
    /// Collection size after the event.
    new_count: usize,
}

fn kind_str(kind: u8) -> &'static str {
    match kind {
        KIND_ADDED => "added",
        KIND_REMOVED => "removed",
        KIND_CLEARED => "cleared",
        KIND_DUPLICATE => "duplicate",
        KIND_FULL => "full",
        KIND_EVICTED => "evicted",
        _ => "",
    }
}

// ── CollectionEngine ───────────────────────────────────────────────────────

#[wasm_bindgen]
pub struct CollectionEngine {
    name: String,
    max_size: usize, // 0 = unbounded
    ids: Vec<String>,
    meta: Map<String, Value>,
    events: Vec<ChangeEvent>,
    pending_persist: bool,
    persist_failures: u32,
    clear_token: Option<u32>,
    next_token: u32,
    data_version: u32,
}

#[wasm_bindgen]
impl CollectionEngine {
    // ── Constructor ────────────────────────────────────────────────────

    #[wasm_bindgen(constructor)]
    pub fn new(name: &str, max_size: usize) -> CollectionEngine {
        CollectionEngine {
            name: name.to_string(),
            max_size,
            ids: Vec::new(),
            meta: Map::new(),
            events: Vec::new(),
            pending_persist: false,
            persist_failures: 0,
            clear_token: None,
            next_token: 1,
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

    // ── Identity ───────────────────────────────────────────────────────

    /// The localStorage key this collection persists under. Each collection
    /// owns a disjoint key; engines never share one.
    pub fn storage_key(&self) -> String {
        format!("propsearch.collection.{}", self.name)
    }

    #[wasm_bindgen(getter)]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // ── Hydration ──────────────────────────────────────────────────────

    /// Rehydrate from a persisted payload. Fail-soft: corrupt or foreign
    /// payloads hydrate to an empty collection. A payload larger than the
    /// bound (the bound shrank since it was written) is truncated.
    pub fn hydrate(&mut self, raw: &str) {
        let SavedCollection { mut ids, mut meta, .. } = storage::decode(raw);
        if self.max_size > 0 && ids.len() > self.max_size {
            ids.truncate(self.max_size);
            meta.retain(|key, _| ids.contains(key));
        }
        self.ids = ids;
        self.meta = meta;
        self.bump_version();
    }

    // ── Mutations ──────────────────────────────────────────────────────

    /// Add an id with optional display metadata (a JSON object, or "").
    /// Returns "added", "duplicate", or "full" — the latter two are expected
    /// user-triggered outcomes the caller surfaces as an inline notice.
    pub fn add(&mut self, id: &str, meta_json: &str) -> String {
        if self.ids.iter().any(|i| i == id) {
            self.push_event(KIND_DUPLICATE, id);
            self.bump_version();
            return "duplicate".to_string();
        }
        if self.is_full() {
            self.push_event(KIND_FULL, id);
            self.bump_version();
            return "full".to_string();
        }
        self.insert(id, meta_json);
        self.push_event(KIND_ADDED, id);
        self.mark_mutated();
        "added".to_string()
    }

    /// Remove an id and its cached metadata. False if absent.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|i| i != id);
        if self.ids.len() == before {
            return false;
        }
        self.meta.remove(id);
        self.push_event(KIND_REMOVED, id);
        self.mark_mutated();
        true
    }

    /// Remove if present, else add (subject to the bound).
    /// Returns "added", "removed", or "full".
    pub fn toggle(&mut self, id: &str, meta_json: &str) -> String {
        if self.ids.iter().any(|i| i == id) {
            self.remove(id);
            return "removed".to_string();
        }
        if self.is_full() {
            self.push_event(KIND_FULL, id);
            self.bump_version();
            return "full".to_string();
        }
        self.insert(id, meta_json);
        self.push_event(KIND_ADDED, id);
        self.mark_mutated();
        "added".to_string()
    }

    // ── Two-phase clear ────────────────────────────────────────────────

    /// Phase 1: request clearing the collection. Returns a single-use token
    /// the host UI must echo back through confirm_clear() once the user has
    /// confirmed. A newer request invalidates any outstanding token.
    pub fn request_clear(&mut self) -> u32 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.clear_token = Some(token);
        self.bump_version();
        token
    }

    /// Phase 2: perform the clear. Rejects stale or unknown tokens.
    pub fn confirm_clear(&mut self, token: u32) -> bool {
        if self.clear_token != Some(token) {
            return false;
        }
        self.clear_token = None;
        self.ids.clear();
        self.meta.clear();
        self.push_event(KIND_CLEARED, "");
        self.mark_mutated();
        true
    }

    /// Abandon a pending clear request.
    pub fn cancel_clear(&mut self, token: u32) {
        if self.clear_token == Some(token) {
            self.clear_token = None;
            self.bump_version();
        }
    }

    pub fn has_pending_clear(&self) -> bool {
        self.clear_token.is_some()
    }

    // ── Remote reconciliation ──────────────────────────────────────────

    /// Force local membership to match the server's answer after a settled
    /// membership toggle. The remote answer is authoritative: a forced
    /// insert into a full collection evicts the oldest entry.
    pub fn reconcile_membership(&mut self, id: &str, in_set: bool, meta_json: &str) {
        let present = self.ids.iter().any(|i| i == id);
        match (in_set, present) {
            (true, true) | (false, false) => {
                // Local guess already matched; refresh metadata if offered.
                if in_set {
                    if let Some(meta) = parse_meta(meta_json) {
                        self.meta.insert(id.to_string(), Value::Object(meta));
                        self.mark_mutated();
                    }
                }
            }
            (true, false) => {
                if self.is_full() {
                    let evicted = self.ids.remove(0);
                    self.meta.remove(&evicted);
                    self.push_event(KIND_EVICTED, &evicted);
                }
                self.insert(id, meta_json);
                self.push_event(KIND_ADDED, id);
                self.mark_mutated();
            }
            (false, true) => {
                self.remove(id);
            }
        }
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Get the id at an insertion-order index.
    pub fn id_at(&self, index: usize) -> String {
        self.ids.get(index).cloned().unwrap_or_default()
    }

    /// Cached display metadata for an id, as a JSON object string ("{}" when
    /// none was captured). A cache snapshot from insertion time — may be
    /// stale relative to the backend.
    pub fn meta_json(&self, id: &str) -> String {
        self.meta
            .get(id)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string())
    }

    /// The whole collection in insertion order: `[{"id": ..., "meta": ...}]`.
    pub fn list_json(&self) -> String {
        let entries: Vec<Value> = self
            .ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "meta": self.meta.get(id).cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        Value::Array(entries).to_string()
    }

    /// Snapshot for the reflector: `{"ids": [...], "count": n}`.
    pub fn reflect_state_json(&self) -> String {
        json!({ "ids": self.ids, "count": self.ids.len() }).to_string()
    }

    // ── Persistence signal ─────────────────────────────────────────────

    /// True when a mutation happened since the last payload was taken.
    pub fn needs_persist(&self) -> bool {
        self.pending_persist
    }

    /// The exact string to write under storage_key(), or "" when nothing is
    /// pending. Taking the payload clears the pending flag.
    pub fn take_persist_payload(&mut self) -> String {
        if !self.pending_persist {
            return String::new();
        }
        self.pending_persist = false;
        storage::encode(&SavedCollection::new(self.ids.clone(), self.meta.clone()))
    }

    /// Report that the storage write threw (quota, disabled storage). The
    /// in-memory state remains the source of truth for the session; this is
    /// diagnostics only and is never surfaced to the user.
    pub fn note_persist_failure(&mut self) {
        self.persist_failures += 1;
        warn!(
            collection = %self.name,
            failures = self.persist_failures,
            "persist failed; continuing on in-memory state"
        );
    }

    pub fn persist_failures(&self) -> u32 {
        self.persist_failures
    }

    // ── Change events ──────────────────────────────────────────────────

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Event kind at index: "added", "removed", "cleared", "duplicate",
    /// "full", or "evicted".
    pub fn event_kind(&self, index: usize) -> String {
        self.events
            .get(index)
            .map(|e| kind_str(e.kind).to_string())
            .unwrap_or_default()
    }

    pub fn event_id(&self, index: usize) -> String {
        self.events.get(index).map(|e| e.id.clone()).unwrap_or_default()
    }

    pub fn event_new_count(&self, index: usize) -> usize {
        self.events.get(index).map(|e| e.new_count).unwrap_or(0)
    }

    /// Drop all queued events after the embedder has dispatched them.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    // ── Reset ──────────────────────────────────────────────────────────

    /// Reset all state to defaults (the bound and name are kept).
    pub fn reset(&mut self) {
        self.ids.clear();
        self.meta.clear();
        self.events.clear();
        self.pending_persist = false;
        self.persist_failures = 0;
        self.clear_token = None;
        self.bump_version();
    }
}

// ── Private implementation ─────────────────────────────────────────────────

impl CollectionEngine {
    fn is_full(&self) -> bool {
        self.max_size > 0 && self.ids.len() >= self.max_size
    }

    fn insert(&mut self, id: &str, meta_json: &str) {
        self.ids.push(id.to_string());
        if let Some(meta) = parse_meta(meta_json) {
            self.meta.insert(id.to_string(), Value::Object(meta));
        }
    }

    fn push_event(&mut self, kind: u8, id: &str) {
        self.events.push(ChangeEvent {
            kind,
            id: id.to_string(),
            new_count: self.ids.len(),
        });
    }

    fn mark_mutated(&mut self) {
        self.pending_persist = true;
        self.bump_version();
    }
}

/// Metadata must be a JSON object; anything else (including "") is treated
/// as "no metadata supplied".
fn parse_meta(meta_json: &str) -> Option<Map<String, Value>> {
    if meta_json.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(meta_json) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ============================================
// Tests
// ============================================
