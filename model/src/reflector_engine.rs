// ============================================================================
// REFLECTOR ENGINE — collection state projected into DOM patches
// ============================================================================
//
// One-way data flow: collection engine → reflector → DOM. The reflector
// never mutates collection state; it turns the current snapshot into a flat
// patch list the JS shell applies verbatim, the DOM analogue of the frame
// buffer contract the other engines use for charts.
//
// THE PATTERN:
//   - after draining collection events, JS calls
//     sync(collection.reflect_state_json())
//   - JS calls flush_patches(), then reads patch_op(i) / patch_target(i) /
//     patch_value(i) and applies each one
//   - the engine remembers what it already emitted, so reflecting the same
//     state twice produces no patches (idempotent) and indicator nodes are
//     never redundantly re-rendered
//   - content inserted later (carousels, lazy lists) is announced via
//     node_attached(item_id) from the embedder's MutationObserver callback;
//     the node immediately receives its correct reflected state on the next
//     flush
//
// PATCH OPS (must match the JS applier):
//   0 = add active class      target: item id      value: ""
//   1 = remove active class   target: item id      value: ""
//   2 = set badge text        target: "badge"      value: count
//   3 = show badge            target: "badge"      value: ""
//   4 = hide badge            target: "badge"      value: ""
//
// The badge show/hide pair is emitted only when the count crosses zero in
// either direction; the text patch on every count change.
//
// ASSET LOADING: listing images are watched with an explicit schedule — a
// load still pending after ASSET_TIMEOUT_MS counts as failed, failures are
// retried up to ASSET_MAX_RETRIES times with ASSET_RETRY_DELAY_MS between
// attempts, then the fallback asset is substituted permanently. The engine
// only keeps the clockwork; JS swaps the actual src attributes.
// ============================================================================

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;

use propsearch_shared::{ASSET_MAX_RETRIES, ASSET_RETRY_DELAY_MS, ASSET_TIMEOUT_MS};

// ── Patch ops ──────────────────────────────────────────────────────────────

const OP_ADD_ACTIVE: u8 = 0;
const OP_REMOVE_ACTIVE: u8 = 1;
const OP_SET_BADGE_TEXT: u8 = 2;
const OP_SHOW_BADGE: u8 = 3;
const OP_HIDE_BADGE: u8 = 4;

const BADGE_TARGET: &str = "badge";

#[derive(Clone, Debug)]
struct Patch {
    op: u8,
    target: String,
    value: String,
}

// ── Asset states ───────────────────────────────────────────────────────────

const ASSET_LOADING: u8 = 0;
const ASSET_LOADED: u8 = 1;
const ASSET_RETRY_WAIT: u8 = 2;
const ASSET_FALLBACK: u8 = 3;

#[derive(Clone, Debug)]
struct AssetEntry {
    status: u8,
    attempts: u32,
    /// Timeout deadline while loading; retry due-time while waiting.
    deadline: f64,
}

// ── ReflectorEngine ────────────────────────────────────────────────────────

#[wasm_bindgen]
pub struct ReflectorEngine {
    /// Desired membership, from the last sync() snapshot.
    active_ids: Vec<String>,
    count: usize,

    /// Item nodes currently present in the DOM, with the active flag each
    /// one last received.
    nodes: HashMap<String, bool>,
    /// Badge state as last emitted: (text, visible). None until first flush.
    badge: Option<(String, bool)>,

    patches: Vec<Patch>,
    assets: HashMap<String, AssetEntry>,
    data_version: u32,
}

#[wasm_bindgen]
impl ReflectorEngine {
    // ── Constructor ────────────────────────────────────────────────────

    #[wasm_bindgen(constructor)]
    pub fn new() -> ReflectorEngine {
        ReflectorEngine {
            active_ids: Vec::new(),
            count: 0,
            nodes: HashMap::new(),
            badge: None,
            patches: Vec::new(),
            assets: HashMap::new(),
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

    // ── State intake ───────────────────────────────────────────────────

    /// Ingest a collection snapshot (`{"ids": [...], "count": n}`).
    /// Fail-soft: garbage leaves the previous snapshot in place.
    pub fn sync(&mut self, state_json: &str) {
        let Ok(value) = serde_json::from_str::<Value>(state_json) else {
            debug!("reflector snapshot did not parse; keeping previous state");
            return;
        };
        let Some(ids) = value.get("ids").and_then(Value::as_array) else {
            debug!("reflector snapshot missing ids; keeping previous state");
            return;
        };
        self.active_ids = ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        self.count = value
            .get("count")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .unwrap_or(self.active_ids.len());
        self.bump_version();
    }

    // ── Node registry ──────────────────────────────────────────────────

    /// A DOM node for an item appeared (initial render or inserted later by
    /// a carousel/lazy list). It will receive its reflected state on the
    /// next flush.
    pub fn node_attached(&mut self, item_id: &str) {
        self.nodes.entry(item_id.to_string()).or_insert(false);
        self.bump_version();
    }

    /// The node left the DOM; stop tracking it.
    pub fn node_detached(&mut self, item_id: &str) {
        self.nodes.remove(item_id);
        self.bump_version();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Patch emission ─────────────────────────────────────────────────

    /// Diff the desired state against what each node last received and
    /// queue the minimal patch set. Flushing unchanged state queues nothing.
    /// Returns the number of patches waiting.
    pub fn flush_patches(&mut self) -> usize {
        self.patches.clear();

        let mut node_ids: Vec<String> = self.nodes.keys().cloned().collect();
        node_ids.sort(); // deterministic patch order
        for id in node_ids {
            let wanted = self.active_ids.iter().any(|a| a == &id);
            let applied = self.nodes.get(&id).copied().unwrap_or(false);
            if wanted != applied {
                self.patches.push(Patch {
                    op: if wanted { OP_ADD_ACTIVE } else { OP_REMOVE_ACTIVE },
                    target: id.clone(),
                    value: String::new(),
                });
                self.nodes.insert(id, wanted);
            }
        }

        let text = self.count.to_string();
        let visible = self.count > 0;
        let (old_text, old_visible) = match &self.badge {
            Some((t, v)) => (Some(t.clone()), Some(*v)),
            None => (None, None),
        };
        if old_text.as_deref() != Some(&text) {
            self.patches.push(Patch {
                op: OP_SET_BADGE_TEXT,
                target: BADGE_TARGET.to_string(),
                value: text.clone(),
            });
        }
        if old_visible != Some(visible) {
            self.patches.push(Patch {
                op: if visible { OP_SHOW_BADGE } else { OP_HIDE_BADGE },
                target: BADGE_TARGET.to_string(),
                value: String::new(),
            });
        }
        self.badge = Some((text, visible));

        if !self.patches.is_empty() {
            self.bump_version();
        }
        self.patches.len()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn patch_op(&self, index: usize) -> u8 {
        self.patches.get(index).map(|p| p.op).unwrap_or(u8::MAX)
    }

    pub fn patch_target(&self, index: usize) -> String {
        self.patches
            .get(index)
            .map(|p| p.target.clone())
            .unwrap_or_default()
    }

    pub fn patch_value(&self, index: usize) -> String {
        self.patches
            .get(index)
            .map(|p| p.value.clone())
            .unwrap_or_default()
    }

    // ── Asset schedule ─────────────────────────────────────────────────

    /// Start watching an asset load (listing image). Re-watching a key that
    /// already fell back permanently is a no-op.
    pub fn asset_watch(&mut self, key: &str, now_ms: f64) {
        if matches!(self.assets.get(key), Some(e) if e.status == ASSET_FALLBACK) {
            return;
        }
        self.assets.insert(
            key.to_string(),
            AssetEntry {
                status: ASSET_LOADING,
                attempts: 0,
                deadline: now_ms + ASSET_TIMEOUT_MS,
            },
        );
        self.bump_version();
    }

    /// The asset finished loading in time.
    pub fn asset_loaded(&mut self, key: &str) {
        if let Some(entry) = self.assets.get_mut(key) {
            entry.status = ASSET_LOADED;
            self.bump_version();
        }
    }

    /// The asset load errored. Schedules a delayed retry while attempts
    /// remain, otherwise falls back permanently. Returns what happens next:
    /// "retry-wait" (a retry will come due), "fallback" (substitute the
    /// fallback asset now), or "" for an unknown/already-settled key.
    pub fn asset_failed(&mut self, key: &str, now_ms: f64) -> String {
        let Some(entry) = self.assets.get_mut(key) else {
            return String::new();
        };
        if entry.status != ASSET_LOADING {
            return String::new();
        }
        let outcome = if entry.attempts < ASSET_MAX_RETRIES {
            entry.status = ASSET_RETRY_WAIT;
            entry.deadline = now_ms + ASSET_RETRY_DELAY_MS;
            "retry-wait"
        } else {
            entry.status = ASSET_FALLBACK;
            debug!(key, "asset exhausted retries, substituting fallback");
            "fallback"
        };
        self.bump_version();
        outcome.to_string()
    }

    /// Drain the actions that are due: `[{"key": ..., "action": "retry" |
    /// "fallback"}]`. Loads that exceeded the timeout are treated as
    /// failures here; due retries move back to loading with a fresh timeout
    /// and an incremented attempt count.
    pub fn asset_actions_json(&mut self, now_ms: f64) -> String {
        let mut actions: Vec<(String, &'static str)> = Vec::new();
        let mut keys: Vec<String> = self.assets.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let Some(entry) = self.assets.get_mut(&key) else {
                continue;
            };
            match entry.status {
                ASSET_LOADING if now_ms >= entry.deadline => {
                    // Timed out: same path as an explicit failure.
                    if entry.attempts < ASSET_MAX_RETRIES {
                        entry.status = ASSET_RETRY_WAIT;
                        entry.deadline = now_ms + ASSET_RETRY_DELAY_MS;
                    } else {
                        entry.status = ASSET_FALLBACK;
                        actions.push((key.clone(), "fallback"));
                    }
                }
                ASSET_RETRY_WAIT if now_ms >= entry.deadline => {
                    entry.attempts += 1;
                    entry.status = ASSET_LOADING;
                    entry.deadline = now_ms + ASSET_TIMEOUT_MS;
                    actions.push((key.clone(), "retry"));
                }
                _ => {}
            }
        }
        if !actions.is_empty() {
            self.bump_version();
        }
        let entries: Vec<Value> = actions
            .into_iter()
            .map(|(key, action)| serde_json::json!({ "key": key, "action": action }))
            .collect();
        Value::Array(entries).to_string()
    }

    /// Inspect an asset: "loading", "loaded", "retry-wait", "fallback", or
    /// "" when unknown.
    pub fn asset_state(&self, key: &str) -> String {
        self.assets
            .get(key)
            .map(|e| match e.status {
                ASSET_LOADING => "loading",
                ASSET_LOADED => "loaded",
                ASSET_RETRY_WAIT => "retry-wait",
                ASSET_FALLBACK => "fallback",
                _ => "",
            })
            .unwrap_or("")
            .to_string()
    }

    // ── Reset ──────────────────────────────────────────────────────────

    /// Reset all state to defaults.
    pub fn reset(&mut self) {
        self.active_ids.clear();
        self.count = 0;
        self.nodes.clear();
        self.badge = None;
        self.patches.clear();
        self.assets.clear();
        self.bump_version();
    }
}

impl Default for ReflectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn patches(r: &ReflectorEngine) -> Vec<(u8, String, String)> {
        (0..r.patch_count())
            .map(|i| (r.patch_op(i), r.patch_target(i), r.patch_value(i)))
            .collect()
    }

    #[test]
    fn test_reflects_membership_onto_nodes() {
        let mut r = ReflectorEngine::new();
        r.node_attached("1");
        r.node_attached("2");
        r.sync(r#"{"ids": ["1"], "count": 1}"#);
        r.flush_patches();
        let p = patches(&r);
        // Node "1" activates, node "2" stays untouched (never was active),
        // badge text + show.
        assert!(p.contains(&(OP_ADD_ACTIVE, "1".into(), "".into())));
        assert!(!p.iter().any(|(_, t, _)| t == "2"));
        assert!(p.contains(&(OP_SET_BADGE_TEXT, "badge".into(), "1".into())));
        assert!(p.contains(&(OP_SHOW_BADGE, "badge".into(), "".into())));
    }

    #[test]
    fn test_idempotent_flush() {
        let mut r = ReflectorEngine::new();
        r.node_attached("1");
        r.sync(r#"{"ids": ["1"], "count": 1}"#);
        assert!(r.flush_patches() > 0);
        // Same state again: nothing to do.
        assert_eq!(r.flush_patches(), 0);
        r.sync(r#"{"ids": ["1"], "count": 1}"#);
        assert_eq!(r.flush_patches(), 0);
    }

    #[test]
    fn test_badge_zero_crossing() {
        let mut r = ReflectorEngine::new();
        r.sync(r#"{"ids": [], "count": 0}"#);
        r.flush_patches();
        let p = patches(&r);
        // First flush establishes text and hidden state.
        assert!(p.contains(&(OP_SET_BADGE_TEXT, "badge".into(), "0".into())));
        assert!(p.contains(&(OP_HIDE_BADGE, "badge".into(), "".into())));

        r.sync(r#"{"ids": ["1"], "count": 1}"#);
        r.flush_patches();
        assert!(patches(&r).contains(&(OP_SHOW_BADGE, "badge".into(), "".into())));

        // 1 → 2: text changes, no show/hide (no zero crossing).
        r.sync(r#"{"ids": ["1", "2"], "count": 2}"#);
        r.flush_patches();
        let p = patches(&r);
        assert!(p.contains(&(OP_SET_BADGE_TEXT, "badge".into(), "2".into())));
        assert!(!p.iter().any(|(op, _, _)| *op == OP_SHOW_BADGE || *op == OP_HIDE_BADGE));

        // 2 → 0: hide again.
        r.sync(r#"{"ids": [], "count": 0}"#);
        r.flush_patches();
        assert!(patches(&r).contains(&(OP_HIDE_BADGE, "badge".into(), "".into())));
    }

    #[test]
    fn test_late_attached_node_gets_state() {
        let mut r = ReflectorEngine::new();
        r.sync(r#"{"ids": ["7"], "count": 1}"#);
        r.flush_patches();

        // A carousel inserts the card for item 7 afterwards.
        r.node_attached("7");
        r.flush_patches();
        assert!(patches(&r).contains(&(OP_ADD_ACTIVE, "7".into(), "".into())));

        r.node_detached("7");
        assert_eq!(r.node_count(), 0);
    }

    #[test]
    fn test_deactivation_patch() {
        let mut r = ReflectorEngine::new();
        r.node_attached("7");
        r.sync(r#"{"ids": ["7"], "count": 1}"#);
        r.flush_patches();
        r.sync(r#"{"ids": [], "count": 0}"#);
        r.flush_patches();
        assert!(patches(&r).contains(&(OP_REMOVE_ACTIVE, "7".into(), "".into())));
    }

    #[test]
    fn test_sync_garbage_keeps_state() {
        let mut r = ReflectorEngine::new();
        r.sync(r#"{"ids": ["1"], "count": 1}"#);
        r.sync("garbage");
        r.sync(r#"{"nope": true}"#);
        r.node_attached("1");
        r.flush_patches();
        assert!(patches(&r).contains(&(OP_ADD_ACTIVE, "1".into(), "".into())));
    }

    #[test]
    fn test_asset_happy_path() {
        let mut r = ReflectorEngine::new();
        r.asset_watch("img-1", 0.0);
        assert_eq!(r.asset_state("img-1"), "loading");
        r.asset_loaded("img-1");
        assert_eq!(r.asset_state("img-1"), "loaded");
        assert_eq!(r.asset_actions_json(60_000.0), "[]");
    }

    #[test]
    fn test_asset_retry_then_fallback() {
        let mut r = ReflectorEngine::new();
        r.asset_watch("img-1", 0.0);

        // First failure: retry after the backoff delay.
        assert_eq!(r.asset_failed("img-1", 1_000.0), "retry-wait");
        assert_eq!(r.asset_state("img-1"), "retry-wait");
        assert_eq!(r.asset_actions_json(2_000.0), "[]"); // not due yet
        assert_eq!(
            r.asset_actions_json(3_000.0),
            r#"[{"action":"retry","key":"img-1"}]"#
        );
        assert_eq!(r.asset_state("img-1"), "loading");

        // Second failure, second retry.
        assert_eq!(r.asset_failed("img-1", 4_000.0), "retry-wait");
        assert_eq!(
            r.asset_actions_json(6_000.0),
            r#"[{"action":"retry","key":"img-1"}]"#
        );

        // Third failure exhausts the retry budget: permanent fallback.
        assert_eq!(r.asset_failed("img-1", 7_000.0), "fallback");
        assert_eq!(r.asset_state("img-1"), "fallback");

        // Re-watching a fallen-back asset is a no-op.
        r.asset_watch("img-1", 8_000.0);
        assert_eq!(r.asset_state("img-1"), "fallback");
    }

    #[test]
    fn test_asset_timeout_counts_as_failure() {
        let mut r = ReflectorEngine::new();
        r.asset_watch("slow", 0.0);
        // Nothing before the timeout.
        assert_eq!(r.asset_actions_json(9_999.0), "[]");
        assert_eq!(r.asset_state("slow"), "loading");
        // Past the timeout: enters retry-wait, retry due after the delay.
        assert_eq!(r.asset_actions_json(10_000.0), "[]");
        assert_eq!(r.asset_state("slow"), "retry-wait");
        assert_eq!(
            r.asset_actions_json(12_000.0),
            r#"[{"action":"retry","key":"slow"}]"#
        );
    }

    #[test]
    fn test_asset_timeout_after_exhausted_retries_falls_back() {
        let mut r = ReflectorEngine::new();
        r.asset_watch("img", 0.0);
        r.asset_failed("img", 100.0); // attempt 0 failed → wait
        let _ = r.asset_actions_json(2_100.0); // retry 1 → loading
        r.asset_failed("img", 2_200.0); // attempt 1 failed → wait
        let _ = r.asset_actions_json(4_200.0); // retry 2 → loading
        // Retry 2 also hangs; the timeout path must fall back, not retry.
        assert_eq!(
            r.asset_actions_json(14_200.0),
            r#"[{"action":"fallback","key":"img"}]"#
        );
        assert_eq!(r.asset_state("img"), "fallback");
    }
}
