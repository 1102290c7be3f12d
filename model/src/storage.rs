//! Persisted collection payload codec.
//!
//! The JS shell owns the actual localStorage get/set/remove calls; this
//! module owns what the stored string looks like and the fail-soft rules for
//! reading it back. A parse failure, a foreign payload version, or plain
//! garbage all decode to an empty collection — corrupt storage must never
//! propagate an error into the engines.
//!
//! Decode also re-establishes the collection invariants before the engine
//! sees the data: ids are deduplicated preserving first occurrence, and
//! metadata entries whose id is not a member are pruned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use propsearch_shared::STORAGE_PAYLOAD_VERSION;

/// The persisted shape of one collection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SavedCollection {
    #[serde(rename = "v")]
    pub version: u32,
    pub ids: Vec<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl SavedCollection {
    pub fn new(ids: Vec<String>, meta: Map<String, Value>) -> Self {
        SavedCollection {
            version: STORAGE_PAYLOAD_VERSION,
            ids,
            meta,
        }
    }

    fn empty() -> Self {
        SavedCollection {
            version: STORAGE_PAYLOAD_VERSION,
            ids: Vec::new(),
            meta: Map::new(),
        }
    }
}

/// Encode a collection for storage.
pub fn encode(saved: &SavedCollection) -> String {
    // Serialization of this shape cannot fail; fall back to an empty
    // payload all the same rather than panicking inside a save path.
    serde_json::to_string(saved).unwrap_or_else(|_| String::from("{\"v\":1,\"ids\":[]}"))
}

/// Decode a stored payload. Fail-soft: anything unusable becomes an empty
/// collection, with a diagnostic log and no error surfaced.
pub fn decode(raw: &str) -> SavedCollection {
    if raw.is_empty() {
        return SavedCollection::empty();
    }
    let mut saved: SavedCollection = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "stored collection payload did not parse, starting empty");
            return SavedCollection::empty();
        }
    };
    if saved.version != STORAGE_PAYLOAD_VERSION {
        warn!(
            version = saved.version,
            "stored collection payload has a foreign version, starting empty"
        );
        return SavedCollection::empty();
    }

    // Re-establish invariants: dedup ids, prune orphan metadata.
    let mut ids: Vec<String> = Vec::with_capacity(saved.ids.len());
    for id in saved.ids.drain(..) {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    saved.meta.retain(|key, _| ids.contains(key));
    saved.ids = ids;
    saved
}

// ============================================
// Tests
// ============================================
