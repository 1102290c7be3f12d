//! # propsearch-model
//!
//! The WASM client engines for the propsearch property-search front end.
//! One engine per concern; each engine owns all of its state and exposes a
//! narrow `#[wasm_bindgen]` surface. The JS shell performs the actual I/O —
//! localStorage writes, fetches, History API calls, DOM patches — and feeds
//! the outcomes back into the engines.
//!
//! Engines never read a clock; time arrives as `now_ms` arguments, so every
//! timing behavior (debounce, asset retry schedule) is deterministic under
//! test.

pub mod collection_engine;
pub mod query_engine;
pub mod reflector_engine;
pub mod remote_engine;
pub mod storage;

pub use collection_engine::CollectionEngine;
pub use query_engine::QueryStateEngine;
pub use reflector_engine::ReflectorEngine;
pub use remote_engine::RemoteEngine;
