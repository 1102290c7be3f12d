//! # propsearch-shared
//!
//! Domain logic shared between the WASM client engines (the `model` crate)
//! and whatever embeds them. This crate is the single source of truth for
//! constants and validation rules that the Rust and JS sides of the boundary
//! must agree on.
//!
//! ## What belongs here
//!
//! - Constants both sides must agree on (debounce window, asset retry
//!   schedule, payload version)
//! - Filter-value classification and query-string component encoding
//! - Backend response-envelope normalization
//! - Validation functions (input sanitization, range checks)
//!
//! ## What does NOT belong here
//!
//! - `#[wasm_bindgen]` attributes (those live in the model crate)
//! - I/O, networking, or platform-specific code

pub mod envelope;
pub mod filters;

// ============================================
// Constants
//
// Change these in one place; the engines and the
// JS shell both pick them up.
// ============================================

/// How long text-driven input must be stable before a request is issued.
pub const DEBOUNCE_WINDOW_MS: f64 = 300.0;

/// Autocomplete terms shorter than this never produce a request.
pub const MIN_AUTOCOMPLETE_LEN: usize = 2;

/// An asset load still pending after this long counts as failed.
pub const ASSET_TIMEOUT_MS: f64 = 10_000.0;

/// Delay before a failed asset load is retried.
pub const ASSET_RETRY_DELAY_MS: f64 = 2_000.0;

/// Failed asset loads are retried at most this many times before the
/// fallback asset is substituted permanently.
pub const ASSET_MAX_RETRIES: u32 = 2;

/// Default result-page size for listing queries.
pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Version tag written into persisted collection payloads. Payloads with a
/// different version decode as empty rather than being migrated.
pub const STORAGE_PAYLOAD_VERSION: u32 = 1;

// ============================================
// Validation Helpers
//
// Used by the engines when classifying filter values
// and by the embedder when naming collections. Keeping
// them here ensures both sides reject the same inputs.
// ============================================

/// Validate a collection/storage identifier: non-empty, within length limit,
/// ASCII alphanumeric with common separators.
pub fn validate_identifier(s: &str, max_len: usize) -> bool {
    !s.is_empty()
        && s.len() <= max_len
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// Validate a non-negative finite number (prices, areas, counts).
pub fn validate_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Parse a string as a non-negative number, if it is one.
pub fn parse_non_negative(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| validate_non_negative(*v))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("favorites", 32));
        assert!(validate_identifier("compare.v2", 32));
        assert!(!validate_identifier("", 32));
        assert!(!validate_identifier(&"a".repeat(33), 32));
        assert!(!validate_identifier("has spaces", 32));
    }

    #[test]
    fn test_parse_non_negative() {
        assert_eq!(parse_non_negative("100000"), Some(100000.0));
        assert_eq!(parse_non_negative(" 2.5 "), Some(2.5));
        assert_eq!(parse_non_negative("-1"), None);
        assert_eq!(parse_non_negative("cheap"), None);
        assert_eq!(parse_non_negative("NaN"), None);
    }
}
