//! Filter-value classification and query-string component encoding.
//!
//! Every search filter the UI exposes is one of a small set of kinds. The
//! kind decides which values count as "unset" (and therefore never appear in
//! the encoded URL) and which values are accepted at all. The query engine
//! registers its keys with a kind; this module owns the rules so the engine
//! and any server-side validation agree.

use crate::parse_non_negative;

/// The value class of a registered filter key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// One of a closed choice set, with `"all"` as the unset sentinel
    /// (service type, property type, location ids).
    Choice,
    /// A non-negative number carried as a string (prices, areas, counts).
    Numeric,
    /// A boolean amenity toggle; only the literals `"true"`/`"false"` are
    /// accepted and `"false"` means unset.
    Flag,
    /// Free text (keyword search).
    Text,
}

/// Whether a value counts as "unset" for its kind. Unset values are removed
/// from the filter state and never encoded into the URL.
pub fn is_unset(kind: FilterKind, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match kind {
        FilterKind::Choice => value == "all",
        FilterKind::Flag => value == "false",
        FilterKind::Numeric | FilterKind::Text => false,
    }
}

/// Whether a (non-unset) value is acceptable for its kind. Rejected values
/// are ignored by the query engine rather than stored.
pub fn accepts(kind: FilterKind, value: &str) -> bool {
    match kind {
        FilterKind::Numeric => parse_non_negative(value).is_some(),
        FilterKind::Flag => value == "true" || value == "false",
        FilterKind::Choice | FilterKind::Text => !value.is_empty(),
    }
}

// ── Query-string component encoding ─────────────────────────────────────────
//
// Only the characters that break query-string structure are escaped. Values
// here are ids, numbers, bool literals, and short keywords; full RFC 3986
// coverage is not needed.

/// Percent-encode a query-string component. Structural characters and
/// non-ASCII bytes are escaped; everything else passes through.
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b' ' | b'&' | b'=' | b'%' | b'?' | b'#' | b'+' => {
                out.push_str(&format!("%{:02X}", b));
            }
            b if b.is_ascii_graphic() => out.push(b as char),
            b => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Decode a percent-encoded query-string component. `+` decodes to a space
/// (forms encode spaces that way); malformed escapes pass through verbatim.
pub fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match hex_pair(bytes.get(i + 1).copied(), bytes.get(i + 2).copied()) {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: Option<u8>, lo: Option<u8>) -> Option<u8> {
    let hi = (hi? as char).to_digit(16)?;
    let lo = (lo? as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

// ============================================
// Tests
// ============================================
