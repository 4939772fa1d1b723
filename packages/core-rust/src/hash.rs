//! Deterministic fingerprints for cache-key derivation.
//!
//! A fingerprint is the hex-encoded SHA-256 of a value's JSON encoding,
//! truncated to [`FINGERPRINT_LEN`] characters. Maps are `BTreeMap`-backed,
//! so equal values always encode to the same bytes regardless of the order
//! in which their fields were inserted.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters (128 bits).
pub const FINGERPRINT_LEN: usize = 32;

/// Computes the fingerprint of any serializable value.
///
/// Values that fail to serialize hash as the empty byte string.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use strata_core::hash::fingerprint;
///
/// let mut a = BTreeMap::new();
/// a.insert("id", 1);
/// a.insert("org", 2);
/// let mut b = BTreeMap::new();
/// b.insert("org", 2);
/// b.insert("id", 1);
/// assert_eq!(fingerprint(&a), fingerprint(&b));
/// ```
#[must_use]
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}
