//! Canonical serialization for fingerprints.
//!
//! ## Determinism
//!
//! - Struct fields serialize in declaration order
//! - Vectors serialize in index order
//! - Every persisted map is a BTreeMap, so keys serialize sorted
//!
//! Same value → same bytes → same fingerprint, across runs and processes.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// xxh64 of the canonical bytes of `value`.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&to_canonical_bytes(value)?, 0))
}

/// [`canonical_hash`] as 16 lowercase hex digits.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn test_determinism() {
        let mut a = BTreeMap::new();
        a.insert("z", 1);
        a.insert("a", 2);
        let mut b = BTreeMap::new();
        b.insert("a", 2);
        b.insert("z", 1);

        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
        assert_eq!(to_canonical_bytes(&a).unwrap(), br#"{"a":2,"z":1}"#.to_vec());
    }

    #[test]
    fn test_hex_width() {
        assert_eq!(canonical_hash_hex(&0u8).unwrap().len(), 16);
    }

    #[test]
    fn test_non_string_keys_are_an_error() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(to_canonical_bytes(&map).is_err());
    }
}
