//! Structural hashing of specs and statuses
//!
//! The sync engine compares the repository and cluster representations of an
//! entity by digest rather than field by field. The digest is computed over a
//! canonical JSON encoding: values are first converted to `serde_json::Value`,
//! whose object maps are key-sorted, so map insertion order never affects the
//! result. Sequences keep their order.
//!
//! This is an equality heuristic, not a cryptographic guarantee. The digest is
//! truncated to 64 bits and a collision would hide a real difference until the
//! spec changes again. That risk is accepted.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Compute the structural hash of any serializable value as 16 hex chars.
///
/// Fails with `Error::Serialization` when the value cannot be represented as
/// JSON (e.g. a map with non-string keys or a non-finite float).
pub fn structural_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let canonical = serde_json::to_value(value)
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| Error::serialization(format!("failed to encode for hashing: {e}")))?;
    Ok(hex_prefix(&Sha256::digest(&canonical)))
}

/// Hash a value with entity-kind context on failure
pub fn structural_hash_for<T: Serialize + ?Sized>(kind: &str, value: &T) -> Result<String, Error> {
    structural_hash(value).map_err(|e| match e {
        Error::Serialization { message, .. } => Error::serialization_for_kind(kind, message),
        other => other,
    })
}

fn hex_prefix(digest: &[u8]) -> String {
    digest
        .iter()
        .take(8)
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;

    #[derive(Serialize)]
    struct Params {
        name: String,
        values: HashMap<String, String>,
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let hash = structural_hash(&"hello").unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn map_insertion_order_does_not_matter() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("k{i}"), i.to_string());
        }
        for i in (0..32).rev() {
            b.insert(format!("k{i}"), i.to_string());
        }
        let pa = Params {
            name: "x".into(),
            values: a,
        };
        let pb = Params {
            name: "x".into(),
            values: b,
        };
        assert_eq!(structural_hash(&pa).unwrap(), structural_hash(&pb).unwrap());
    }

    #[test]
    fn different_values_produce_different_hashes() {
        let a = BTreeMap::from([("lr".to_string(), "0.1".to_string())]);
        let b = BTreeMap::from([("lr".to_string(), "0.2".to_string())]);
        assert_ne!(structural_hash(&a).unwrap(), structural_hash(&b).unwrap());
    }

    #[test]
    fn sequence_order_matters() {
        assert_ne!(
            structural_hash(&vec!["a", "b"]).unwrap(),
            structural_hash(&vec!["b", "a"]).unwrap()
        );
    }

    #[test]
    fn unencodable_value_is_a_serialization_error() {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = structural_hash_for("ModelTraining", &bad).unwrap_err();
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("ModelTraining")),
            other => panic!("Expected Serialization, got {other:?}"),
        }
    }
}
