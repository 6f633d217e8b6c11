//! Stable keys for persisted root calls.

use sha2::{Digest, Sha256};

/// Compute the storage key for a root call.
///
/// A call without an argument hashes differently from one with an empty
/// argument.
pub fn compute_root_call_key(name: &str, arg: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    update_prefixed(&mut hasher, name);
    match arg {
        Some(arg) => {
            hasher.update([1u8]);
            update_prefixed(&mut hasher, arg);
        }
        None => hasher.update([0u8]),
    }
    hex::encode(hasher.finalize())
}

/// Length-prefixed so that no two `(name, arg)` pairs feed the same bytes.
fn update_prefixed(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_root_call_key("username", Some("yuzhi"));
        let hash2 = compute_root_call_key("username", Some("yuzhi"));
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_missing_arg_differs_from_empty() {
        assert_ne!(compute_root_call_key("viewer", None), compute_root_call_key("viewer", Some("")));
    }

    #[test]
    fn test_hash_different_arg() {
        assert_ne!(compute_root_call_key("username", Some("joe")), compute_root_call_key("username", Some("yuzhi")));
    }

    #[test]
    fn test_hash_separator_in_parts_does_not_collide() {
        assert_ne!(compute_root_call_key("x\n1", None), compute_root_call_key("x", Some("\n0")));
        assert_ne!(compute_root_call_key("ab", Some("c")), compute_root_call_key("a", Some("bc")));
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_root_call_key("viewer", None);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
