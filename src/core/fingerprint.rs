// src/core/fingerprint.rs
// Stable 16-hex fingerprints for document ids and sub-call memo keys

use sha2::{Digest, Sha256};

const FINGERPRINT_LEN: usize = 16;

/// 16-hex-character prefix of sha256 over the input.
pub fn fingerprint(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..FINGERPRINT_LEN].to_string()
}

/// Fingerprint of a JSON value. serde_json orders object keys, so two
/// structurally equal values hash identically.
pub fn fingerprint_value(value: &serde_json::Value) -> String {
    fingerprint(&value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stable_and_short() {
        let a = fingerprint("SECRET-LONG-PROMPT-1234567890");
        let b = fingerprint("SECRET-LONG-PROMPT-1234567890");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[test]
    fn test_value_key_order_is_canonical() {
        let a = json!({"promptId": "x", "query": "q"});
        let b = json!({"query": "q", "promptId": "x"});
        assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
    }
}
