//! MST utility functions

use sha2::{Digest, Sha256};
use tessera_common::RecordPath;

use crate::error::Result;

/// Calculate the layer of a key from its hash
///
/// Layer = number of leading zero 4-bit nibbles of SHA-256(key), giving an
/// expected fanout of 16. Higher layers sit closer to the root.
pub fn layer_for_key(key: &str) -> u32 {
    leading_zero_nibbles(&Sha256::digest(key.as_bytes()))
}

fn leading_zero_nibbles(hash: &[u8]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Validate an MST key (`collection/rkey`)
pub fn validate_key(key: &str) -> Result<()> {
    RecordPath::parse(key)?;
    Ok(())
}

/// Count shared prefix length in bytes
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_counting() {
        assert_eq!(leading_zero_nibbles(&[0xff, 0x00]), 0);
        assert_eq!(leading_zero_nibbles(&[0x0f, 0x00]), 1);
        assert_eq!(leading_zero_nibbles(&[0x00, 0x10]), 2);
        assert_eq!(leading_zero_nibbles(&[0x00, 0x01]), 3);
        assert_eq!(leading_zero_nibbles(&[0x00, 0x00, 0x80]), 4);
    }

    #[test]
    fn layer_is_deterministic() {
        let key = "com.example.record/3jqfcqzm3fo2j";
        assert_eq!(layer_for_key(key), layer_for_key(key));
        let hash = Sha256::digest(key.as_bytes());
        assert_eq!(layer_for_key(key), leading_zero_nibbles(&hash));
    }

    #[test]
    fn some_keys_reach_upper_layers() {
        // With p = 1/16 per layer, a few thousand keys always include some above zero
        let raised = (0..2000)
            .map(|i| format!("com.example.record/{:06}", i))
            .filter(|k| layer_for_key(k) > 0)
            .count();
        assert!(raised > 50 && raised < 250, "{raised}");
    }

    #[test]
    fn prefix_len_counts_bytes() {
        assert_eq!(common_prefix_len("abc/1", "abc/2"), 4);
        assert_eq!(common_prefix_len("", "abc"), 0);
        assert_eq!(common_prefix_len("abc", "abc"), 3);
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("com.example.post/abc").is_ok());
        assert!(validate_key("a/1").is_ok());
        assert!(validate_key("noslash").is_err());
        assert!(validate_key("a/b/c").is_err());
        assert!(validate_key("a/").is_err());
        assert!(validate_key("a/..").is_err());
    }
}
