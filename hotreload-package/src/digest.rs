//! Integrity digest: MD5 over the raw package bytes.
//!
//! The digest covers the archive exactly as transferred, not the decoded
//! entries, so sender and receiver hash the same byte string. It detects
//! transmission and storage corruption; it is not a signature.

use md5::{Digest, Md5};

use hotreload_core::PackageDigest;

use crate::error::PackageError;

/// Digest `bytes` as 32 lowercase hex characters.
pub fn compute(bytes: &[u8]) -> PackageDigest {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    PackageDigest(hex::encode(hasher.finalize()))
}

/// Recompute the digest of `bytes` and compare it with `expected`.
///
/// Returns the computed digest on success so callers can log it.
pub fn verify(bytes: &[u8], expected: &str) -> Result<PackageDigest, PackageError> {
    let actual = compute(bytes);
    if actual.matches(expected) {
        Ok(actual)
    } else {
        Err(PackageError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(compute(b"").as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(compute(b"a").as_str(), "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn verify_accepts_uppercase_declaration() {
        let digest = verify(b"a", "0CC175B9C0F1B6A831C399E269772661").unwrap();
        assert_eq!(digest.as_str(), "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn verify_rejects_any_other_digest() {
        let payload = b"package bytes";
        for declared in ["deadbeef", "", "d41d8cd98f00b204e9800998ecf8427e"] {
            let err = verify(payload, declared).unwrap_err();
            match err {
                PackageError::DigestMismatch { expected, actual } => {
                    assert_eq!(expected, declared);
                    assert_eq!(actual, compute(payload).0);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn single_flipped_byte_changes_digest() {
        let mut bytes = b"hello world".to_vec();
        let before = compute(&bytes);
        bytes[0] ^= 0x01;
        assert_ne!(before, compute(&bytes));
    }
}
