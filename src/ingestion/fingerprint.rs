//! Fingerprint hashing.
//!
//! Elements are joined with `/` and wrapped in leading and trailing `/`
//! before hashing, so element count and order both affect the result.

use sha2::{Digest, Sha256};

const DELIMITER: &str = "/";

/// Hex encoded SHA-256 of the normalized element list.
pub fn fingerprint<S: AsRef<str>>(elements: &[S]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(elements).as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize<S: AsRef<str>>(elements: &[S]) -> String {
    let joined = elements
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(DELIMITER);
    format!("{DELIMITER}{joined}{DELIMITER}")
}
