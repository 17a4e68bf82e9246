//! SHA256 digest utilities.
//!
//! A `Digest` names a byte sequence as `sha256:<hex>`. Two objects are
//! equal iff their digests are equal; digests are computed either from
//! raw blob bytes or from the canonical JSON encoding of an object.

use crate::error::{OciPkgError, Result};
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::fmt;

/// SHA256 digest of the empty byte string, the canonical "empty layer".
pub const EMPTY_DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(format!("sha256:{:x}", hasher.finalize()))
    }

    /// Compute the digest of the canonical JSON encoding of a value.
    ///
    /// "Canonical" here means: struct field order is preserved (stable,
    /// declared by the type), but any map (e.g. annotations, stored as
    /// `HashMap` by `oci-spec`) is re-keyed through `serde_json::Value`,
    /// whose object variant is a `BTreeMap` as long as the `preserve_order`
    /// feature stays off. Without this indirection, two manifests built
    /// from identical inputs could hash differently run to run, since
    /// `HashMap` iteration order depends on a randomised seed.
    pub fn of_json<T: Serialize>(value: &T) -> Result<Self> {
        let canonical = serde_json::to_value(value)?;
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Parse a digest string of the form `sha256:<64 hex chars>`.
    pub fn parse(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix("sha256:").ok_or_else(|| {
            OciPkgError::Validation(format!("digest missing sha256: prefix: {s}"))
        })?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OciPkgError::Validation(format!(
                "invalid sha256 digest: {s}"
            )));
        }
        Ok(Digest(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part only, suitable as a filename component.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix("sha256:").unwrap_or(&self.0)
    }

    pub fn algorithm(&self) -> &str {
        "sha256"
    }

    /// Verify that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::of_bytes(data);
        if actual != *self {
            return Err(OciPkgError::DigestMismatch {
                expected: self.0.clone(),
                actual: actual.0,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_matches_constant() {
        assert_eq!(Digest::of_bytes(b"").as_str(), EMPTY_DIGEST);
    }

    #[test]
    fn parse_rejects_bad_length() {
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse("md5:abc").is_err());
    }

    #[test]
    fn parse_accepts_valid() {
        let d = Digest::of_bytes(b"hello world");
        assert!(Digest::parse(d.as_str()).is_ok());
    }

    #[test]
    fn verify_detects_mismatch() {
        let d = Digest::of_bytes(b"hello");
        assert!(d.verify(b"hello").is_ok());
        assert!(d.verify(b"world").is_err());
    }

    #[test]
    fn json_digest_is_deterministic() {
        #[derive(Serialize)]
        struct X {
            a: u32,
            b: String,
        }
        let x = X { a: 1, b: "y".into() };
        let d1 = Digest::of_json(&x).unwrap();
        let d2 = Digest::of_json(&x).unwrap();
        assert_eq!(d1, d2);
    }
}
