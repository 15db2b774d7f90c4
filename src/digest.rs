//! Fixed-width cryptographic digest over byte streams (component C1).

use std::fmt;

use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};

use crate::error::FractylError;

pub const DIGEST_BYTES: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_BYTES]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_BYTES]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; DIGEST_BYTES];
        bytes.copy_from_slice(&out);
        Digest(bytes)
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(DIGEST_BYTES * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// The 8-character hex prefix used as a human-facing snapshot id.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != DIGEST_BYTES * 2 {
            anyhow::bail!(FractylError::Corrupt(format!(
                "invalid digest length: expected {} hex chars, got {}",
                DIGEST_BYTES * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; DIGEST_BYTES];
        for i in 0..DIGEST_BYTES {
            bytes[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .with_context(|| FractylError::Corrupt(format!("invalid hex digest: {}", s)))?;
        }
        Ok(Digest(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Streaming variant: `update` repeatedly, then `finish`.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher { inner: Sha256::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> Digest {
        let out = self.inner.finalize();
        let mut bytes = [0u8; DIGEST_BYTES];
        bytes.copy_from_slice(&out);
        Digest(bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let digest = Digest::hash(b"hello world");
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed = Digest::from_hex(&hex).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn short_is_eight_chars() {
        let digest = Digest::hash(b"anything");
        assert_eq!(digest.short().len(), 8);
        assert!(digest.to_hex().starts_with(&digest.short()));
    }

    #[test]
    fn same_content_same_digest() {
        assert_eq!(Digest::hash(b"hi"), Digest::hash(b"hi"));
        assert_ne!(Digest::hash(b"hi"), Digest::hash(b"ho"));
    }

    #[test]
    fn streaming_matches_oneshot() {
        let mut hasher = Hasher::new();
        hasher.update(b"hel");
        hasher.update(b"lo");
        assert_eq!(hasher.finish(), Digest::hash(b"hello"));
    }
}
