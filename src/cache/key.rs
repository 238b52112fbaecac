//! Cache keys
//!
//! A key is the namespace plus a SHA-256 digest of the identifying parts.
//! Parts are length-prefixed before hashing so `["ab", "c"]` and
//! `["a", "bc"]` never collide. Caller-supplied parts longer than the
//! configured limit are rejected rather than truncated.

use std::fmt;

use sha2::{Digest, Sha256};

use super::{CacheError, CacheResult};

/// Deterministic cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    digest: String,
}

impl CacheKey {
    pub fn new(namespace: &str, parts: &[&str], max_part_len: usize) -> CacheResult<Self> {
        if namespace.is_empty()
            || namespace.len() > max_part_len
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(CacheError::InvalidNamespace(namespace.to_string()));
        }

        let mut hasher = Sha256::new();
        for part in parts {
            if part.len() > max_part_len {
                return Err(CacheError::KeyPartTooLong {
                    len: part.len(),
                    max: max_part_len,
                });
            }
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }

        Ok(Self {
            namespace: namespace.to_string(),
            digest: format!("{:x}", hasher.finalize()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.digest)
    }
}
