//! Cache Layer
//!
//! Tagged, TTL-bound memoization:
//!
//! - Read-through via [`CacheLayer::remember_with`], single-flight per key
//! - Bulk invalidation by tag, O(tags) through a tag index
//! - Backend failures fail open: reads become misses, writes and
//!   invalidations are logged and never surface to the caller

mod backend;
mod key;
mod layer;

pub use backend::{CacheBackend, MokaBackend};
pub use key::CacheKey;
pub use layer::{CacheLayer, CacheStats};

use thiserror::Error;

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Cache key part of {len} bytes exceeds {max}")]
    KeyPartTooLong { len: usize, max: usize },

    #[error("Invalid cache namespace '{0}'")]
    InvalidNamespace(String),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::KeyPartTooLong { .. } => "WARDEN_CACHE_KEY_TOO_LONG",
            CacheError::InvalidNamespace(_) => "WARDEN_CACHE_INVALID_NAMESPACE",
            CacheError::Backend(_) => "WARDEN_CACHE_BACKEND",
        }
    }
}
