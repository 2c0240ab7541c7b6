//! Error types for the tiercache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache configuration parameters are invalid
//!   (e.g. zero capacity, zero TTL, TTL beyond the representable tick range).
//! - [`InvariantError`]: Returned when internal data-structure invariants are
//!   violated (debug-only `check_invariants` methods).
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use tiercache::error::ConfigError;
//! use tiercache::policy::expiry::ExpireAfterWrite;
//!
//! // Fallible constructor for user-configurable parameters
//! let ok: Result<ExpireAfterWrite, ConfigError> =
//!     ExpireAfterWrite::new(Duration::from_millis(200));
//! assert!(ok.is_ok());
//!
//! // A zero TTL is caught without panicking
//! let bad = ExpireAfterWrite::new(Duration::ZERO);
//! assert!(bad.is_err());
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`TieredCache::try_with_options`](crate::cache::TieredCache::try_with_options)
/// and the expiry-policy constructors. Carries a human-readable description of
/// which parameter failed validation.
///
/// # Example
///
/// ```
/// use tiercache::cache::{CacheOptions, TieredCache};
///
/// let err = TieredCache::<u64, u64>::try_with_options(CacheOptions::new(0)).unwrap_err();
/// assert!(err.to_string().contains("capacity"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by debug-only `check_invariants` methods on the segment core
/// (e.g. [`SegmentedQueues::check_invariants`](crate::policy::segments::SegmentedQueues::check_invariants)).
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
