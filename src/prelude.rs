pub use crate::cache::{CacheOptions, CacheStats, TieredCache};
pub use crate::ds::{
    BufferStatus, FrequencySketch, MpscBoundedBuffer, SeqLockSlot, StripedAdder, TakeError,
};
pub use crate::error::{ConfigError, InvariantError};
pub use crate::policy::{
    CustomExpiryPolicy, ExpireAfterAccess, ExpireAfterWrite, Expiry, ExpiryPolicy, NoExpiry,
    TinyLfuAdmission,
};
