pub mod admission;
pub mod expiry;
pub mod segments;

pub use admission::TinyLfuAdmission;
pub use expiry::{
    Clock, CustomExpiryPolicy, ExpireAfterAccess, ExpireAfterWrite, Expiry, ExpiryPolicy,
    ExpiryStamp, ManualClock, MonotonicClock, NoExpiry,
};
pub use segments::{RouteDecision, SegmentCapacity, SegmentedQueues};
