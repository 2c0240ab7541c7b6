pub mod entry;
pub mod index;

pub use entry::{Entry, SegmentTag};
pub use index::ShardedIndex;
