pub mod bitops;
pub mod long_adder;
pub mod padded;
pub mod ring_buffer;
pub mod seqlock;
pub mod sketch;

pub use long_adder::StripedAdder;
pub use padded::{Padded, PaddedHeadAndTail};
pub use ring_buffer::{BufferStatus, MpscBoundedBuffer, TakeError};
pub use seqlock::SeqLockSlot;
pub use sketch::FrequencySketch;
