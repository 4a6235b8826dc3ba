//! vr-iosched: the V(R) block I/O request scheduler.
//!
//! Orders pending read/write requests for a single device. The next request
//! is the one closest to the head, with a multiplicative `rev_penalty` for
//! reversing direction: 1 gives SSTF, larger values approach SCAN, and 0 is
//! pure SCAN. Per-class deadlines bound latency, a starvation counter bounds
//! how long reads can hold off writes, and contiguous same-direction requests
//! are merged on arrival.

pub mod config;
pub mod replay;
pub mod sched;
