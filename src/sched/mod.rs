//! The V(R) request scheduler.
//!
//! This module contains the scheduler core:
//! - [`request`]: request records, directions, sync classes
//! - [`sort_tree`]: sector-ordered index of pending requests
//! - [`fifo`]: per-class deadline FIFOs
//! - [`merge`]: front/back/bridge merging of contiguous requests
//! - [`dispatch`]: the dispatch policy (deadline, starvation, seek cost)
//! - [`scheduler`]: the handle tying the indices together

pub mod dispatch;
pub mod fifo;
pub mod merge;
pub mod request;
pub mod scheduler;
pub mod sort_tree;

pub use dispatch::{DispatchReason, ScanDirection};
pub use request::{Direction, IoRequest, Request, RequestId, Sector, SyncClass, Timestamp};
pub use scheduler::{SchedError, SchedStats, Scheduler};
