//! Request records: the unit the scheduler orders and dispatches.
//!
//! A request addresses a contiguous sector range in one data direction.
//! Its deadline is fixed when it is queued and can only move earlier (merges
//! keep the tighter of two deadlines).

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Index of a device sector.
pub type Sector = u64;

/// Scheduler clock in milliseconds. Supplied by the caller, never read from the OS.
pub type Timestamp = u64;

/// Unique identifier of a queued request.
pub type RequestId = u64;

/// Data direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Array index used by the per-direction indices.
    pub fn index(&self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Whether the issuer blocks on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncClass {
    Sync,
    Async,
}

impl SyncClass {
    pub fn index(&self) -> usize {
        match self {
            SyncClass::Sync => 0,
            SyncClass::Async => 1,
        }
    }
}

impl std::fmt::Display for SyncClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncClass::Sync => write!(f, "sync"),
            SyncClass::Async => write!(f, "async"),
        }
    }
}

/// A submission as it arrives from the block layer, before it is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoRequest {
    pub sector: Sector,
    pub count: u64,
    pub direction: Direction,
    pub sync: SyncClass,
}

impl IoRequest {
    pub fn new(sector: Sector, count: u64, direction: Direction, sync: SyncClass) -> Self {
        Self {
            sector,
            count,
            direction,
            sync,
        }
    }

    pub fn read(sector: Sector, count: u64) -> Self {
        Self::new(sector, count, Direction::Read, SyncClass::Sync)
    }

    pub fn write(sector: Sector, count: u64) -> Self {
        Self::new(sector, count, Direction::Write, SyncClass::Async)
    }

    /// Override the sync class.
    pub fn with_sync(mut self, sync: SyncClass) -> Self {
        self.sync = sync;
        self
    }
}

/// A request held by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Identifier assigned at queueing time. Ids grow monotonically, so they
    /// double as the insertion order for equal start sectors.
    pub id: RequestId,

    /// First sector covered.
    pub sector_start: Sector,

    /// Number of sectors covered (never zero).
    pub sector_count: u64,

    pub direction: Direction,

    /// Class of the deadline queue this request lives in.
    pub sync_class: SyncClass,

    /// When the request entered the scheduler.
    pub enqueue_time: Timestamp,

    /// Deadline after which it is dispatched regardless of seek cost.
    pub expire_time: Timestamp,
}

impl Request {
    /// One past the last sector covered.
    pub fn sector_end(&self) -> Sector {
        self.sector_start + self.sector_count
    }

    /// Sector range covered by this request.
    pub fn sectors(&self) -> Range<Sector> {
        self.sector_start..self.sector_end()
    }

    /// Key of this request in the sector-ordered index.
    pub(crate) fn sort_key(&self) -> (Sector, u64) {
        (self.sector_start, self.id)
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expire_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: Sector, count: u64) -> Request {
        Request {
            id: 1,
            sector_start: start,
            sector_count: count,
            direction: Direction::Read,
            sync_class: SyncClass::Sync,
            enqueue_time: 0,
            expire_time: 10,
        }
    }

    #[test]
    fn test_sector_range() {
        let rq = request(100, 8);
        assert_eq!(rq.sector_end(), 108);
        assert_eq!(rq.sectors(), 100..108);
    }

    #[test]
    fn test_expiry_is_strict() {
        let rq = request(0, 1);
        assert!(!rq.is_expired(9));
        assert!(!rq.is_expired(10));
        assert!(rq.is_expired(11));
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Read.index(), 0);
        assert_eq!(Direction::Write.index(), 1);
        assert_eq!(Direction::Write.to_string(), "write");
        assert_eq!(SyncClass::Async.to_string(), "async");
    }
}
