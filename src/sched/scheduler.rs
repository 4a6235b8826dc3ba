//! The scheduler handle: owns the request arena and both indices.
//!
//! Requests live in one map keyed by id. The sort tree and the deadline
//! queues hold ids only, and every pending request is present in both
//! (an id in one index but not the other is a bookkeeping bug and panics).
//!
//! The handle has no internal locking. Callers serialise `submit`,
//! `dispatch`, and `notify_merged` themselves.

use std::collections::{HashMap, TryReserveError};

use thiserror::Error;
use tracing::debug;

use crate::config::{SchedulerConfig, Tunable, TunableError};
use crate::sched::dispatch::ScanDirection;
use crate::sched::fifo::DeadlineQueues;
use crate::sched::request::{
    Direction, IoRequest, Request, RequestId, Sector, SyncClass, Timestamp,
};
use crate::sched::sort_tree::SortTree;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Request covers no sectors")]
    ZeroLength,

    #[error("Request at sector {sector} with {count} sectors overflows the sector space")]
    SectorOverflow { sector: Sector, count: u64 },

    #[error("Request {0} is not pending")]
    UnknownRequest(RequestId),

    #[error("Request {0} cannot be merged into itself")]
    SelfMerge(RequestId),

    #[error("Requests {survivor} and {absorbed} have different data directions")]
    DirectionMismatch {
        survivor: RequestId,
        absorbed: RequestId,
    },

    #[error(transparent)]
    Tunable(#[from] TunableError),

    #[error("Out of memory reserving scheduler state: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

/// Scheduler counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedStats {
    pub submitted: u64,
    pub back_merges: u64,
    pub front_merges: u64,
    /// New requests that closed the gap between two pending ones.
    pub bridge_merges: u64,
    /// Merges reported through `notify_merged`.
    pub external_merges: u64,
    pub reads_dispatched: u64,
    pub writes_dispatched: u64,
    pub expired_dispatches: u64,
    pub forced_writes: u64,
    pub batch_switches: u64,
    /// Sum of head travel over all dispatches, in sectors.
    pub total_seek: u64,
}

impl SchedStats {
    pub fn dispatched(&self) -> u64 {
        self.reads_dispatched + self.writes_dispatched
    }

    pub fn merged(&self) -> u64 {
        self.back_merges + self.front_merges + 2 * self.bridge_merges + self.external_merges
    }
}

/// The V(R) scheduler for one device queue.
pub struct Scheduler {
    /// All pending requests indexed by id.
    pub(crate) requests: HashMap<RequestId, Request>,

    /// Sector-ordered index.
    pub(crate) sort: SortTree,

    /// Per-class deadline FIFOs.
    pub(crate) fifo: DeadlineQueues,

    pub(crate) config: SchedulerConfig,

    /// End sector of the most recent dispatch.
    pub(crate) head_position: Sector,

    /// Which way the head moved on the most recent dispatch.
    pub(crate) head_dir: ScanDirection,

    /// Data direction of the current batch (None before the first dispatch).
    pub(crate) batch_dir: Option<Direction>,

    pub(crate) batch_count: u64,

    pub(crate) starved_count: u64,

    pub(crate) stats: SchedStats,

    next_id: RequestId,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            requests: HashMap::new(),
            sort: SortTree::new(),
            fifo: DeadlineQueues::new(),
            config: config.sanitized(),
            head_position: 0,
            head_dir: ScanDirection::Up,
            batch_dir: None,
            batch_count: 0,
            starved_count: 0,
            stats: SchedStats::default(),
            next_id: 0,
        }
    }

    /// Create an empty scheduler with room for `capacity` pending requests.
    ///
    /// Fails only if the allocation cannot be satisfied.
    pub fn init(config: SchedulerConfig, capacity: usize) -> Result<Self, SchedError> {
        let mut sched = Self::new(config);
        sched.requests.try_reserve(capacity)?;
        debug!(capacity, "Scheduler initialised");
        Ok(sched)
    }

    /// Queue a request, merging it into a sector-adjacent neighbour when possible.
    ///
    /// Returns the id of the pending request that now covers the submitted
    /// sectors: a fresh id, or the survivor it was merged into.
    pub fn submit(&mut self, io: IoRequest, now: Timestamp) -> Result<RequestId, SchedError> {
        if io.count == 0 {
            return Err(SchedError::ZeroLength);
        }
        if io.sector.checked_add(io.count).is_none() {
            return Err(SchedError::SectorOverflow {
                sector: io.sector,
                count: io.count,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.stats.submitted += 1;

        let rq = Request {
            id,
            sector_start: io.sector,
            sector_count: io.count,
            direction: io.direction,
            sync_class: io.sync,
            enqueue_time: now,
            expire_time: now.saturating_add(self.config.expire_for(io.direction, io.sync)),
        };

        if let Some(survivor) = self.try_merge(&rq) {
            return Ok(survivor);
        }

        debug!(
            id,
            sector = rq.sector_start,
            count = rq.sector_count,
            direction = %rq.direction,
            sync = %rq.sync_class,
            expire = rq.expire_time,
            "Queued request"
        );
        self.add_request(rq);
        Ok(id)
    }

    /// Fold `absorbed` into `survivor` after the block layer merged two pending
    /// requests on its own.
    ///
    /// The survivor grows to cover both ranges. If `absorbed` has the earlier
    /// deadline, the survivor takes over its FIFO slot and expire time.
    pub fn notify_merged(
        &mut self,
        survivor: RequestId,
        absorbed: RequestId,
    ) -> Result<(), SchedError> {
        if survivor == absorbed {
            return Err(SchedError::SelfMerge(survivor));
        }
        let keep = self
            .requests
            .get(&survivor)
            .ok_or(SchedError::UnknownRequest(survivor))?;
        let gone = self
            .requests
            .get(&absorbed)
            .ok_or(SchedError::UnknownRequest(absorbed))?;
        if keep.direction != gone.direction {
            return Err(SchedError::DirectionMismatch { survivor, absorbed });
        }

        let start = keep.sector_start.min(gone.sector_start);
        let end = keep.sector_end().max(gone.sector_end());
        self.absorb_pending(survivor, absorbed);
        self.reposition(survivor, start, end - start);
        self.stats.external_merges += 1;

        debug!(survivor, absorbed, sector = start, count = end - start, "External merge");
        Ok(())
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.sort.is_empty()
    }

    /// Release the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if requests are still pending: dropping them would lose I/O.
    pub fn teardown(self) -> SchedStats {
        assert!(
            self.sort.is_empty() && self.fifo.is_empty(),
            "scheduler torn down with {} pending requests",
            self.sort.len().max(self.fifo.len())
        );
        debug!(dispatched = self.stats.dispatched(), merged = self.stats.merged(), "Scheduler torn down");
        self.stats
    }

    /// Read a tunable by name.
    pub fn get_tunable(&self, name: &str) -> Result<i64, SchedError> {
        let tunable: Tunable = name.parse()?;
        Ok(self.config.get(tunable))
    }

    /// Write a tunable by name. Out-of-range values are clamped; the stored
    /// value is returned.
    pub fn set_tunable(&mut self, name: &str, value: i64) -> Result<i64, SchedError> {
        let tunable: Tunable = name.parse()?;
        let stored = self.config.set(tunable, value);
        debug!(tunable = %tunable, value = stored, "Tunable updated");
        Ok(stored)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Look up a pending request.
    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    /// The pending request sorted immediately below `id`.
    pub fn former_request(&self, id: RequestId) -> Result<Option<&Request>, SchedError> {
        let rq = self.requests.get(&id).ok_or(SchedError::UnknownRequest(id))?;
        Ok(self.sort.former(rq).map(|entry| self.pending(entry.id)))
    }

    /// The pending request sorted immediately above `id`.
    pub fn latter_request(&self, id: RequestId) -> Result<Option<&Request>, SchedError> {
        let rq = self.requests.get(&id).ok_or(SchedError::UnknownRequest(id))?;
        Ok(self.sort.latter(rq).map(|entry| self.pending(entry.id)))
    }

    /// Pending requests in sector order.
    pub fn sorted(&self) -> Vec<&Request> {
        self.sort
            .ordered()
            .into_iter()
            .map(|entry| self.pending(entry.id))
            .collect()
    }

    /// Ids in one deadline queue, oldest first.
    pub fn queued(&self, dir: Direction, sync: SyncClass) -> Vec<RequestId> {
        self.fifo.queue(dir, sync).iter().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    pub fn pending_by_class(&self, dir: Direction, sync: SyncClass) -> usize {
        self.fifo.queue(dir, sync).len()
    }

    pub fn head_position(&self) -> Sector {
        self.head_position
    }

    /// Move the head reference, e.g. after the device was driven outside the scheduler.
    pub fn set_head_position(&mut self, sector: Sector) {
        self.head_position = sector;
    }

    pub fn head_direction(&self) -> ScanDirection {
        self.head_dir
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    pub fn starved_count(&self) -> u64 {
        self.starved_count
    }

    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    /// Walk both indices and the arena and panic on any disagreement.
    pub fn check_invariants(&self) {
        assert_eq!(
            self.sort.len(),
            self.requests.len(),
            "sort tree holds {} entries for {} pending requests",
            self.sort.len(),
            self.requests.len()
        );
        assert_eq!(
            self.fifo.len(),
            self.requests.len(),
            "deadline queues hold {} entries for {} pending requests",
            self.fifo.len(),
            self.requests.len()
        );
        for dir in [Direction::Read, Direction::Write] {
            assert_eq!(
                self.sort.len_dir(dir),
                self.fifo.len_dir(dir),
                "{dir} requests disagree between sort tree and deadline queues"
            );
        }
        for rq in self.requests.values() {
            assert!(rq.sector_count > 0, "request {} covers no sectors", rq.id);
            assert!(self.sort.contains(rq), "request {} missing from sort tree", rq.id);
            assert!(self.fifo.contains(rq), "request {} missing from deadline queue", rq.id);
        }
        let sorted = self.sort.ordered();
        for pair in sorted.windows(2) {
            assert!(pair[0].sector <= pair[1].sector, "sort tree out of order");
        }
    }

    /// Link a request into both indices.
    pub(crate) fn add_request(&mut self, rq: Request) {
        let id = rq.id;
        assert!(self.sort.insert(&rq), "request {id} already in sort tree");
        assert!(self.fifo.push(&rq), "request {id} already in deadline queue");
        self.requests.insert(id, rq);
    }

    /// Unlink a request from both indices and hand it back.
    pub(crate) fn remove_request(&mut self, id: RequestId) -> Request {
        let Some(rq) = self.requests.remove(&id) else {
            panic!("request {id} is indexed but not pending");
        };
        assert!(self.sort.remove(&rq), "request {id} missing from sort tree");
        assert!(self.fifo.remove(&rq), "request {id} missing from deadline queue");
        rq
    }

    pub(crate) fn pending(&self, id: RequestId) -> &Request {
        match self.requests.get(&id) {
            Some(rq) => rq,
            None => panic!("request {id} is indexed but not pending"),
        }
    }

    pub(crate) fn pending_mut(&mut self, id: RequestId) -> &mut Request {
        match self.requests.get_mut(&id) {
            Some(rq) => rq,
            None => panic!("request {id} is indexed but not pending"),
        }
    }
}
