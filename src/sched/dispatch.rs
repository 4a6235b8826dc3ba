//! Dispatch policy: picks the next request for the device.
//!
//! Priority order, first match wins:
//! 1. An expired FIFO head (earliest deadline first).
//! 2. A write, once read batches have starved writes `writes_starved` times.
//! 3. A read, once a full write batch has run while reads wait.
//! 4. The cheaper of the two requests either side of the head, where
//!    `cost = distance`, times `rev_penalty` when it reverses the head.
//!
//! ```text
//! rev_penalty = 0  -> SCAN (reverse only when nothing lies ahead)
//! rev_penalty = 1  -> SSTF
//! rev_penalty = n  -> reversing must be n times closer to win
//! ```
//!
//! A request starting exactly at the head costs nothing and is taken first;
//! it leaves the scan direction unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sched::request::{Direction, Request, RequestId, Timestamp};
use crate::sched::scheduler::Scheduler;

/// Which way the head travelled on the last dispatch that moved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    /// Towards higher sectors.
    Up,
    /// Towards lower sectors.
    Down,
}

/// Why a request was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    /// Its deadline had passed.
    Expired,
    /// Write starvation guard.
    StarvedWrite,
    /// A full write batch handed over to waiting reads.
    BatchSwitch,
    /// Lowest seek cost.
    Seek,
}

impl std::fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchReason::Expired => write!(f, "expired"),
            DispatchReason::StarvedWrite => write!(f, "starved_write"),
            DispatchReason::BatchSwitch => write!(f, "batch_switch"),
            DispatchReason::Seek => write!(f, "seek"),
        }
    }
}

impl Scheduler {
    /// Remove and return the next request to issue, or `None` if nothing is pending.
    pub fn dispatch(&mut self, now: Timestamp) -> Option<Request> {
        self.dispatch_with_reason(now).map(|(rq, _)| rq)
    }

    /// Like [`Scheduler::dispatch`], also reporting which rule chose the request.
    pub fn dispatch_with_reason(&mut self, now: Timestamp) -> Option<(Request, DispatchReason)> {
        if self.sort.is_empty() {
            assert!(
                self.fifo.is_empty(),
                "deadline queues hold {} requests absent from the sort tree",
                self.fifo.len()
            );
            return None;
        }

        let (id, reason) = self.select(now);
        let rq = self.remove_request(id);
        self.account(&rq, reason);
        Some((rq, reason))
    }

    fn select(&self, now: Timestamp) -> (RequestId, DispatchReason) {
        if let Some(id) = self.expired_head(now) {
            return (id, DispatchReason::Expired);
        }

        let reads_pending = self.sort.len_dir(Direction::Read) > 0;
        let writes_pending = self.sort.len_dir(Direction::Write) > 0;

        if writes_pending && self.starved_count >= self.config.writes_starved {
            if let Some(id) = self.nearest(Some(Direction::Write)) {
                return (id, DispatchReason::StarvedWrite);
            }
        }

        if reads_pending && self.batch_full() && self.batch_dir == Some(Direction::Write) {
            if let Some(id) = self.nearest(Some(Direction::Read)) {
                return (id, DispatchReason::BatchSwitch);
            }
        }

        match self.nearest(None) {
            Some(id) => (id, DispatchReason::Seek),
            None => panic!("sort tree is non-empty but yielded no candidate"),
        }
    }

    /// The expired FIFO head with the earliest deadline.
    fn expired_head(&self, now: Timestamp) -> Option<RequestId> {
        let mut oldest: Option<&Request> = None;
        for id in self.fifo.heads() {
            let rq = self.pending(id);
            if !rq.is_expired(now) {
                continue;
            }
            if oldest.map_or(true, |o| rq.expire_time < o.expire_time) {
                oldest = Some(rq);
            }
        }
        oldest.map(|rq| rq.id)
    }

    /// Cheapest candidate on either side of the head, optionally restricted
    /// to one data direction.
    pub(crate) fn nearest(&self, dir: Option<Direction>) -> Option<RequestId> {
        let head = self.head_position;
        let above = self.sort.successor(head, dir);
        let below = self.sort.predecessor(head, dir);

        let (above, below) = match (above, below) {
            (None, None) => return None,
            (Some(a), None) => return Some(a.id),
            (None, Some(b)) => return Some(b.id),
            (Some(a), Some(b)) => (a, b),
        };

        let up_dist = above.sector - head;
        let down_dist = head - below.sector;
        // No head movement needed, whichever way the scan runs.
        if up_dist == 0 {
            return Some(above.id);
        }
        let (forward, forward_dist, reverse, reverse_dist) = match self.head_dir {
            ScanDirection::Up => (above, up_dist, below, down_dist),
            ScanDirection::Down => (below, down_dist, above, up_dist),
        };

        if self.config.rev_penalty == 0 {
            return Some(forward.id);
        }
        let reverse_cost = reverse_dist.saturating_mul(self.config.rev_penalty);
        if reverse_cost < forward_dist {
            Some(reverse.id)
        } else {
            Some(forward.id)
        }
    }

    /// Whether the current batch has reached `fifo_batch` dispatches.
    pub(crate) fn batch_full(&self) -> bool {
        self.batch_count >= self.config.fifo_batch.max(1)
    }

    /// Update head, batch, and starvation state after dispatching `rq`.
    fn account(&mut self, rq: &Request, reason: DispatchReason) {
        if self.batch_dir != Some(rq.direction) || self.batch_full() {
            self.batch_count = 1;
        } else {
            self.batch_count += 1;
        }
        self.batch_dir = Some(rq.direction);

        let seek = rq.sector_start.abs_diff(self.head_position);
        if rq.sector_start > self.head_position {
            self.head_dir = ScanDirection::Up;
        } else if rq.sector_start < self.head_position {
            self.head_dir = ScanDirection::Down;
        }
        self.head_position = rq.sector_end();

        match rq.direction {
            Direction::Write => {
                self.starved_count = 0;
                self.stats.writes_dispatched += 1;
            }
            Direction::Read => {
                if self.batch_full() && self.sort.len_dir(Direction::Write) > 0 {
                    self.starved_count += 1;
                }
                self.stats.reads_dispatched += 1;
            }
        }

        self.stats.total_seek += seek;
        match reason {
            DispatchReason::Expired => self.stats.expired_dispatches += 1,
            DispatchReason::StarvedWrite => self.stats.forced_writes += 1,
            DispatchReason::BatchSwitch => self.stats.batch_switches += 1,
            DispatchReason::Seek => {}
        }

        debug!(
            id = rq.id,
            sector = rq.sector_start,
            count = rq.sector_count,
            direction = %rq.direction,
            %reason,
            seek,
            batch = self.batch_count,
            starved = self.starved_count,
            "Dispatched request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::sched::request::IoRequest;

    fn sched(rev_penalty: u64) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            rev_penalty,
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_dispatch_returns_none() {
        let mut s = sched(1);
        assert!(s.dispatch(0).is_none());
    }

    #[test]
    fn test_reversal_penalty_weighs_distance() {
        let mut s = sched(4);
        s.set_head_position(100);
        // Ahead by 30, behind by 10: reversing costs 40.
        s.submit(IoRequest::read(130, 1), 0).unwrap();
        s.submit(IoRequest::read(90, 1), 0).unwrap();
        assert_eq!(s.dispatch(0).unwrap().sector_start, 130);

        // Ahead by 39 (from 131), behind by 9: reversing costs 36, cheaper.
        s.submit(IoRequest::read(170, 1), 0).unwrap();
        s.submit(IoRequest::read(122, 1), 0).unwrap();
        assert_eq!(s.dispatch(0).unwrap().sector_start, 122);
        assert_eq!(s.head_direction(), ScanDirection::Down);
    }

    #[test]
    fn test_tie_prefers_forward() {
        let mut s = sched(1);
        s.set_head_position(50);
        s.submit(IoRequest::read(40, 1), 0).unwrap();
        s.submit(IoRequest::read(60, 1), 0).unwrap();
        assert_eq!(s.dispatch(0).unwrap().sector_start, 60);
    }

    #[test]
    fn test_request_at_head_served_while_scanning_down() {
        let mut s = sched(0);
        s.set_head_position(1_000);
        s.submit(IoRequest::read(500, 10), 0).unwrap();
        assert_eq!(s.dispatch(0).unwrap().sector_start, 500);
        assert_eq!(s.head_direction(), ScanDirection::Down);

        // Head now sits at 510.
        s.submit(IoRequest::read(510, 4), 0).unwrap();
        s.submit(IoRequest::read(100, 4), 0).unwrap();
        s.submit(IoRequest::read(900, 4), 0).unwrap();
        assert_eq!(s.dispatch(0).unwrap().sector_start, 510);
        assert_eq!(s.head_direction(), ScanDirection::Down);
        assert_eq!(s.dispatch(0).unwrap().sector_start, 100);
        assert_eq!(s.dispatch(0).unwrap().sector_start, 900);
    }

    #[test]
    fn test_batch_count_tracks_direction_runs() {
        let mut s = sched(1);
        s.submit(IoRequest::read(10, 1), 0).unwrap();
        s.submit(IoRequest::read(20, 1), 0).unwrap();
        s.submit(IoRequest::write(30, 1), 0).unwrap();

        s.dispatch(0).unwrap();
        s.dispatch(0).unwrap();
        assert_eq!(s.batch_count(), 2);
        let rq = s.dispatch(0).unwrap();
        assert_eq!(rq.direction, Direction::Write);
        assert_eq!(s.batch_count(), 1);
    }

    #[test]
    fn test_full_write_batch_hands_over_to_reads() {
        let mut s = Scheduler::new(SchedulerConfig {
            rev_penalty: 1,
            fifo_batch: 2,
            ..Default::default()
        });
        s.submit(IoRequest::write(10, 1), 0).unwrap();
        s.submit(IoRequest::write(20, 1), 0).unwrap();
        s.submit(IoRequest::write(30, 1), 0).unwrap();
        s.submit(IoRequest::read(5_000, 1), 0).unwrap();

        assert_eq!(s.dispatch(0).unwrap().sector_start, 10);
        assert_eq!(s.dispatch(0).unwrap().sector_start, 20);
        let (rq, reason) = s.dispatch_with_reason(0).unwrap();
        assert_eq!(rq.sector_start, 5_000);
        assert_eq!(reason, DispatchReason::BatchSwitch);
        assert_eq!(s.dispatch(0).unwrap().sector_start, 30);
    }
}
