//! Merge engine: fuses a new request into sector-contiguous pending neighbours.
//!
//! Only same-direction neighbours whose ranges touch the new one exactly are
//! merged. A request that closes the gap between two neighbours fuses all
//! three into the lower one. The survivor always keeps the earliest deadline
//! of everything it absorbed.

use tracing::debug;

use crate::sched::request::{Request, RequestId, Sector};
use crate::sched::scheduler::Scheduler;

impl Scheduler {
    /// Try to fold `new` (not yet indexed) into a pending neighbour.
    ///
    /// Returns the survivor's id, or `None` if `new` must be queued on its own.
    pub(crate) fn try_merge(&mut self, new: &Request) -> Option<RequestId> {
        let back = self.sort.ending_at(new.sector_start, new.direction);
        let front = self
            .sort
            .successor(new.sector_end(), Some(new.direction))
            .map(|entry| entry.id)
            .filter(|&id| self.pending(id).sector_start == new.sector_end());

        let survivor = match (back, front) {
            (None, None) => return None,
            (Some(prev), None) => {
                let start = self.pending(prev).sector_start;
                self.reposition(prev, start, new.sector_end() - start);
                self.absorb_incoming(prev, new);
                self.stats.back_merges += 1;
                prev
            }
            (None, Some(next)) => {
                let end = self.pending(next).sector_end();
                self.reposition(next, new.sector_start, end - new.sector_start);
                self.absorb_incoming(next, new);
                self.stats.front_merges += 1;
                next
            }
            (Some(prev), Some(next)) => {
                let start = self.pending(prev).sector_start;
                let end = self.pending(next).sector_end();
                self.absorb_incoming(prev, new);
                self.absorb_pending(prev, next);
                self.reposition(prev, start, end - start);
                self.stats.bridge_merges += 1;
                prev
            }
        };

        let rq = self.pending(survivor);
        debug!(
            survivor,
            absorbed = new.id,
            bridged = ?front.filter(|_| back.is_some()),
            sector = rq.sector_start,
            count = rq.sector_count,
            expire = rq.expire_time,
            "Merged request"
        );
        Some(survivor)
    }

    /// Give `survivor` the new request's deadline if it is tighter. The new
    /// request was never queued, so the survivor moves to the tail of the new
    /// request's class queue.
    fn absorb_incoming(&mut self, survivor: RequestId, new: &Request) {
        let keep = self.pending(survivor).clone();
        if new.expire_time >= keep.expire_time {
            return;
        }

        assert!(self.fifo.remove(&keep), "request {survivor} missing from deadline queue");
        let rq = self.pending_mut(survivor);
        rq.sync_class = new.sync_class;
        rq.expire_time = new.expire_time;
        let moved = rq.clone();
        assert!(self.fifo.push(&moved), "request {survivor} queued twice");
    }

    /// Remove pending request `absorbed` from both indices, handing its FIFO
    /// slot and deadline to `survivor` when it expires first.
    pub(crate) fn absorb_pending(&mut self, survivor: RequestId, absorbed: RequestId) {
        let Some(gone) = self.requests.remove(&absorbed) else {
            panic!("request {absorbed} is indexed but not pending");
        };
        assert!(self.sort.remove(&gone), "request {absorbed} missing from sort tree");

        let keep = self.pending(survivor).clone();
        if gone.expire_time < keep.expire_time {
            assert!(self.fifo.remove(&keep), "request {survivor} missing from deadline queue");
            assert!(
                self.fifo.take_slot(&gone, survivor),
                "request {absorbed} missing from deadline queue"
            );
            let rq = self.pending_mut(survivor);
            rq.sync_class = gone.sync_class;
            rq.expire_time = gone.expire_time;
        } else {
            assert!(self.fifo.remove(&gone), "request {absorbed} missing from deadline queue");
        }
    }

    /// Set a pending request's range and re-key it in the sort tree.
    pub(crate) fn reposition(&mut self, id: RequestId, start: Sector, count: u64) {
        let Some(rq) = self.requests.get_mut(&id) else {
            panic!("request {id} is indexed but not pending");
        };
        assert!(self.sort.remove(rq), "request {id} missing from sort tree");
        rq.sector_start = start;
        rq.sector_count = count;
        assert!(self.sort.insert(rq), "request {id} already in sort tree");
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedulerConfig;
    use crate::sched::request::{Direction, IoRequest, SyncClass};
    use crate::sched::scheduler::Scheduler;

    fn sched() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }

    #[test]
    fn test_back_merge() {
        let mut s = sched();
        let a = s.submit(IoRequest::read(0, 10), 0).unwrap();
        let b = s.submit(IoRequest::read(10, 10), 5).unwrap();

        assert_eq!(a, b);
        assert_eq!(s.pending_count(), 1);
        let rq = s.get(a).unwrap();
        assert_eq!(rq.sectors(), 0..20);
        assert_eq!(rq.expire_time, 500);
        assert_eq!(s.stats().back_merges, 1);
        s.check_invariants();
    }

    #[test]
    fn test_front_merge_rekeys() {
        let mut s = sched();
        let a = s.submit(IoRequest::read(100, 8), 0).unwrap();
        let b = s.submit(IoRequest::read(92, 8), 0).unwrap();

        assert_eq!(a, b);
        assert_eq!(s.get(a).unwrap().sectors(), 92..108);
        assert_eq!(s.stats().front_merges, 1);
        s.check_invariants();
    }

    #[test]
    fn test_bridge_merge_fuses_three() {
        let mut s = sched();
        let low = s.submit(IoRequest::write(0, 8), 0).unwrap();
        let high = s.submit(IoRequest::write(16, 8), 0).unwrap();
        assert_ne!(low, high);

        let survivor = s.submit(IoRequest::write(8, 8), 1).unwrap();
        assert_eq!(survivor, low);
        assert_eq!(s.pending_count(), 1);
        assert!(s.get(high).is_none());
        assert_eq!(s.get(low).unwrap().sectors(), 0..24);
        assert_eq!(s.stats().bridge_merges, 1);
        s.check_invariants();
    }

    #[test]
    fn test_back_merge_past_overlapping_request() {
        let mut s = sched();
        let wide = s.submit(IoRequest::read(0, 10), 0).unwrap();
        let inner = s.submit(IoRequest::read(4, 2), 0).unwrap();
        assert_ne!(wide, inner);

        let survivor = s.submit(IoRequest::read(10, 10), 0).unwrap();
        assert_eq!(survivor, wide);
        assert_eq!(s.pending_count(), 2);
        assert_eq!(s.get(wide).unwrap().sectors(), 0..20);
        assert_eq!(s.get(inner).unwrap().sectors(), 4..6);
        assert_eq!(s.stats().back_merges, 1);
        s.check_invariants();
    }

    #[test]
    fn test_cross_direction_and_gaps_do_not_merge() {
        let mut s = sched();
        s.submit(IoRequest::read(0, 10), 0).unwrap();
        s.submit(IoRequest::write(10, 10), 0).unwrap();
        s.submit(IoRequest::read(21, 4), 0).unwrap();

        assert_eq!(s.pending_count(), 3);
        assert_eq!(s.stats().merged(), 0);
        s.check_invariants();
    }

    #[test]
    fn test_merge_keeps_tighter_deadline() {
        let mut s = sched();
        // Async read expires at 4000; a sync read arriving later expires at 1500.
        let a = s
            .submit(IoRequest::read(0, 8).with_sync(SyncClass::Async), 0)
            .unwrap();
        s.submit(IoRequest::read(8, 8), 1_000).unwrap();

        let rq = s.get(a).unwrap();
        assert_eq!(rq.expire_time, 1_500);
        assert_eq!(rq.sync_class, SyncClass::Sync);
        assert_eq!(s.queued(Direction::Read, SyncClass::Sync), vec![a]);
        assert!(s.queued(Direction::Read, SyncClass::Async).is_empty());
        s.check_invariants();
    }

    #[test]
    fn test_bridge_inherits_absorbed_fifo_slot() {
        let mut s = sched();
        // `high` is a sync write (expire 2000), `low` an async write (16000).
        let low = s.submit(IoRequest::write(0, 8), 0).unwrap();
        let high = s
            .submit(IoRequest::write(16, 8).with_sync(SyncClass::Sync), 0)
            .unwrap();
        let other = s
            .submit(IoRequest::write(100, 8).with_sync(SyncClass::Sync), 0)
            .unwrap();

        s.submit(IoRequest::write(8, 8), 10).unwrap();

        assert_eq!(s.get(low).unwrap().expire_time, 2_000);
        assert_eq!(s.queued(Direction::Write, SyncClass::Sync), vec![low, other]);
        assert!(s.get(high).is_none());
        s.check_invariants();
    }
}
