//! Deadline queues: one FIFO per (direction, sync class).
//!
//! Every queue is a doubly linked list threaded through a map of links, so
//! head access, append, unlink, and in-place replacement are all O(1). Entries
//! in one queue share an expire interval, which keeps each queue sorted by
//! expire time and lets the deadline check look at heads only.

use std::collections::HashMap;

use crate::sched::request::{Direction, Request, RequestId, SyncClass};

/// Scan order of the four queues for the deadline check; also breaks ties
/// between equally old heads.
pub const QUEUE_ORDER: [(Direction, SyncClass); 4] = [
    (Direction::Read, SyncClass::Sync),
    (Direction::Write, SyncClass::Sync),
    (Direction::Read, SyncClass::Async),
    (Direction::Write, SyncClass::Async),
];

#[derive(Debug, Default, Clone, Copy)]
struct Link {
    prev: Option<RequestId>,
    next: Option<RequestId>,
}

/// An intrusive-style FIFO of request ids.
#[derive(Debug, Default)]
pub struct FifoList {
    head: Option<RequestId>,
    tail: Option<RequestId>,
    links: HashMap<RequestId, Link>,
}

impl FifoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns false if `id` is already queued.
    pub fn push_back(&mut self, id: RequestId) -> bool {
        if self.links.contains_key(&id) {
            return false;
        }
        let link = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => self.link_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.links.insert(id, link);
        true
    }

    /// Unlink `id`. Returns false if it was not queued.
    pub fn remove(&mut self, id: RequestId) -> bool {
        let Some(link) = self.links.remove(&id) else {
            return false;
        };
        match link.prev {
            Some(prev) => self.link_mut(prev).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => self.link_mut(next).prev = link.prev,
            None => self.tail = link.prev,
        }
        true
    }

    /// Put `new` into the slot held by `old`, unlinking `old`.
    ///
    /// Returns false (and changes nothing) if `old` is not queued or `new` already is.
    pub fn replace(&mut self, old: RequestId, new: RequestId) -> bool {
        if self.links.contains_key(&new) {
            return false;
        }
        let Some(link) = self.links.remove(&old) else {
            return false;
        };
        match link.prev {
            Some(prev) => self.link_mut(prev).next = Some(new),
            None => self.head = Some(new),
        }
        match link.next {
            Some(next) => self.link_mut(next).prev = Some(new),
            None => self.tail = Some(new),
        }
        self.links.insert(new, link);
        true
    }

    pub fn front(&self) -> Option<RequestId> {
        self.head
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.links.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Queue contents from head to tail.
    pub fn iter(&self) -> FifoIter<'_> {
        FifoIter {
            list: self,
            cursor: self.head,
        }
    }

    fn link_mut(&mut self, id: RequestId) -> &mut Link {
        match self.links.get_mut(&id) {
            Some(link) => link,
            None => panic!("fifo list corrupted: {id} is linked but has no entry"),
        }
    }
}

pub struct FifoIter<'a> {
    list: &'a FifoList,
    cursor: Option<RequestId>,
}

impl Iterator for FifoIter<'_> {
    type Item = RequestId;

    fn next(&mut self) -> Option<RequestId> {
        let id = self.cursor?;
        self.cursor = self.list.links.get(&id).and_then(|link| link.next);
        Some(id)
    }
}

/// The four deadline FIFOs, indexed by `[direction][sync class]`.
#[derive(Debug, Default)]
pub struct DeadlineQueues {
    lists: [[FifoList; 2]; 2],
}

impl DeadlineQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, dir: Direction, sync: SyncClass) -> &FifoList {
        &self.lists[dir.index()][sync.index()]
    }

    fn queue_mut(&mut self, dir: Direction, sync: SyncClass) -> &mut FifoList {
        &mut self.lists[dir.index()][sync.index()]
    }

    /// Append `rq` to the queue of its class.
    pub fn push(&mut self, rq: &Request) -> bool {
        self.queue_mut(rq.direction, rq.sync_class).push_back(rq.id)
    }

    /// Unlink `rq` from the queue of its class.
    pub fn remove(&mut self, rq: &Request) -> bool {
        self.queue_mut(rq.direction, rq.sync_class).remove(rq.id)
    }

    /// Move `survivor` into the slot `absorbed` holds. `survivor` must already
    /// be unlinked; its class becomes the absorbed request's class.
    pub fn take_slot(&mut self, absorbed: &Request, survivor: RequestId) -> bool {
        self.queue_mut(absorbed.direction, absorbed.sync_class)
            .replace(absorbed.id, survivor)
    }

    pub fn contains(&self, rq: &Request) -> bool {
        self.queue(rq.direction, rq.sync_class).contains(rq.id)
    }

    /// Heads of the non-empty queues, in [`QUEUE_ORDER`].
    pub fn heads(&self) -> impl Iterator<Item = RequestId> + '_ {
        QUEUE_ORDER
            .into_iter()
            .filter_map(move |(dir, sync)| self.queue(dir, sync).front())
    }

    pub fn len(&self) -> usize {
        self.lists.iter().flatten().map(FifoList::len).sum()
    }

    pub fn len_dir(&self, dir: Direction) -> usize {
        self.lists[dir.index()].iter().map(FifoList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().flatten().all(FifoList::is_empty)
    }
}
