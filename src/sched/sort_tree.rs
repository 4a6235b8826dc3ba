//! Sector-ordered index of pending requests.
//!
//! One balanced tree per data direction, keyed by `(sector_start, id)` so
//! equal start sectors keep insertion order. Lookups can be restricted to a
//! direction (merging, forced direction switches) or span both (seek-cost
//! selection), all in O(log n).
//!
//! A second tree per direction, keyed by `(sector_end, id)`, finds back-merge
//! candidates even when pending ranges overlap.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::sched::request::{Direction, Request, RequestId, Sector};

type SortKey = (Sector, u64);

/// A hit from a neighbour lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortEntry {
    pub sector: Sector,
    pub id: RequestId,
}

#[derive(Debug, Default)]
pub struct SortTree {
    trees: [BTreeMap<SortKey, RequestId>; 2],
    /// Same requests keyed by end sector.
    ends: [BTreeMap<SortKey, RequestId>; 2],
}

impl SortTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a request. Returns false if its key was already present.
    ///
    /// The request must be removed before its range changes and re-inserted after.
    pub fn insert(&mut self, rq: &Request) -> bool {
        let d = rq.direction.index();
        let fresh = self.trees[d].insert(rq.sort_key(), rq.id).is_none();
        let fresh_end = self.ends[d].insert((rq.sector_end(), rq.id), rq.id).is_none();
        fresh && fresh_end
    }

    /// Drop a request from the index. Returns false if it was not indexed.
    pub fn remove(&mut self, rq: &Request) -> bool {
        let d = rq.direction.index();
        let found = self.trees[d].remove(&rq.sort_key()).is_some();
        let found_end = self.ends[d].remove(&(rq.sector_end(), rq.id)).is_some();
        found && found_end
    }

    /// Whether the request is indexed under its current range.
    pub fn contains(&self, rq: &Request) -> bool {
        let d = rq.direction.index();
        self.trees[d].get(&rq.sort_key()) == Some(&rq.id)
            && self.ends[d].get(&(rq.sector_end(), rq.id)) == Some(&rq.id)
    }

    /// Oldest request of direction `dir` whose range ends exactly at `sector`.
    pub fn ending_at(&self, sector: Sector, dir: Direction) -> Option<RequestId> {
        self.ends[dir.index()]
            .range((sector, RequestId::MIN)..=(sector, RequestId::MAX))
            .next()
            .map(|(_, &id)| id)
    }

    /// Nearest request starting strictly below `sector`.
    pub fn predecessor(&self, sector: Sector, dir: Option<Direction>) -> Option<SortEntry> {
        self.pick(dir, true, |tree| {
            tree.range(..(sector, RequestId::MIN)).next_back()
        })
    }

    /// Nearest request starting at or above `sector`.
    pub fn successor(&self, sector: Sector, dir: Option<Direction>) -> Option<SortEntry> {
        self.pick(dir, false, |tree| tree.range((sector, RequestId::MIN)..).next())
    }

    /// The request sorted immediately before `rq`, in either direction.
    pub fn former(&self, rq: &Request) -> Option<SortEntry> {
        let key = rq.sort_key();
        self.pick(None, true, |tree| tree.range(..key).next_back())
    }

    /// The request sorted immediately after `rq`, in either direction.
    pub fn latter(&self, rq: &Request) -> Option<SortEntry> {
        let key = rq.sort_key();
        self.pick(None, false, |tree| {
            tree.range((Bound::Excluded(key), Bound::Unbounded)).next()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.trees.iter().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(
            self.trees.iter().map(BTreeMap::len).sum::<usize>(),
            self.ends.iter().map(BTreeMap::len).sum::<usize>()
        );
        self.trees.iter().map(BTreeMap::len).sum()
    }

    /// Number of indexed requests in one direction.
    pub fn len_dir(&self, dir: Direction) -> usize {
        self.trees[dir.index()].len()
    }

    /// Every indexed request in `(sector, insertion)` order.
    pub fn ordered(&self) -> Vec<SortEntry> {
        let mut all: Vec<(SortKey, SortEntry)> = Vec::with_capacity(self.len());
        for dir in [Direction::Read, Direction::Write] {
            for (&key, &id) in &self.trees[dir.index()] {
                all.push((key, SortEntry { sector: key.0, id }));
            }
        }
        all.sort_by_key(|(key, _)| *key);
        all.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Run `lookup` on the selected trees and keep the closest hit: the largest
    /// key when searching downward, the smallest when searching upward.
    fn pick<'a, F>(&'a self, dir: Option<Direction>, downward: bool, lookup: F) -> Option<SortEntry>
    where
        F: Fn(&'a BTreeMap<SortKey, RequestId>) -> Option<(&'a SortKey, &'a RequestId)>,
    {
        let dirs: &[Direction] = match dir {
            Some(Direction::Read) => &[Direction::Read],
            Some(Direction::Write) => &[Direction::Write],
            None => &[Direction::Read, Direction::Write],
        };

        let mut best: Option<(SortKey, SortEntry)> = None;
        for &d in dirs {
            let Some((&key, &id)) = lookup(&self.trees[d.index()]) else {
                continue;
            };
            let closer = match best {
                None => true,
                Some((best_key, _)) if downward => key > best_key,
                Some((best_key, _)) => key < best_key,
            };
            if closer {
                best = Some((key, SortEntry { sector: key.0, id }));
            }
        }
        best.map(|(_, entry)| entry)
    }
}
