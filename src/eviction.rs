//! An [EvictionPolicy] decides which entry of an [crate::ObjectPool] goes next when the pool is over budget.
//!
//! This is implemented as a vec-backed linked list of recency records plus an auxiliary hash-based index from entry id
//! to slot, kept apart from the pool's lookup table.  Hits never touch the list: each record shares a "referenced" flag
//! with its pool entry, and a hit only sets that flag.  When looking for a victim we walk from the tail, giving flagged
//! records a second chance by clearing the flag and moving them to the head.  The resulting order is only
//! approximately least-recently-used, which is all the pool promises.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;

struct OccupiedRecord<K> {
    key: K,
    id: u64,
    cost: usize,
    referenced: Arc<AtomicBool>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptyRecord {
    next_empty: Option<usize>,
}

enum Record<K> {
    /// This record is empty, possibly with a pointer at the next empty record.
    Empty(EmptyRecord),
    /// This record is occupied, and doubly linked to the previous and next record.
    Occupied(OccupiedRecord<K>),
}

impl<K> Record<K> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedRecord<K> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Record should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedRecord<K> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Record should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyRecord {
        match self {
            Record::Empty(ref mut x) => x,
            _ => panic!("Record should be empty"),
        }
    }
}

/// An entry chosen for eviction.  It has already been forgotten by the policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Victim<K> {
    pub key: K,
    pub id: u64,
    pub cost: usize,
}

pub struct EvictionPolicy<K> {
    records: Vec<Record<K>>,
    /// Points from an entry id at the index of its record.
    index: HashMap<u64, usize, RandomState>,
    head: Option<usize>,
    tail: Option<usize>,
    empty_head: Option<usize>,
    /// Sum of the costs of every record.
    tracked_cost: usize,
}

impl<K> Default for EvictionPolicy<K> {
    fn default() -> Self {
        EvictionPolicy {
            records: Default::default(),
            index: Default::default(),
            head: None,
            tail: None,
            empty_head: None,
            tracked_cost: 0,
        }
    }
}

impl<K: Clone> EvictionPolicy<K> {
    pub fn new() -> EvictionPolicy<K> {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn tracked_cost(&self) -> usize {
        self.tracked_cost
    }

    /// Entirely unlink an occupied index from the list.
    fn unlink_index(&mut self, index: usize) {
        if Some(index) == self.tail {
            self.tail = self.records[index].as_occupied().prev;
        }

        if Some(index) == self.head {
            self.head = self.records[index].as_occupied().next;
            if let Some(n) = self.head {
                self.records[n].as_occupied_mut().prev = None;
            }
            return;
        }

        let old_prev = self.records[index].as_occupied().prev;
        let old_next = self.records[index].as_occupied().next;
        if let Some(p) = old_prev {
            self.records[p].as_occupied_mut().next = old_next;
        }
        if let Some(n) = old_next {
            self.records[n].as_occupied_mut().prev = old_prev;
        }
    }

    /// Link an occupied, currently unlinked index in as the head.
    fn link_at_head(&mut self, index: usize) {
        let old_head = self.head;
        {
            let rec = self.records[index].as_occupied_mut();
            rec.prev = None;
            rec.next = old_head;
        }
        if let Some(h) = old_head {
            self.records[h].as_occupied_mut().prev = Some(index);
        }
        self.head = Some(index);

        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn make_most_recent(&mut self, index: usize) {
        self.unlink_index(index);
        self.link_at_head(index);
    }

    /// Find an available empty index, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.records[e].as_empty_mut().next_empty;
            return e;
        }

        self.records
            .push(Record::Empty(EmptyRecord { next_empty: None }));
        self.records.len() - 1
    }

    /// Make a specific index become empty, returning what was there.
    fn become_empty(&mut self, index: usize) -> OccupiedRecord<K> {
        self.unlink_index(index);
        let mut old = Record::Empty(EmptyRecord {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.records[index]);
        self.empty_head = Some(index);
        match old {
            Record::Occupied(rec) => {
                self.index.remove(&rec.id);
                self.tracked_cost -= rec.cost;
                rec
            }
            Record::Empty(_) => panic!("Should have been occupied"),
        }
    }

    /// Start tracking a new entry as the most recently used one.
    ///
    /// Ids must be unique; recording an id twice replaces the first record.
    pub fn record(&mut self, key: K, id: u64, cost: usize, referenced: Arc<AtomicBool>) {
        self.forget(id);
        let ind = self.find_empty();
        self.records[ind] = Record::Occupied(OccupiedRecord {
            key,
            id,
            cost,
            referenced,
            prev: None,
            next: None,
        });
        self.link_at_head(ind);
        self.index.insert(id, ind);
        self.tracked_cost += cost;
    }

    /// Stop tracking an entry.  Returns false if the policy didn't know about it, which happens when the entry was
    /// already picked as a victim.
    pub fn forget(&mut self, id: u64) -> bool {
        match self.index.get(&id).copied() {
            Some(ind) => {
                self.become_empty(ind);
                true
            }
            None => false,
        }
    }

    /// Pick and forget the entry to evict next, never choosing `protect`.
    ///
    /// Returns `None` if there is nothing but the protected entry left.
    pub fn select_victim(&mut self, protect: Option<u64>) -> Option<Victim<K>> {
        // Concurrent hits can keep setting flags behind our back, so bound the number of second chances.
        let mut rotations_left = self.len() * 2;
        loop {
            let t = self.tail?;
            let (id, referenced) = {
                let rec = self.records[t].as_occupied();
                (rec.id, rec.referenced.clone())
            };

            if Some(id) == protect {
                if self.len() == 1 {
                    return None;
                }
                self.make_most_recent(t);
                continue;
            }

            if rotations_left > 0 && referenced.swap(false, Ordering::Relaxed) {
                rotations_left -= 1;
                self.make_most_recent(t);
                continue;
            }

            let rec = self.become_empty(t);
            return Some(Victim {
                key: rec.key,
                id: rec.id,
                cost: rec.cost,
            });
        }
    }

    pub fn clear(&mut self) {
        *self = Default::default();
    }

    /// Iterator visiting keys from most to least recently recorded.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        let mut ind = self.head;
        std::iter::from_fn(move || {
            let next = ind?;
            let ret = self.records[next].as_occupied();
            ind = ret.next;
            Some((&ret.key, ret.id))
        })
    }
}
