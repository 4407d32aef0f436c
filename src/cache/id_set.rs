//! Compact mutable set of small task ids.
//!
//! Members live in a flat `u16` array in (mostly) insertion order; slot value
//! `0` marks a hole left by a removal. Ids not above the largest one seen so
//! far refill holes, so churn over a fixed id range never grows the array past
//! the high-water mark of simultaneously live ids. Larger ids always append.
//! The type is not synchronized and must stay owned by one shard context.

use crate::domain::task::TaskId;

const INITIAL_SLOTS: usize = 4;
const EMPTY: TaskId = 0;

#[derive(Debug, Clone, Default)]
pub struct CompactIdSet {
    slots: Vec<TaskId>,
    live: usize,
    gaps: usize,
    max_seen: TaskId,
    reuse_hint: Option<usize>,
    /// Set once an id was placed out of ascending order; binary misses are
    /// then no longer conclusive.
    disordered: bool,
}

impl CompactIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load insert: appends without a membership check.
    ///
    /// Callers guarantee `id` is not already present.
    pub fn init(&mut self, id: TaskId) {
        debug_assert!(id != EMPTY, "task id 0 is reserved");
        if id < self.max_seen {
            self.disordered = true;
        }
        self.append(id);
    }

    /// Idempotent insert. Returns true if `id` was not present before.
    pub fn add(&mut self, id: TaskId) -> bool {
        if id == EMPTY {
            return false;
        }
        if id > self.max_seen {
            self.append(id);
            return true;
        }
        if self.position(id).is_some() {
            return false;
        }

        let slot = self
            .reuse_hint
            .take()
            .filter(|&slot| self.slots.get(slot) == Some(&EMPTY))
            .or_else(|| {
                (self.gaps > 0)
                    .then(|| self.slots.iter().position(|&slot| slot == EMPTY))
                    .flatten()
            });

        match slot {
            Some(slot) => {
                self.slots[slot] = id;
                self.gaps -= 1;
                self.live += 1;
                self.disordered = true;
            }
            None => {
                self.disordered = true;
                self.append(id);
            }
        }
        true
    }

    /// Remove `id` if present. Returns true if it was a member.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(slot) = self.position(id) else {
            return false;
        };
        self.slots[slot] = EMPTY;
        self.live -= 1;
        self.gaps += 1;
        self.reuse_hint = Some(slot);
        true
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots in use, holes included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Live members in slot order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().copied().filter(|&id| id != EMPTY)
    }

    fn append(&mut self, id: TaskId) {
        if self.slots.len() == self.slots.capacity() {
            let grow = self.slots.capacity().max(INITIAL_SLOTS);
            self.slots.reserve_exact(grow);
        }
        self.slots.push(id);
        self.live += 1;
        self.max_seen = self.max_seen.max(id);
    }

    /// Optimistic binary search from the midpoint; falls back to a linear scan
    /// whenever a probe hits a hole or the content is known to be disordered.
    fn position(&self, id: TaskId) -> Option<usize> {
        if id == EMPTY || id > self.max_seen {
            return None;
        }

        let (mut low, mut high) = (0, self.slots.len());
        let mut certain = !self.disordered;
        while low < high {
            let mid = low + (high - low) / 2;
            let probe = self.slots[mid];
            if probe == id {
                return Some(mid);
            }
            if probe == EMPTY {
                certain = false;
                break;
            }
            if probe < id {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        if certain {
            return None;
        }
        self.slots.iter().position(|&slot| slot == id)
    }
}

impl FromIterator<TaskId> for CompactIdSet {
    fn from_iter<I: IntoIterator<Item = TaskId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.add(id);
        }
        set
    }
}
