//! Slot replacement for the node cache.

use crate::slot::SlotId;
use parking_lot::Mutex;

/// Chooses which filled cache slot to reuse when the cache is full.
pub trait Replacer: Send + Sync {
    /// Starts tracking a freshly filled slot.
    fn admit(&self, slot: SlotId);

    /// Records that the node in `slot` was read.
    fn record_access(&self, slot: SlotId);

    /// Picks a victim and stops tracking it.
    ///
    /// Returns None when no slot is tracked.
    fn evict(&self) -> Option<SlotId>;

    /// Stops tracking a slot.
    fn remove(&self, slot: SlotId);

    /// Returns the number of tracked slots.
    fn size(&self) -> usize;
}

/// Second-chance clock over a fixed ring of slots.
///
/// Every filled slot carries a reference bit that reads set. The hand
/// clears set bits as it sweeps and stops at the first filled slot whose
/// bit is already clear, so a victim is always found within two turns.
pub struct ClockReplacer {
    inner: Mutex<ClockState>,
}

struct ClockState {
    filled: Vec<bool>,
    referenced: Vec<bool>,
    filled_count: usize,
    hand: usize,
}

impl ClockState {
    fn in_range(&self, slot: SlotId) -> bool {
        slot.index() < self.filled.len()
    }
}

impl ClockReplacer {
    /// Creates a clock over `num_slots` slots.
    pub fn new(num_slots: usize) -> Self {
        Self {
            inner: Mutex::new(ClockState {
                filled: vec![false; num_slots],
                referenced: vec![false; num_slots],
                filled_count: 0,
                hand: 0,
            }),
        }
    }

    /// Returns the number of slots on the ring.
    pub fn capacity(&self) -> usize {
        self.inner.lock().filled.len()
    }
}

impl Replacer for ClockReplacer {
    fn admit(&self, slot: SlotId) {
        let mut state = self.inner.lock();
        if !state.in_range(slot) || state.filled[slot.index()] {
            return;
        }
        state.filled[slot.index()] = true;
        state.referenced[slot.index()] = false;
        state.filled_count += 1;
    }

    fn record_access(&self, slot: SlotId) {
        let mut state = self.inner.lock();
        if state.in_range(slot) && state.filled[slot.index()] {
            state.referenced[slot.index()] = true;
        }
    }

    fn evict(&self) -> Option<SlotId> {
        let mut state = self.inner.lock();
        if state.filled_count == 0 {
            return None;
        }

        let ring = state.filled.len();
        for _ in 0..(2 * ring) {
            let pos = state.hand;
            state.hand = (pos + 1) % ring;

            if !state.filled[pos] {
                continue;
            }
            if state.referenced[pos] {
                state.referenced[pos] = false;
                continue;
            }
            state.filled[pos] = false;
            state.filled_count -= 1;
            return Some(SlotId(pos as u32));
        }
        None
    }

    fn remove(&self, slot: SlotId) {
        let mut state = self.inner.lock();
        if state.in_range(slot) && state.filled[slot.index()] {
            state.filled[slot.index()] = false;
            state.referenced[slot.index()] = false;
            state.filled_count -= 1;
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().filled_count
    }
}
