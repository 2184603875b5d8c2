//! XOR-delta rewind history
//!
//! One delta record is appended per frame, holding only the 4-byte words
//! that changed since the previous snapshot. Because most emulated state
//! (ROM-mapped regions, unused RAM) is static between consecutive frames,
//! history memory is bounded by a small multiple of the hot working set
//! rather than `max_frames * state_size`.
//!
//! XOR is its own inverse: re-applying the newest record to the cached live
//! snapshot reconstructs the previous frame's state exactly, so stepping
//! backward is a pop from the back of the ring.

use bytemuck::{Pod, Zeroable};

use crate::error::SerializeError;
use crate::snapshot::{StateSnapshot, WORD_SIZE};

/// One changed word between two consecutive snapshots.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DeltaPair {
    /// Word index into the snapshot (byte offset / 4).
    pub index: u32,
    /// XOR of the old and new word values.
    pub xor: u32,
}

/// The set of changed words between two consecutive snapshots.
#[derive(Debug, Clone, Default)]
pub struct DeltaRecord {
    pairs: Vec<DeltaPair>,
    /// XOR of the trailing partial word's bytes, when the snapshot length is
    /// not a multiple of [`WORD_SIZE`]. All zeros when unchanged.
    tail_xor: [u8; WORD_SIZE - 1],
}

impl DeltaRecord {
    /// Changed full words, in ascending index order.
    pub fn pairs(&self) -> &[DeltaPair] {
        &self.pairs
    }

    /// True when the record changes nothing.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.tail_xor.iter().all(|b| *b == 0)
    }

    fn clear(&mut self) {
        // Keeps the Vec's capacity so evicted slots are reused without
        // reallocating.
        self.pairs.clear();
        self.tail_xor = [0; WORD_SIZE - 1];
    }

    fn diff(&mut self, old: &[u8], new: &[u8]) {
        debug_assert_eq!(old.len(), new.len());
        self.clear();

        let old_words = old.chunks_exact(WORD_SIZE);
        let new_words = new.chunks_exact(WORD_SIZE);
        let old_tail = old_words.remainder();
        let new_tail = new_words.remainder();

        for (index, (o, n)) in old_words.zip(new_words).enumerate() {
            let xor = u32::from_le_bytes(o.try_into().unwrap())
                ^ u32::from_le_bytes(n.try_into().unwrap());
            if xor != 0 {
                self.pairs.push(DeltaPair {
                    index: index as u32,
                    xor,
                });
            }
        }

        for (i, (o, n)) in old_tail.iter().zip(new_tail).enumerate() {
            self.tail_xor[i] = o ^ n;
        }
    }

    fn apply(&self, state: &mut [u8]) {
        for pair in &self.pairs {
            let at = pair.index as usize * WORD_SIZE;
            let word: [u8; WORD_SIZE] = state[at..at + WORD_SIZE].try_into().unwrap();
            let value = u32::from_le_bytes(word) ^ pair.xor;
            state[at..at + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
        }

        let tail_at = (state.len() / WORD_SIZE) * WORD_SIZE;
        for (byte, xor) in state[tail_at..].iter_mut().zip(&self.tail_xor) {
            *byte ^= xor;
        }
    }
}

/// Fixed-capacity circular buffer of [`DeltaRecord`] slots.
///
/// Arena plus head/length indices: push-back (with front eviction when
/// full), pop-back and clear are all O(1) and never reallocate the ring.
/// Slot `Vec`s retain their capacity across reuse.
#[derive(Debug)]
pub struct DeltaRing {
    slots: Vec<DeltaRecord>,
    head: usize,
    len: usize,
}

impl DeltaRing {
    /// Create a ring holding at most `capacity` records. `capacity` must be
    /// nonzero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "DeltaRing capacity must be nonzero");
        Self {
            slots: (0..capacity).map(|_| DeltaRecord::default()).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The newest record, if any.
    pub fn back(&self) -> Option<&DeltaRecord> {
        if self.len == 0 {
            return None;
        }
        Some(&self.slots[(self.head + self.len - 1) % self.capacity()])
    }

    /// Claim the next back slot, evicting the oldest record when full.
    /// The returned slot is cleared and ready to fill.
    fn push_slot(&mut self) -> &mut DeltaRecord {
        let capacity = self.capacity();
        if self.len == capacity {
            // Evicting the front only forgets frames older than the rewind
            // window; nothing is applied to live state.
            self.head = (self.head + 1) % capacity;
        } else {
            self.len += 1;
        }
        let index = (self.head + self.len - 1) % capacity;
        let slot = &mut self.slots[index];
        slot.clear();
        slot
    }

    /// Remove and return the newest record. The slot's storage stays in the
    /// arena for reuse.
    fn pop_back(&mut self) -> Option<&DeltaRecord> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(&self.slots[(self.head + self.len) % self.slots.len()])
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Bounded backward-stepping history over full-state snapshots.
///
/// Owns the cached live snapshot and the delta ring; no other component
/// keeps a reference to either. Invariant: applying every record in the
/// ring, oldest to newest, to the state preceding the oldest record yields
/// the cached live snapshot exactly.
pub struct RewindEngine {
    last: StateSnapshot,
    ring: DeltaRing,
}

impl RewindEngine {
    /// Start a history from the session's initial snapshot, keeping at most
    /// `max_frames` frames of deltas.
    pub fn new(initial: StateSnapshot, max_frames: usize) -> Self {
        Self {
            last: initial,
            ring: DeltaRing::new(max_frames.max(1)),
        }
    }

    /// Record the delta from the cached snapshot to `new` and make `new`
    /// the live snapshot. When the history is full the oldest record is
    /// discarded first: rewind capability degrades, memory does not grow.
    pub fn capture(&mut self, new: StateSnapshot) -> Result<(), SerializeError> {
        if new.len() != self.last.len() {
            return Err(SerializeError::LengthMismatch {
                len: new.len(),
                expected: self.last.len(),
            });
        }
        let record = self.ring.push_slot();
        record.diff(self.last.data(), new.data());
        self.last = new;
        Ok(())
    }

    /// Step the cached snapshot backward by up to `frames` frames.
    ///
    /// Returns the number of records actually popped, less than requested
    /// when history runs out, never an error. Consumed history is gone:
    /// there is no redo, and subsequent captures overwrite the future.
    pub fn rewind(&mut self, frames: usize) -> usize {
        let mut rewound = 0;
        while rewound < frames {
            let Some(record) = self.ring.pop_back() else {
                break;
            };
            record.apply(self.last.data_mut());
            rewound += 1;
        }
        rewound
    }

    /// Frames currently available to rewind.
    pub fn available_frames(&self) -> usize {
        self.ring.len()
    }

    /// Configured history capacity.
    pub fn max_frames(&self) -> usize {
        self.ring.capacity()
    }

    /// Drop all history and restart from `current` (e.g. after a core
    /// reset or a savestate restore).
    pub fn reset(&mut self, current: StateSnapshot) {
        self.ring.clear();
        self.last = current;
    }

    /// The cached live snapshot, always equal to the core's state as of
    /// the most recent capture or rewind.
    pub fn last_snapshot(&self) -> &StateSnapshot {
        &self.last
    }

    /// Read access to the delta history (diagnostics).
    pub fn history(&self) -> &DeltaRing {
        &self.ring
    }
}
