//! Full-state snapshots
//!
//! A snapshot is an opaque byte buffer whose size and layout are defined
//! entirely by the core. The host treats it as a black box except for the
//! word-level XOR diffing done by the rewind engine.

use xxhash_rust::xxh3::xxh3_64;

/// Width of the words the rewind engine diffs over, in bytes.
pub const WORD_SIZE: usize = 4;

/// A full capture of the core's internal state at one instant.
///
/// Snapshots taken within one session always have the same length; the
/// rewind engine only ever compares equal-length snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    data: Vec<u8>,
}

impl StateSnapshot {
    /// Create a zero-filled snapshot of the given length.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }

    /// Wrap raw serialized state.
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Length of the serialized state in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for cores that report a zero serialized-state size.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of complete diff words; a trailing partial word is handled
    /// byte-wise by the rewind engine.
    pub fn word_count(&self) -> usize {
        self.data.len() / WORD_SIZE
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// xxh3 checksum of the current contents.
    ///
    /// Computed on demand: rewind mutates the cached snapshot in place, so a
    /// stored digest would go stale.
    pub fn checksum(&self) -> u64 {
        xxh3_64(&self.data)
    }
}
