//! Full-state capture and restore.
//!
//! The serialized-state size is sampled once at session open and treated as
//! fixed for the session's lifetime. Cores whose reported size drifts
//! afterwards cannot be snapshotted reliably, and capture fails with
//! [`SerializeError::SizeChanged`] rather than silently recording garbage.

use crate::binding::CoreBinding;
use crate::error::SerializeError;
use crate::snapshot::StateSnapshot;

/// Captures and restores full core state at a fixed size.
pub struct StateSerializer {
    size: usize,
}

impl StateSerializer {
    /// Sample the core's state size and pin it for this serializer.
    ///
    /// Fails with [`SerializeError::Unsupported`] when the core does not
    /// provide serialization. A reported size of zero is accepted; such
    /// cores produce empty snapshots.
    pub fn new(binding: &mut CoreBinding) -> Result<Self, SerializeError> {
        let size = binding.serialize_size()?;
        log::debug!("state size pinned at {size} bytes");
        Ok(Self { size })
    }

    /// The pinned state size in bytes.
    pub fn state_size(&self) -> usize {
        self.size
    }

    /// Capture the core's current state into a fresh snapshot.
    pub fn capture(&self, binding: &mut CoreBinding) -> Result<StateSnapshot, SerializeError> {
        let actual = binding.serialize_size()?;
        if actual != self.size {
            return Err(SerializeError::SizeChanged {
                expected: self.size,
                actual,
            });
        }
        let mut snapshot = StateSnapshot::zeroed(self.size);
        if self.size > 0 {
            binding.serialize_into(snapshot.data_mut())?;
        }
        Ok(snapshot)
    }

    /// Push a previously captured snapshot back into the core.
    pub fn restore(
        &self,
        binding: &mut CoreBinding,
        snapshot: &StateSnapshot,
    ) -> Result<(), SerializeError> {
        if snapshot.len() != self.size {
            return Err(SerializeError::LengthMismatch {
                len: snapshot.len(),
                expected: self.size,
            });
        }
        if self.size > 0 {
            binding.unserialize(snapshot.data())?;
        }
        Ok(())
    }
}
