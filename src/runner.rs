//! Frame stepping with rewind recording.
//!
//! Wraps a loaded core with open content and drives it one frame at a
//! time. When the core supports serialization a snapshot is captured after
//! every frame and folded into the delta ring, so recent frames can be
//! stepped backwards on demand.
//!
//! Recording failures degrade rather than abort: a capture error disables
//! rewind for the rest of the session but gameplay continues.

use crate::binding::CoreBinding;
use crate::error::{BindingError, SerializeError};
use crate::rewind::RewindEngine;
use crate::serializer::StateSerializer;
use crate::snapshot::StateSnapshot;

/// Drives one open piece of content on a loaded core.
pub struct FrameRunner {
    binding: CoreBinding,
    serializer: Option<StateSerializer>,
    rewind: Option<RewindEngine>,
}

impl FrameRunner {
    /// Assemble a runner around a core that already has content open.
    ///
    /// `serializer` is `None` for cores without serialization support, and
    /// `rewind` is `None` when rewind is disabled or unavailable.
    pub(crate) fn new(
        binding: CoreBinding,
        serializer: Option<StateSerializer>,
        rewind: Option<RewindEngine>,
    ) -> Self {
        Self {
            binding,
            serializer,
            rewind,
        }
    }

    pub(crate) fn binding_mut(&mut self) -> &mut CoreBinding {
        &mut self.binding
    }

    /// Fixed serialized-state size, when the core supports serialization.
    pub fn state_size(&self) -> Option<usize> {
        self.serializer.as_ref().map(|s| s.state_size())
    }

    /// Whether rewind is currently recording.
    pub fn rewind_enabled(&self) -> bool {
        self.rewind.is_some()
    }

    /// Number of frames currently available to rewind.
    pub fn available_frames(&self) -> usize {
        self.rewind.as_ref().map_or(0, |r| r.available_frames())
    }

    /// History capacity, 0 when rewind is not recording.
    pub fn max_frames(&self) -> usize {
        self.rewind.as_ref().map_or(0, |r| r.max_frames())
    }

    /// Advance one frame, recording it into the rewind history.
    pub fn run_frame(&mut self) -> Result<(), BindingError> {
        self.binding.run_frame()?;
        self.record_frame();
        Ok(())
    }

    fn record_frame(&mut self) {
        let (Some(serializer), Some(rewind)) = (&self.serializer, &mut self.rewind) else {
            return;
        };
        let result = serializer
            .capture(&mut self.binding)
            .and_then(|snapshot| rewind.capture(snapshot));
        if let Err(e) = result {
            log::warn!("state capture failed, rewind disabled: {e}");
            self.rewind = None;
        }
    }

    /// Step up to `frames` frames backwards.
    ///
    /// Returns the number of frames actually rewound, which is less than
    /// requested when history runs out and zero when rewind is
    /// unavailable. The core's state is restored once, at the final
    /// position.
    pub fn rewind_frames(&mut self, frames: usize) -> Result<usize, SerializeError> {
        let (Some(serializer), Some(rewind)) = (&self.serializer, &mut self.rewind) else {
            return Ok(0);
        };
        let rewound = rewind.rewind(frames);
        if rewound > 0 {
            serializer.restore(&mut self.binding, rewind.last_snapshot())?;
        }
        Ok(rewound)
    }

    /// Reset the running game and restart rewind history from the
    /// post-reset state.
    pub fn reset(&mut self) -> Result<(), BindingError> {
        self.binding.reset()?;
        if let (Some(serializer), Some(rewind)) = (&self.serializer, &mut self.rewind) {
            match serializer.capture(&mut self.binding) {
                Ok(snapshot) => rewind.reset(snapshot),
                Err(e) => {
                    log::warn!("state capture failed after reset, rewind disabled: {e}");
                    self.rewind = None;
                }
            }
        }
        Ok(())
    }

    /// Capture the current full state, for savestates.
    pub fn capture_state(&mut self) -> Result<StateSnapshot, SerializeError> {
        let serializer = self
            .serializer
            .as_ref()
            .ok_or(SerializeError::Unsupported)?;
        serializer.capture(&mut self.binding)
    }

    /// Restore a full state captured earlier. Rewind history restarts from
    /// the restored state; frames recorded before the restore are gone.
    pub fn restore_state(&mut self, snapshot: &StateSnapshot) -> Result<(), SerializeError> {
        let serializer = self
            .serializer
            .as_ref()
            .ok_or(SerializeError::Unsupported)?;
        serializer.restore(&mut self.binding, snapshot)?;
        if let Some(rewind) = &mut self.rewind {
            rewind.reset(snapshot.clone());
        }
        Ok(())
    }

    /// Close the content and hand the core back for reuse or teardown.
    /// Always succeeds; a trapping `unload_content` is logged and dropped.
    pub(crate) fn close(mut self) -> CoreBinding {
        self.binding.close_content();
        self.binding.set_callbacks(None);
        self.binding
    }
}
