//! Session lifecycle and locking.
//!
//! The controller is the single owner of the core and the only public way
//! to reach it. Cores are not reentrant and not thread-safe, so every
//! public operation takes one exclusive lock for its whole duration; the
//! frame loop and control operations (save, load, reset, close) arriving
//! from other threads serialize on it.
//!
//! Phase machine: `Unloaded -> Loaded -> Open -> Playing`. `Playing` is a
//! sub-state of `Open` entered on the first frame; operations that require
//! an open session accept both.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::binding::{CoreBinding, CoreEngine};
use crate::callbacks::{FrameCallbacks, PixelFormat};
use crate::config::HostConfig;
use crate::error::{SerializeError, SessionError, StateError};
use crate::input::MAX_PORTS;
use crate::rewind::RewindEngine;
use crate::runner::FrameRunner;
use crate::savestate;
use crate::serializer::StateSerializer;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No core loaded.
    Unloaded,
    /// Core loaded, no content open.
    Loaded,
    /// Content open, no frame run yet.
    Open,
    /// Content open and at least one frame has run.
    Playing,
}

/// Region code declared by the core for the open content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Ntsc,
    Pal,
    Unknown(u32),
}

impl Region {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Region::Ntsc,
            1 => Region::Pal,
            other => Region::Unknown(other),
        }
    }
}

/// One open game. Exists between a successful `open_file` and the matching
/// `close_file`.
#[derive(Debug, Clone)]
pub struct Session {
    /// Path the content was identified by.
    pub content_path: PathBuf,
    /// Declared video frame rate in frames per second.
    pub frame_rate: f64,
    /// Declared audio sample rate in Hz.
    pub sample_rate: f64,
    /// Declared region.
    pub region: Region,
    /// Pixel format negotiated at open.
    pub pixel_format: PixelFormat,
    playing: bool,
}

impl Session {
    /// True once at least one frame has run since open.
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

enum ControllerState {
    Unloaded,
    Loaded(CoreBinding),
    Open {
        runner: FrameRunner,
        session: Session,
    },
}

impl ControllerState {
    fn phase(&self) -> SessionPhase {
        match self {
            ControllerState::Unloaded => SessionPhase::Unloaded,
            ControllerState::Loaded(_) => SessionPhase::Loaded,
            ControllerState::Open { session, .. } => {
                if session.playing {
                    SessionPhase::Playing
                } else {
                    SessionPhase::Open
                }
            }
        }
    }
}

/// Owns the one active session and serializes all access to the core.
pub struct SessionController {
    engine: CoreEngine,
    config: HostConfig,
    state: Mutex<ControllerState>,
}

impl SessionController {
    pub fn new(config: HostConfig) -> Self {
        Self {
            engine: CoreEngine::new(),
            config,
            state: Mutex::new(ControllerState::Unloaded),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase()
    }

    /// Metadata of the open session, `None` outside `Open`/`Playing`.
    pub fn session(&self) -> Option<Session> {
        match &*self.lock() {
            ControllerState::Open { session, .. } => Some(session.clone()),
            _ => None,
        }
    }

    /// Load a core module from its bytes. `Unloaded -> Loaded`; a no-op
    /// returning success when a core is already loaded.
    pub fn load_module(&self, module_bytes: &[u8]) -> Result<(), SessionError> {
        let mut state = self.lock();
        if !matches!(&*state, ControllerState::Unloaded) {
            return Ok(());
        }
        let binding = CoreBinding::load(&self.engine, module_bytes)?;
        *state = ControllerState::Loaded(binding);
        Ok(())
    }

    /// Tear everything down, from any phase. Closes content first when
    /// open; always safe, including when nothing is loaded.
    pub fn deinit(&self) {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, ControllerState::Unloaded) {
            ControllerState::Unloaded => {}
            ControllerState::Loaded(mut binding) => binding.unload(),
            ControllerState::Open { runner, .. } => {
                let mut binding = runner.close();
                binding.unload();
            }
        }
    }

    /// Open content on the loaded core. `Loaded -> Open`.
    ///
    /// On success, the core's timing info is sampled, an initial snapshot
    /// is taken and rewind recording starts (when supported and enabled).
    /// On failure the core stays loaded and content-free.
    pub fn open_file(
        &self,
        content_path: &Path,
        content: &[u8],
        callbacks: Box<dyn FrameCallbacks>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        let mut binding = match std::mem::replace(&mut *state, ControllerState::Unloaded) {
            ControllerState::Loaded(binding) => binding,
            other => {
                let phase = other.phase();
                *state = other;
                return Err(StateError {
                    op: "open_file",
                    phase,
                }
                .into());
            }
        };

        binding.set_callbacks(Some(callbacks));
        if let Err(e) = binding.open_content(content) {
            binding.set_callbacks(None);
            *state = ControllerState::Loaded(binding);
            return Err(e.into());
        }

        let av = match binding.av_info() {
            Ok(av) => av,
            Err(e) => {
                binding.close_content();
                binding.set_callbacks(None);
                *state = ControllerState::Loaded(binding);
                return Err(e.into());
            }
        };

        let serializer = match StateSerializer::new(&mut binding) {
            Ok(s) => Some(s),
            Err(SerializeError::Unsupported) => {
                log::info!("core has no state serialization, rewind unavailable");
                None
            }
            Err(e) => {
                log::warn!("state size query failed, rewind unavailable: {e}");
                None
            }
        };

        let rewind = self.start_recording(&mut binding, serializer.as_ref());

        let session = Session {
            content_path: content_path.to_path_buf(),
            frame_rate: av.frame_rate,
            sample_rate: av.sample_rate,
            region: Region::from_raw(av.region),
            pixel_format: binding.pixel_format(),
            playing: false,
        };
        log::info!(
            "content open: {} ({:.2} fps, {:.1} Hz, {:?})",
            content_path.display(),
            session.frame_rate,
            session.sample_rate,
            session.region
        );

        *state = ControllerState::Open {
            runner: FrameRunner::new(binding, serializer, rewind),
            session,
        };
        Ok(())
    }

    fn start_recording(
        &self,
        binding: &mut CoreBinding,
        serializer: Option<&StateSerializer>,
    ) -> Option<RewindEngine> {
        let serializer = serializer?;
        if !self.config.rewind.enabled || self.config.rewind.max_frames == 0 {
            return None;
        }
        match serializer.capture(binding) {
            Ok(initial) => Some(RewindEngine::new(initial, self.config.rewind.max_frames)),
            Err(e) => {
                log::warn!("initial state capture failed, rewind unavailable: {e}");
                None
            }
        }
    }

    /// Close the open content. `Open/Playing -> Loaded`.
    pub fn close_file(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, ControllerState::Unloaded) {
            ControllerState::Open { runner, session } => {
                log::info!("content closed: {}", session.content_path.display());
                *state = ControllerState::Loaded(runner.close());
                Ok(())
            }
            other => {
                let phase = other.phase();
                *state = other;
                Err(StateError {
                    op: "close_file",
                    phase,
                }
                .into())
            }
        }
    }

    /// Advance the open content by exactly one frame.
    pub fn run_frame(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, session) = Self::open_mut(&mut state, "run_frame")?;
        runner.run_frame()?;
        session.playing = true;
        Ok(())
    }

    /// Step up to `frames` frames backwards; returns the count actually
    /// rewound. Never fails for asking too much: the answer saturates at
    /// the available history, and is 0 whenever rewind is unavailable.
    pub fn rewind_frames(&self, frames: usize) -> Result<usize, SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "rewind_frames")?;
        let rewound = runner.rewind_frames(frames)?;
        if rewound > 0 {
            log::debug!("rewound {rewound} frames");
        }
        Ok(rewound)
    }

    /// Frames currently available to rewind.
    pub fn available_frames(&self) -> usize {
        match &*self.lock() {
            ControllerState::Open { runner, .. } => runner.available_frames(),
            _ => 0,
        }
    }

    /// Rewind history capacity for the open session, 0 when rewind is not
    /// recording.
    pub fn max_frames(&self) -> usize {
        match &*self.lock() {
            ControllerState::Open { runner, .. } => runner.max_frames(),
            _ => 0,
        }
    }

    /// Reset the running game. Rewind history restarts from the post-reset
    /// state.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "reset")?;
        runner.reset()?;
        Ok(())
    }

    /// Assign a device class to an input port. Ports beyond the supported
    /// range are ignored with a warning.
    pub fn set_device(&self, port: u32, device: u32) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "set_device")?;
        if port as usize >= MAX_PORTS {
            log::warn!("set_device: port {port} is out of range, ignored");
            return Ok(());
        }
        runner.binding_mut().set_device(port, device)?;
        Ok(())
    }

    /// Deliver a keyboard event to the core.
    pub fn send_keyboard_event(
        &self,
        down: bool,
        keycode: u32,
        character: u32,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "send_keyboard_event")?;
        runner
            .binding_mut()
            .send_keyboard_event(down, keycode, character)?;
        Ok(())
    }

    /// Capture the current state and write it to a savestate file.
    pub fn save_state_to(&self, path: &Path) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "save_state_to")?;
        let snapshot = runner.capture_state()?;
        savestate::write(path, &snapshot)?;
        Ok(())
    }

    /// Read a savestate file and push it into the core. Rewind history
    /// restarts from the restored state.
    pub fn load_state_from(&self, path: &Path) -> Result<(), SessionError> {
        let mut state = self.lock();
        let (runner, _) = Self::open_mut(&mut state, "load_state_from")?;
        let snapshot = savestate::read(path)?;
        runner.restore_state(&snapshot)?;
        log::info!("savestate restored: {}", path.display());
        Ok(())
    }

    fn open_mut<'a>(
        state: &'a mut ControllerState,
        op: &'static str,
    ) -> Result<(&'a mut FrameRunner, &'a mut Session), StateError> {
        match state {
            ControllerState::Open { runner, session } => Ok((runner, session)),
            other => Err(StateError {
                op,
                phase: other.phase(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        // A poisoned lock means a core call panicked mid-operation; the
        // state machine itself is still coherent, so keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.deinit();
    }
}
