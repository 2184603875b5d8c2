//! Corewind - Emulation core host with rewind
//!
//! This crate hosts a pluggable emulation core (a WASM module implementing
//! a fixed export interface), drives it one discrete frame at a time, and
//! records bounded XOR-delta state history so recent gameplay can be
//! stepped backwards.
//!
//! # Architecture
//!
//! - [`CoreBinding`] - Loads the core module and owns its lifetime
//! - [`StateSerializer`] - Full-state capture/restore at a fixed size
//! - [`RewindEngine`] - Bounded delta history over state snapshots
//! - [`FrameRunner`] - Frame stepping with per-frame history recording
//! - [`SessionController`] - Session lifecycle and the lock that
//!   serializes every call into the core

pub mod binding;
pub mod callbacks;
pub mod config;
pub mod error;
mod ffi;
pub mod input;
#[cfg(test)]
mod integration;
pub mod rewind;
pub mod runner;
pub mod savestate;
pub mod serializer;
pub mod session;
pub mod snapshot;

// Re-export the session surface
pub use session::{Region, Session, SessionController, SessionPhase};

// Re-export the core-facing types
pub use binding::{AvInfo, CoreBinding, CoreEngine};
pub use callbacks::{FrameCallbacks, NullCallbacks, PixelFormat};
pub use config::{HostConfig, RewindConfig, SavestateConfig};
pub use runner::FrameRunner;
pub use serializer::StateSerializer;

// Re-export rewind types
pub use rewind::{DeltaPair, DeltaRecord, DeltaRing, RewindEngine};
pub use snapshot::{StateSnapshot, WORD_SIZE};

// Re-export input helpers
pub use input::{
    InputTable, JoypadState, DEVICE_ANALOG, DEVICE_JOYPAD, DEVICE_KEYBOARD, DEVICE_LIGHTGUN,
    DEVICE_MOUSE, DEVICE_NONE, JOYPAD_IDS, MAX_PORTS,
};

// Re-export the error taxonomy
pub use error::{BindingError, OpenError, SerializeError, SessionError, StateError};
