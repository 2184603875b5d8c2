//! Error taxonomy for the core host
//!
//! Binding and open failures leave session state unchanged; serialize
//! failures during playback degrade rewind recording instead of aborting
//! the frame loop. No operation retries internally.

use thiserror::Error;

use crate::session::SessionPhase;

/// Error loading or calling into a core module.
///
/// Fatal to `load_module`; the session stays `Unloaded`.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The bytes could not be compiled as a core module.
    #[error("not a loadable core module: {0}")]
    InvalidModule(anyhow::Error),

    /// The module compiled but could not be instantiated against the
    /// host's callback imports.
    #[error("core module could not be instantiated: {0}")]
    Instantiate(anyhow::Error),

    /// A required export is absent or has the wrong signature.
    #[error("core is missing required export `{0}`")]
    MissingExport(&'static str),

    /// A resolved entry point trapped.
    #[error("core `{entry}` call failed: {cause}")]
    Call {
        entry: &'static str,
        cause: anyhow::Error,
    },
}

/// Error opening content in a loaded core.
///
/// The session stays `Loaded`; no content is left partially loaded.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The core's `load_content` entry point returned failure.
    #[error("core rejected the content")]
    Rejected,

    /// The `load_content` call itself trapped.
    #[error("core `load_content` call failed: {0}")]
    Call(anyhow::Error),
}

/// Error capturing or restoring serialized core state.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// The core does not export the serialization entry points.
    #[error("core does not support state serialization")]
    Unsupported,

    /// The core reported a different serialized-state size than it did at
    /// session open. The size may change only between sessions; this is a
    /// fatal integrity error.
    #[error("serialized-state size changed mid-session: expected {expected}, core now reports {actual}")]
    SizeChanged { expected: usize, actual: usize },

    /// A snapshot's length does not match the session's serialized-state
    /// size.
    #[error("snapshot length {len} does not match serialized-state size {expected}")]
    LengthMismatch { len: usize, expected: usize },

    /// The core's entry point reported failure.
    #[error("core rejected `{entry}`")]
    Rejected { entry: &'static str },

    /// The call into the core trapped.
    #[error("core `{entry}` call failed: {cause}")]
    Call {
        entry: &'static str,
        cause: anyhow::Error,
    },
}

/// An operation was invoked in the wrong session phase.
///
/// Programming-contract violation: reported immediately, no partial effect.
#[derive(Debug, Clone, Error)]
#[error("`{op}` is not valid in the {phase:?} phase")]
pub struct StateError {
    /// Name of the rejected operation.
    pub op: &'static str,
    /// Phase the session was in when the operation arrived.
    pub phase: SessionPhase,
}

/// Any error surfaced by [`SessionController`](crate::SessionController)
/// operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Filesystem failure while reading or writing a savestate file.
    #[error("savestate file error: {0}")]
    Savestate(#[from] std::io::Error),
}
