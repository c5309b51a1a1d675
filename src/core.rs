use thiserror::Error;

use crate::{input::InputError, session::SessionError};

/// Errors that stop the daemon.
///
/// Audio-protocol hiccups never show up here; the session logs them and the
/// next notification re-synchronizes the cache. Only startup failures and a
/// lost display or audio connection reach the process boundary.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The audio session could not be established.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Display connection or key-grab failure.
    #[error(transparent)]
    Input(#[from] InputError),

    /// The audio connection failed or terminated after startup.
    #[error("audio connection closed")]
    SessionClosed,

    /// The event loop was asked to quit by the audio client library.
    #[error("event loop stopped with status {0}")]
    MainloopQuit(i32),

    /// Signal handler registration failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Convenience alias for daemon results.
pub type Result<T> = std::result::Result<T, DaemonError>;
