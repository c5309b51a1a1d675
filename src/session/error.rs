use libpulse_binding::{context::State, error::PAErr};

/// Errors establishing the audio session.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The client context could not be allocated.
    #[error("failed to create PulseAudio context")]
    ContextCreation,

    /// The connection attempt was rejected outright.
    #[error("PulseAudio connection failed: {0}")]
    ConnectionFailed(String),

    /// The context settled in a state other than ready.
    #[error("PulseAudio context entered {0:?} instead of becoming ready")]
    NeverReady(State),

    /// The event loop quit while waiting for the context.
    #[error("event loop quit during connection (status {0})")]
    MainloopQuit(i32),
}

impl SessionError {
    /// Wrap the library error from a rejected connection attempt.
    ///
    /// `PAErr` has an inherent `to_string` returning `Option<String>` that
    /// shadows `Display::to_string`; an unknown code renders as empty.
    pub(crate) fn connect_failure(e: PAErr) -> Self {
        Self::ConnectionFailed(e.to_string().unwrap_or_default())
    }
}
