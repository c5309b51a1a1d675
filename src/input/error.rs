use x11rb::{
    errors::{ConnectError, ConnectionError, ReplyError},
    protocol::xproto::Keycode,
};

/// Errors from the display connection and key grabbing.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    /// The display could not be opened.
    #[error("cannot open display: {0}")]
    Connect(#[from] ConnectError),

    /// The advertised screen does not exist.
    #[error("cannot acquire screen {0}")]
    NoScreen(usize),

    /// Another client already holds one of the grabs.
    ///
    /// Exclusivity on every modifier combination is required to see the key
    /// in every keyboard-lock state, so a single conflict aborts startup.
    #[error("cannot grab keycode {keycode} with modifier mask {modifiers:#06x}: {source}")]
    GrabDenied {
        /// Keycode the grab was issued for.
        keycode: Keycode,
        /// Exact modifier mask of the failed combination.
        modifiers: u16,
        /// Server error for the grab request.
        source: ReplyError,
    },

    /// The display connection dropped or errored.
    #[error("display connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The display descriptor could not be registered with the reactor.
    #[error("cannot watch display descriptor: {0}")]
    Watch(#[from] std::io::Error),
}
