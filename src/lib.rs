//! Hotkey volume daemon for PulseAudio on X11.
//!
//! Grabs the multimedia volume keys on the root window and applies the
//! corresponding mute/volume changes to the default sink. A single-threaded
//! tokio runtime drives both the display descriptor and the PulseAudio
//! client's event sources, and a locally cached mixer state lets rapid key
//! repeats accumulate without waiting on server round-trips.

/// Key bindings and modifier table.
pub mod config;
/// Top-level error types.
pub mod core;
/// Daemon assembly and event loop.
pub mod daemon;
/// Display connection, key grabs and event decoding.
pub mod input;
/// Cached mixer state of the default sink.
pub mod mixer;
/// Tokio-backed PulseAudio mainloop implementation.
pub mod reactor;
/// Asynchronous PulseAudio control session.
pub mod session;
/// Logging setup.
pub mod tracing_config;

pub use crate::core::{DaemonError, Result};
