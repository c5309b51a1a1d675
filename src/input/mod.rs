//! Display connection, key grabs and event decoding.
//!
//! The daemon claims the volume keycodes on the root window at startup and
//! afterwards drains key events whenever the display descriptor signals
//! readiness. Decoded [`Action`]s are handed to the daemon loop; everything
//! else the server sends is discarded.

/// Key-to-action decoding.
pub mod dispatch;
/// Display and grab errors.
pub mod error;
/// Exact-match key grabbing.
pub mod grab;

use std::os::fd::AsRawFd;

use tokio::io::unix::AsyncFd;
use tracing::info;
use x11rb::{connection::Connection, rust_connection::RustConnection};

pub use dispatch::Action;
pub use error::InputError;

use crate::{config::KeyConfig, reactor::Fd};

/// Connection to the display server with the volume keys grabbed.
pub struct DisplayInput {
    conn: RustConnection,
    watcher: AsyncFd<Fd>,
}

impl DisplayInput {
    /// Connect to the display named by `DISPLAY`, grab the configured keys on
    /// the root window and register the connection descriptor with tokio.
    ///
    /// # Errors
    /// Returns error if the display cannot be opened, the advertised screen
    /// is missing, or any single grab is refused. A refused grab means
    /// another client owns the key; running without it would silently drop
    /// presses, so startup aborts instead.
    pub fn open(config: &KeyConfig) -> Result<Self, InputError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or(InputError::NoScreen(screen_num))?
            .root;

        grab::grab_all(&conn, root, config)?;
        conn.flush()?;
        info!(screen = screen_num, "volume keys grabbed");

        let watcher = AsyncFd::new(Fd(conn.stream().as_raw_fd()))?;
        Ok(Self { conn, watcher })
    }

    /// Wait for display readiness, then drain and decode every queued event.
    ///
    /// Returns the decoded actions in press order; an empty batch is normal
    /// when readiness was spurious or only releases were queued. Draining
    /// until the queue is empty before clearing readiness keeps the
    /// edge-triggered descriptor honest.
    ///
    /// # Errors
    /// Returns error when the display connection breaks.
    pub async fn next_actions(&self, config: &KeyConfig) -> Result<Vec<Action>, InputError> {
        let mut guard = self.watcher.readable().await?;
        let mut actions = Vec::new();
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(action) = dispatch::decode(config, &event) {
                actions.push(action);
            }
        }
        guard.clear_ready();
        Ok(actions)
    }
}
