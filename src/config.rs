use x11rb::protocol::xproto::{Keycode, ModMask};

/// Key table the daemon grabs at startup.
///
/// Immutable for the process lifetime; passed into the grabber and the event
/// decoder rather than living in a global so synthetic tables can be used in
/// tests. The defaults match the reference keyboard mapping for the
/// multimedia volume cluster.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Keycode that toggles mute on the default sink.
    pub mute: Keycode,
    /// Keycode that lowers the volume by one step.
    pub volume_down: Keycode,
    /// Keycode that raises the volume by one step.
    pub volume_up: Keycode,
    /// Modifier bits crossed with each keycode at grab time. Key grabs match
    /// the pressed modifier state exactly, so every subset of this set gets
    /// its own grab.
    pub modifiers: [ModMask; 3],
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            mute: 121,
            volume_down: 122,
            volume_up: 123,
            modifiers: [ModMask::SHIFT, ModMask::LOCK, ModMask::M2],
        }
    }
}
