use tracing::trace;
use x11rb::protocol::{Event, xproto::KeyButMask};

use crate::config::KeyConfig;

/// A volume action decoded from a grabbed key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Invert the mute flag of the default sink.
    ToggleMute,
    /// Lower every channel by one step.
    LowerVolume,
    /// Raise every channel by one step.
    RaiseVolume {
        /// Shift was held: clamp at the hardware maximum instead of unity
        /// gain.
        boost: bool,
    },
}

/// Map a display event to a volume action.
///
/// Everything but a key-press for one of the bound keycodes is discarded;
/// grabs also deliver the matching key releases.
pub fn decode(config: &KeyConfig, event: &Event) -> Option<Action> {
    let Event::KeyPress(press) = event else {
        return None;
    };
    if press.detail == config.mute {
        Some(Action::ToggleMute)
    } else if press.detail == config.volume_down {
        Some(Action::LowerVolume)
    } else if press.detail == config.volume_up {
        let boost = u16::from(press.state) & u16::from(KeyButMask::SHIFT) != 0;
        Some(Action::RaiseVolume { boost })
    } else {
        trace!(keycode = press.detail, "key press for unbound keycode");
        None
    }
}
