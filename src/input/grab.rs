use tracing::debug;
use x11rb::{
    connection::Connection,
    protocol::xproto::{ConnectionExt, GrabMode, Keycode, ModMask, Window},
};

use crate::config::KeyConfig;

use super::error::InputError;

/// Every subset of the given modifier bits, the empty mask included.
///
/// Key grabs match the modifier state exactly, so a key bound regardless of
/// Shift, Caps Lock and Num Lock needs one grab per subset.
pub fn modifier_combinations(modifiers: &[ModMask]) -> Vec<ModMask> {
    let mut masks = vec![ModMask::from(0u16)];
    for &modifier in modifiers {
        for i in 0..masks.len() {
            masks.push(masks[i] | modifier);
        }
    }
    masks
}

/// Grab every configured keycode under every modifier combination.
///
/// All grabs go to the root window with both pointer and keyboard left in
/// asynchronous mode, so holding a volume key never freezes input for other
/// clients. Each request is checked individually; the failing combination is
/// named in the error.
pub fn grab_all<C: Connection>(
    conn: &C,
    root: Window,
    config: &KeyConfig,
) -> Result<(), InputError> {
    issue_grabs(config, |keycode, mask| {
        conn.grab_key(true, root, mask, keycode, GrabMode::ASYNC, GrabMode::ASYNC)?
            .check()
            .map_err(|source| InputError::GrabDenied {
                keycode,
                modifiers: u16::from(mask),
                source,
            })
    })
}

/// Walk the keycode × combination grid, stopping at the first refused grab.
///
/// A refused grab means another client owns the key; running with a partial
/// set would silently drop presses in some lock states, so the remaining
/// grabs are not attempted.
fn issue_grabs(
    config: &KeyConfig,
    mut grab: impl FnMut(Keycode, ModMask) -> Result<(), InputError>,
) -> Result<(), InputError> {
    let masks = modifier_combinations(&config.modifiers);
    for keycode in [config.mute, config.volume_down, config.volume_up] {
        for &mask in &masks {
            grab(keycode, mask)?;
        }
    }
    debug!(grabs = masks.len() * 3, "key grabs established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use x11rb::errors::{ConnectionError, ReplyError};

    use super::*;

    #[test]
    fn empty_modifier_set_yields_only_the_bare_mask() {
        assert_eq!(modifier_combinations(&[]), vec![ModMask::from(0u16)]);
    }

    #[test]
    fn three_modifiers_yield_the_full_power_set() {
        let masks =
            modifier_combinations(&[ModMask::SHIFT, ModMask::LOCK, ModMask::M2]);
        assert_eq!(masks.len(), 8);

        for expected in [
            ModMask::from(0u16),
            ModMask::SHIFT,
            ModMask::LOCK,
            ModMask::M2,
            ModMask::SHIFT | ModMask::LOCK,
            ModMask::SHIFT | ModMask::M2,
            ModMask::LOCK | ModMask::M2,
            ModMask::SHIFT | ModMask::LOCK | ModMask::M2,
        ] {
            assert!(
                masks.contains(&expected),
                "missing mask {:#06x}",
                u16::from(expected)
            );
        }
    }

    #[test]
    fn combinations_are_distinct() {
        let mut bits: Vec<u16> =
            modifier_combinations(&[ModMask::SHIFT, ModMask::LOCK, ModMask::M2])
                .into_iter()
                .map(u16::from)
                .collect();
        bits.sort_unstable();
        bits.dedup();
        assert_eq!(bits.len(), 8);
    }

    #[test]
    fn issues_one_grab_per_keycode_and_combination() {
        let config = KeyConfig::default();
        let mut seen = Vec::new();
        let result = issue_grabs(&config, |keycode, mask| {
            seen.push((keycode, u16::from(mask)));
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(seen.len(), 24);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 24, "duplicate grab issued");
    }

    #[test]
    fn stops_at_the_first_refused_grab() {
        let config = KeyConfig::default();
        let mut calls = 0u32;
        let result = issue_grabs(&config, |keycode, mask| {
            calls += 1;
            if calls == 5 {
                Err(InputError::GrabDenied {
                    keycode,
                    modifiers: u16::from(mask),
                    source: ReplyError::ConnectionError(ConnectionError::UnknownError),
                })
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(InputError::GrabDenied { .. })));
        assert_eq!(calls, 5, "grabs continued past a refusal");
    }
}
