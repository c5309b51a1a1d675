use libpulse_binding::volume::{ChannelVolumes, Volume};
use tracing::debug;

/// Per-press volume increment: one twentieth of full scale.
pub const VOLUME_STEP: Volume = Volume(Volume::NORMAL.0 / 20);

/// Last-known mixer state of the default sink.
///
/// Populated once the audio session becomes ready and refreshed on every
/// server-info and sink-info notification. Key presses mutate it
/// optimistically before the matching command reaches the server, so rapid
/// repeats accumulate locally instead of racing the round-trip.
///
/// Single writer: only the daemon event loop touches this, so no locking.
#[derive(Debug, Clone, Default)]
pub struct MixerState {
    default_sink: String,
    muted: bool,
    volume: ChannelVolumes,
}

impl MixerState {
    /// Name of the sink the cached mute/volume fields describe.
    pub fn default_sink(&self) -> &str {
        &self.default_sink
    }

    /// Whether a default sink has been resolved yet.
    pub fn is_resolved(&self) -> bool {
        !self.default_sink.is_empty()
    }

    /// Cached mute flag.
    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Cached per-channel volume vector.
    pub fn volume(&self) -> &ChannelVolumes {
        &self.volume
    }

    /// Replace the default sink name wholesale (server-info result).
    ///
    /// The mute/volume fields are left untouched; they describe the previous
    /// sink until the follow-up sink-info query completes (eventual
    /// consistency, not atomicity).
    pub fn apply_server_info(&mut self, default_sink: &str) {
        self.default_sink.clear();
        self.default_sink.push_str(default_sink);
    }

    /// Overwrite mute and volume from a sink-info record.
    pub fn apply_sink_info(&mut self, muted: bool, volume: ChannelVolumes) {
        self.muted = muted;
        self.volume = volume;
    }

    /// Invert the cached mute flag and return the new value.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// Lower every channel by [`VOLUME_STEP`], saturating at silence.
    ///
    /// A no-op while the volume vector is invalid (no sink-info reply has
    /// populated it yet).
    pub fn step_down(&mut self) {
        if self.volume.decrease(VOLUME_STEP).is_none() {
            debug!("volume vector invalid, step ignored");
        }
    }

    /// Raise every channel by [`VOLUME_STEP`].
    ///
    /// Clamps at unity gain, or at the hardware maximum when `boost` is set
    /// (the shift-held escape hatch past 100%). A no-op while the volume
    /// vector is invalid.
    pub fn step_up(&mut self, boost: bool) {
        let ceiling = if boost { Volume::MAX } else { Volume::NORMAL };
        if self.volume.inc_clamp(VOLUME_STEP, ceiling).is_none() {
            debug!("volume vector invalid, step ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(level: Volume) -> ChannelVolumes {
        let mut volume = ChannelVolumes::default();
        volume.set(2, level);
        volume
    }

    fn levels(state: &MixerState) -> (u32, u32) {
        let channels = state.volume().get();
        (channels[0].0, channels[1].0)
    }

    #[test]
    fn starts_zeroed() {
        let state = MixerState::default();
        assert!(!state.is_resolved());
        assert!(!state.muted());
        assert_eq!(state.volume().len(), 0);
    }

    #[test]
    fn server_info_replaces_sink_name_wholesale() {
        let mut state = MixerState::default();
        state.apply_server_info("alsa_output.pci-0000_00_1f.3.analog-stereo");
        state.apply_server_info("bluez_sink.long.device.name.repeated.many.times");
        assert_eq!(
            state.default_sink(),
            "bluez_sink.long.device.name.repeated.many.times"
        );
        assert!(state.is_resolved());
    }

    #[test]
    fn sink_info_overwrites_mute_and_volume() {
        let mut state = MixerState::default();
        state.apply_sink_info(true, stereo(Volume::NORMAL));
        assert!(state.muted());
        assert_eq!(levels(&state), (Volume::NORMAL.0, Volume::NORMAL.0));

        // Last writer wins under single-threaded ordering.
        state.apply_sink_info(false, stereo(Volume(1234)));
        assert!(!state.muted());
        assert_eq!(levels(&state), (1234, 1234));
    }

    #[test]
    fn toggle_mute_inverts_each_time() {
        let mut state = MixerState::default();
        assert!(state.toggle_mute());
        assert!(!state.toggle_mute());
        assert!(state.toggle_mute());
    }

    #[test]
    fn repeated_step_down_accumulates_without_a_round_trip() {
        let mut state = MixerState::default();
        state.apply_sink_info(false, stereo(Volume::NORMAL));
        for _ in 0..3 {
            state.step_down();
        }
        let expected = Volume::NORMAL.0 - 3 * VOLUME_STEP.0;
        assert_eq!(levels(&state), (expected, expected));
    }

    #[test]
    fn stepping_before_any_sink_info_is_a_no_op() {
        // The zero-channel default vector is invalid; steps must not panic
        // or conjure channels out of nothing.
        let mut state = MixerState::default();
        state.step_down();
        state.step_up(false);
        state.step_up(true);
        assert_eq!(state.volume().len(), 0);
    }

    #[test]
    fn step_down_floors_at_silence() {
        let mut state = MixerState::default();
        state.apply_sink_info(false, stereo(Volume(VOLUME_STEP.0 / 2)));
        state.step_down();
        state.step_down();
        assert_eq!(levels(&state), (0, 0));
    }

    #[test]
    fn step_up_clamps_at_unity_gain() {
        // 95% of full scale: one more press overshoots and must clamp to 100%.
        let mut state = MixerState::default();
        state.apply_sink_info(false, stereo(Volume(Volume::NORMAL.0 - VOLUME_STEP.0 / 2)));
        state.step_up(false);
        assert_eq!(levels(&state), (Volume::NORMAL.0, Volume::NORMAL.0));
    }

    #[test]
    fn boosted_step_up_clamps_at_hardware_maximum() {
        let mut state = MixerState::default();
        state.apply_sink_info(false, stereo(Volume(Volume::MAX.0 - VOLUME_STEP.0 / 2)));
        state.step_up(true);
        assert_eq!(levels(&state), (Volume::MAX.0, Volume::MAX.0));
    }

    #[test]
    fn unboosted_step_up_pulls_amplified_volume_back_to_unity() {
        let mut state = MixerState::default();
        state.apply_sink_info(false, stereo(Volume(Volume::NORMAL.0 + 2 * VOLUME_STEP.0)));
        state.step_up(false);
        assert_eq!(levels(&state), (Volume::NORMAL.0, Volume::NORMAL.0));
    }
}
