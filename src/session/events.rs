use libpulse_binding::volume::ChannelVolumes;

/// Scope of a cache resynchronization forced by a subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncScope {
    /// Re-resolve the default sink from scratch; a playback stream appeared
    /// or vanished (which can move the default) or the server itself changed.
    Server,
    /// Refresh mute/volume for the sink we already know about.
    Sink,
}

/// Notifications surfaced from the PulseAudio callbacks into the daemon loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Server-info result carrying the current default sink name.
    DefaultSink(String),
    /// Sink-info record for the queried sink.
    SinkState {
        /// Mute flag reported by the server.
        muted: bool,
        /// Per-channel volume reported by the server.
        volume: ChannelVolumes,
    },
    /// A subscription event asked for a cache refresh.
    Resync(ResyncScope),
    /// The context entered a failed or terminated state.
    Closed,
}
