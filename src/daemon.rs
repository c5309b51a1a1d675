//! Daemon assembly and the single-threaded event loop.
//!
//! Startup is strict: display, grabs and audio session must all come up or
//! the process exits nonzero. After that one loop multiplexes the audio
//! event loop, the display descriptor, session notifications and shutdown
//! signals. The loop is the only writer of the mixer cache, so key presses
//! always act on a coherent snapshot without locking.

use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};
use tracing::{debug, info};

use crate::{
    config::KeyConfig,
    core::{DaemonError, Result},
    input::{Action, DisplayInput},
    mixer::MixerState,
    reactor::PulseReactor,
    session::{AudioSession, ResyncScope, SessionEvent, SinkControl},
};

/// The assembled daemon: display input, audio session and mixer cache.
pub struct Daemon {
    config: KeyConfig,
    cache: MixerState,
    display: DisplayInput,
    session: AudioSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    reactor: PulseReactor,
}

impl Daemon {
    /// Bring up the display connection, grab the keys and connect to the
    /// audio server.
    ///
    /// The initial default-sink query is already in flight when this
    /// returns; the cache fills in as the replies arrive.
    ///
    /// # Errors
    /// Returns error if the display cannot be opened, any grab is refused,
    /// or the audio session never becomes ready.
    pub async fn start(config: KeyConfig) -> Result<Self> {
        let display = DisplayInput::open(&config)?;

        let mut reactor = PulseReactor::new();
        let (tx, events) = mpsc::unbounded_channel();
        let session = AudioSession::connect(&mut reactor, tx).await?;

        Ok(Self {
            config,
            cache: MixerState::default(),
            display,
            session,
            events,
            reactor,
        })
    }

    /// Run until a shutdown signal arrives or a connection is lost.
    ///
    /// SIGINT and SIGTERM terminate cleanly with `Ok(())`; a broken display
    /// or audio connection surfaces as the corresponding error.
    ///
    /// # Errors
    /// Returns error when either server connection fails at runtime.
    pub async fn run(mut self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                retval = self.reactor.run() => {
                    return Err(DaemonError::MainloopQuit(retval.0));
                }
                actions = self.display.next_actions(&self.config) => {
                    for action in actions? {
                        apply_action(&mut self.cache, &self.session, action);
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(SessionEvent::Closed) | None => {
                            return Err(DaemonError::SessionClosed);
                        }
                        Some(event) => {
                            handle_session_event(&mut self.cache, &self.session, event);
                        }
                    }
                }
                _ = sigint.recv() => {
                    info!("interrupt received, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("termination requested, shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Apply a decoded key action to the cache and push the result to the sink.
///
/// The cache is mutated first and the command sent fire-and-forget; the
/// server's own change notification confirms (or corrects) the optimistic
/// value. Actions arriving before the default sink is resolved are dropped,
/// since there is no target to address and no volume to step from.
fn apply_action(cache: &mut MixerState, sink: &impl SinkControl, action: Action) {
    if !cache.is_resolved() {
        debug!(?action, "default sink not resolved yet, ignoring key press");
        return;
    }
    match action {
        Action::ToggleMute => {
            let muted = cache.toggle_mute();
            sink.set_sink_mute(cache.default_sink(), muted);
        }
        Action::LowerVolume => {
            cache.step_down();
            sink.set_sink_volume(cache.default_sink(), cache.volume());
        }
        Action::RaiseVolume { boost } => {
            cache.step_up(boost);
            sink.set_sink_volume(cache.default_sink(), cache.volume());
        }
    }
}

/// Fold a session notification into the cache, issuing follow-up queries
/// where a notification only says that something changed, not what.
fn handle_session_event(cache: &mut MixerState, sink: &impl SinkControl, event: SessionEvent) {
    match event {
        SessionEvent::DefaultSink(name) => {
            if cache.default_sink() != name {
                info!(sink = %name, "default sink is now");
            }
            cache.apply_server_info(&name);
            sink.query_sink_info(cache.default_sink());
        }
        SessionEvent::SinkState { muted, volume } => {
            cache.apply_sink_info(muted, volume);
        }
        SessionEvent::Resync(ResyncScope::Server) => {
            sink.query_server_info();
        }
        SessionEvent::Resync(ResyncScope::Sink) => {
            if cache.is_resolved() {
                sink.query_sink_info(cache.default_sink());
            } else {
                // A sink changed before we ever learned which one is the
                // default; resolve that first.
                sink.query_server_info();
            }
        }
        // Terminal; the run loop handles it before dispatch.
        SessionEvent::Closed => {}
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use libpulse_binding::volume::{ChannelVolumes, Volume};

    use crate::mixer::VOLUME_STEP;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Call {
        ServerInfo,
        SinkInfo(String),
        SetMute(String, bool),
        SetVolume(String, ChannelVolumes),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Call> {
            self.calls.borrow_mut().drain(..).collect()
        }
    }

    impl SinkControl for Recorder {
        fn query_server_info(&self) {
            self.calls.borrow_mut().push(Call::ServerInfo);
        }

        fn query_sink_info(&self, sink: &str) {
            self.calls.borrow_mut().push(Call::SinkInfo(sink.into()));
        }

        fn set_sink_mute(&self, sink: &str, muted: bool) {
            self.calls.borrow_mut().push(Call::SetMute(sink.into(), muted));
        }

        fn set_sink_volume(&self, sink: &str, volume: &ChannelVolumes) {
            self.calls
                .borrow_mut()
                .push(Call::SetVolume(sink.into(), *volume));
        }
    }

    fn stereo(level: Volume) -> ChannelVolumes {
        let mut v = ChannelVolumes::default();
        v.set(2, level);
        v
    }

    fn resolved_cache() -> MixerState {
        let mut cache = MixerState::default();
        cache.apply_server_info("alsa_output.hda");
        cache.apply_sink_info(false, stereo(Volume::NORMAL));
        cache
    }

    #[test]
    fn actions_before_resolution_are_dropped() {
        let mut cache = MixerState::default();
        let sink = Recorder::default();

        apply_action(&mut cache, &sink, Action::ToggleMute);
        apply_action(&mut cache, &sink, Action::LowerVolume);

        assert!(sink.take().is_empty());
        assert!(!cache.muted());
    }

    #[test]
    fn toggle_mute_flips_cache_and_sends_the_new_flag() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        apply_action(&mut cache, &sink, Action::ToggleMute);
        assert!(cache.muted());
        assert_eq!(
            sink.take(),
            vec![Call::SetMute("alsa_output.hda".into(), true)]
        );

        apply_action(&mut cache, &sink, Action::ToggleMute);
        assert!(!cache.muted());
        assert_eq!(
            sink.take(),
            vec![Call::SetMute("alsa_output.hda".into(), false)]
        );
    }

    #[test]
    fn lower_volume_steps_the_cache_and_pushes_it() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        apply_action(&mut cache, &sink, Action::LowerVolume);

        let expected = stereo(Volume(Volume::NORMAL.0 - VOLUME_STEP.0));
        assert_eq!(*cache.volume(), expected);
        assert_eq!(
            sink.take(),
            vec![Call::SetVolume("alsa_output.hda".into(), expected)]
        );
    }

    #[test]
    fn raise_volume_without_boost_stays_at_unity() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        apply_action(&mut cache, &sink, Action::RaiseVolume { boost: false });

        let expected = stereo(Volume::NORMAL);
        assert_eq!(*cache.volume(), expected);
        assert_eq!(
            sink.take(),
            vec![Call::SetVolume("alsa_output.hda".into(), expected)]
        );
    }

    #[test]
    fn raise_volume_with_boost_exceeds_unity() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        apply_action(&mut cache, &sink, Action::RaiseVolume { boost: true });

        let expected = stereo(Volume(Volume::NORMAL.0 + VOLUME_STEP.0));
        assert_eq!(*cache.volume(), expected);
        assert_eq!(
            sink.take(),
            vec![Call::SetVolume("alsa_output.hda".into(), expected)]
        );
    }

    #[test]
    fn consecutive_steps_act_on_the_optimistic_value() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        // No sink-info reply arrives in between; each press must still move
        // the volume by a full step.
        apply_action(&mut cache, &sink, Action::LowerVolume);
        apply_action(&mut cache, &sink, Action::LowerVolume);
        apply_action(&mut cache, &sink, Action::LowerVolume);

        let expected = stereo(Volume(Volume::NORMAL.0 - 3 * VOLUME_STEP.0));
        assert_eq!(*cache.volume(), expected);
    }

    #[test]
    fn default_sink_reply_triggers_a_sink_query() {
        let mut cache = MixerState::default();
        let sink = Recorder::default();

        handle_session_event(
            &mut cache,
            &sink,
            SessionEvent::DefaultSink("alsa_output.hda".into()),
        );

        assert_eq!(cache.default_sink(), "alsa_output.hda");
        assert_eq!(sink.take(), vec![Call::SinkInfo("alsa_output.hda".into())]);
    }

    #[test]
    fn sink_state_reply_overwrites_the_cache() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        // Server says something different from our optimistic value.
        let server_view = stereo(Volume(Volume::NORMAL.0 / 2));
        handle_session_event(
            &mut cache,
            &sink,
            SessionEvent::SinkState {
                muted: true,
                volume: server_view,
            },
        );

        assert!(cache.muted());
        assert_eq!(*cache.volume(), server_view);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn server_resync_requeries_the_server() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        handle_session_event(&mut cache, &sink, SessionEvent::Resync(ResyncScope::Server));

        assert_eq!(sink.take(), vec![Call::ServerInfo]);
    }

    #[test]
    fn sink_resync_refreshes_the_known_sink() {
        let mut cache = resolved_cache();
        let sink = Recorder::default();

        handle_session_event(&mut cache, &sink, SessionEvent::Resync(ResyncScope::Sink));

        assert_eq!(sink.take(), vec![Call::SinkInfo("alsa_output.hda".into())]);
    }

    #[test]
    fn sink_resync_without_a_known_sink_falls_back_to_server_query() {
        let mut cache = MixerState::default();
        let sink = Recorder::default();

        handle_session_event(&mut cache, &sink, SessionEvent::Resync(ResyncScope::Sink));

        assert_eq!(sink.take(), vec![Call::ServerInfo]);
    }
}
