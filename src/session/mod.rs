//! Asynchronous control channel to the PulseAudio server.
//!
//! The session owns the client context and turns its callback soup into
//! typed [`SessionEvent`]s on a channel drained by the daemon loop. Queries
//! and commands are fire-and-forget: a rejected command is logged and the
//! next subscription notification re-synchronizes the cache.

/// Session error types.
pub mod error;
/// Session event types.
pub mod events;

use std::{cell::RefCell, rc::Rc};

use libpulse_binding::{
    callbacks::ListResult,
    context::{
        Context, FlagSet as ContextFlags, State,
        subscribe::{Facility, InterestMaskSet},
    },
    volume::ChannelVolumes,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use error::SessionError;
pub use events::{ResyncScope, SessionEvent};

use crate::reactor::PulseReactor;

/// Commands and queries the daemon loop issues against the audio server.
///
/// The loop's dispatch logic is written against this seam so it can be
/// exercised without a live server.
pub trait SinkControl {
    /// Re-resolve the default sink name (server-info query).
    fn query_server_info(&self);

    /// Refresh mute/volume for the named sink (sink-info query).
    fn query_sink_info(&self, sink: &str);

    /// Set the mute flag of the named sink.
    fn set_sink_mute(&self, sink: &str, muted: bool);

    /// Apply the given channel volumes to the named sink.
    fn set_sink_volume(&self, sink: &str, volume: &ChannelVolumes);
}

/// Live connection to the audio server.
///
/// State machine: unconnected → connecting → ready → terminated/failed.
/// [`AudioSession::connect`] returns only once the ready state is reached;
/// a later fall into failed/terminated surfaces as [`SessionEvent::Closed`].
pub struct AudioSession {
    context: Rc<RefCell<Context>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl AudioSession {
    /// Connect to the server, wait for readiness, subscribe to change
    /// notifications and kick off the initial default-sink resolution.
    ///
    /// The connection neither autospawns a server nor fails fast while one
    /// is still starting up.
    ///
    /// # Errors
    /// Returns error if the context cannot be created or never reaches the
    /// ready state. There is no automatic retry; the caller exits.
    pub async fn connect(
        reactor: &mut PulseReactor,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let mut context =
            Context::new(&*reactor, "pulsekeys").ok_or(SessionError::ContextCreation)?;
        context
            .connect(
                None,
                ContextFlags::NOAUTOSPAWN | ContextFlags::NOFAIL,
                None,
            )
            .map_err(SessionError::connect_failure)?;

        let state = reactor
            .wait_for_ready(&context)
            .await
            .map_err(|rv| SessionError::MainloopQuit(rv.0))?;
        if state != State::Ready {
            return Err(SessionError::NeverReady(state));
        }
        debug!("PulseAudio context ready");

        let session = Self {
            context: Rc::new(RefCell::new(context)),
            events,
        };
        session.watch_state();
        session.subscribe();
        session.query_server_info();
        Ok(session)
    }

    /// Report a post-startup fall into failed/terminated as a session event.
    fn watch_state(&self) {
        let context = Rc::downgrade(&self.context);
        let events = self.events.clone();
        self.context
            .borrow_mut()
            .set_state_callback(Some(Box::new(move || {
                let Some(context) = context.upgrade() else {
                    return;
                };
                let state = context.borrow().get_state();
                if matches!(state, State::Failed | State::Terminated) {
                    warn!(?state, "audio connection closed");
                    let _ = events.send(SessionEvent::Closed);
                }
            })));
    }

    /// Subscribe to sink, sink-input and server change notifications.
    fn subscribe(&self) {
        let events = self.events.clone();
        let mut context = self.context.borrow_mut();
        context.set_subscribe_callback(Some(Box::new(move |facility, _operation, _index| {
            // A playback stream attaching or detaching can move the default
            // sink, as can a server-level change; both force a full
            // re-resolution. Sink-level events only need the mixer fields
            // refreshed.
            let scope = match facility {
                Some(Facility::Sink) => ResyncScope::Sink,
                _ => ResyncScope::Server,
            };
            let _ = events.send(SessionEvent::Resync(scope));
        })));
        context.subscribe(
            InterestMaskSet::SINK | InterestMaskSet::SINK_INPUT | InterestMaskSet::SERVER,
            |success| {
                if !success {
                    warn!("server rejected the event subscription");
                }
            },
        );
    }
}

impl SinkControl for AudioSession {
    fn query_server_info(&self) {
        let events = self.events.clone();
        self.context
            .borrow()
            .introspect()
            .get_server_info(move |info| match info.default_sink_name.as_ref() {
                Some(name) => {
                    let _ = events.send(SessionEvent::DefaultSink(name.to_string()));
                }
                None => debug!("server reports no default sink"),
            });
    }

    fn query_sink_info(&self, sink: &str) {
        let events = self.events.clone();
        self.context
            .borrow()
            .introspect()
            .get_sink_info_by_name(sink, move |result| match result {
                ListResult::Item(info) => {
                    let _ = events.send(SessionEvent::SinkState {
                        muted: info.mute,
                        volume: info.volume,
                    });
                }
                ListResult::End => {}
                ListResult::Error => warn!("sink-info query failed"),
            });
    }

    fn set_sink_mute(&self, sink: &str, muted: bool) {
        let mut introspect = self.context.borrow().introspect();
        introspect.set_sink_mute_by_name(sink, muted, None);
    }

    fn set_sink_volume(&self, sink: &str, volume: &ChannelVolumes) {
        let mut introspect = self.context.borrow().introspect();
        introspect.set_sink_volume_by_name(sink, volume, None);
    }
}
