use crate::{
    observable::{
        AttributeStore,
        StoreEvent,
        SubscriptionId,
    },
    peer::{
        MediaStream,
        PeerKey,
        PeerRegistry,
        PeerSlot,
        TransportPeer,
    },
    signaling::{
        ChannelPayload,
        ControlMessage,
        SignalingEvent,
        SignalingEventKind,
        SignalingHub,
        TrackKind,
    },
};
use call_simulator_config::ModelOptions;
use std::{
    borrow::Cow,
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    rc::Rc,
};
use strum::IntoEnumIterator as _;

mod attributes;
mod collection;
mod sink;
mod state;

pub use attributes::{
    ParticipantAttribute,
    ParticipantAttributes,
    ParticipantValue,
};
pub use collection::ParticipantCollection;
use sink::ScopedAudioSink;
pub use sink::{
    AudioSink,
    AudioSinkFactory,
    LocalAudioOutput,
    SinkEvent,
};
pub use state::{
    ConnectionState,
    RaisedHand,
    SimulcastQuality,
    TriState,
};

use ParticipantAttribute as Attr;
use ParticipantValue as Value;

pub type ParticipantStore = AttributeStore<ParticipantAttributes, ParticipantConnection>;

/// Collaborators shared by all participant models of a call.
#[derive(Clone, derive_more::Debug)]
pub struct CallContext {
    #[debug(skip)]
    pub hub: Rc<dyn SignalingHub>,
    #[debug(skip)]
    pub peers: Rc<dyn PeerRegistry>,
    #[debug(skip)]
    pub audio_output: Rc<dyn AudioSinkFactory>,
    pub options: Rc<ModelOptions>,
}

impl CallContext {
    pub fn new(
        hub: Rc<dyn SignalingHub>,
        peers: Rc<dyn PeerRegistry>,
        audio_output: Rc<dyn AudioSinkFactory>,
        options: ModelOptions,
    ) -> Self {
        Self {
            hub,
            peers,
            audio_output,
            options: Rc::new(options),
        }
    }
}

/// Connection model of one remote participant.
///
/// Mirrors the transport state of the participant's peers into observable
/// attributes and keeps them up to date from signaling hub events. Handles are
/// cheap to clone and all refer to the same model.
#[derive(Clone)]
pub struct ParticipantConnection {
    inner: Rc<Inner>,
}

struct Inner {
    peer_id: String,
    context: CallContext,
    store: ParticipantStore,
    audio_sink: RefCell<Option<ScopedAudioSink>>,
    hub_subscriptions: RefCell<Vec<(SignalingEventKind, SubscriptionId)>>,
    peer_subscription: RefCell<Option<(PeerKey, SubscriptionId)>>,
    destroyed: Cell<bool>,
}

impl fmt::Debug for ParticipantConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantConnection")
            .field("peer_id", &self.inner.peer_id)
            .field("store", &self.inner.store)
            .field("audio_sink", &self.inner.audio_sink.borrow())
            .finish()
    }
}

impl PartialEq for ParticipantConnection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ParticipantConnection {
    /// Creates the model and subscribes it to every signaling hub event.
    pub fn new(peer_id: impl Into<String>, context: &CallContext) -> Self {
        let peer_id = peer_id.into();
        let participant = Self {
            inner: Rc::new(Inner {
                store: AttributeStore::new(ParticipantAttributes::new(peer_id.clone())),
                peer_id,
                context: context.clone(),
                audio_sink: RefCell::new(None),
                hub_subscriptions: RefCell::new(Vec::new()),
                peer_subscription: RefCell::new(None),
                destroyed: Cell::new(false),
            }),
        };
        participant.subscribe_to_hub();
        participant
    }

    fn subscribe_to_hub(&self) {
        let subscriptions = SignalingEventKind::iter()
            .map(|kind| {
                let weak = Rc::downgrade(&self.inner);
                let id = self.inner.context.hub.on(
                    kind,
                    Rc::new(move |event: &SignalingEvent| {
                        if let Some(inner) = weak.upgrade() {
                            ParticipantConnection { inner }.handle_signaling_event(event);
                        }
                    }),
                );
                (kind, id)
            })
            .collect();
        *self.inner.hub_subscriptions.borrow_mut() = subscriptions;
    }

    /// Releases every subscription and the audio sink. Calling it again is a
    /// no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            trace!(peer_id = %self.inner.peer_id, "participant already destroyed");
            return;
        }

        self.release_peer_subscription();

        let subscriptions = std::mem::take(&mut *self.inner.hub_subscriptions.borrow_mut());
        for (kind, id) in subscriptions {
            self.inner.context.hub.off(kind, id);
        }

        if self.has_audio_sink() || self.stream().is_some() {
            self.release_stream();
        }

        debug!(peer_id = %self.inner.peer_id, "participant destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    // -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
    // Attributes

    pub fn get(&self, key: ParticipantAttribute) -> ParticipantValue {
        self.inner.store.get(key)
    }

    pub fn on<F>(&self, event: StoreEvent<ParticipantAttribute>, handler: F) -> SubscriptionId
    where
        F: Fn(&ParticipantConnection, &ParticipantValue) + 'static,
    {
        self.inner.store.on(event, handler)
    }

    pub fn off(&self, event: StoreEvent<ParticipantAttribute>, id: SubscriptionId) -> bool {
        self.inner.store.off(event, id)
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> ParticipantAttributes {
        self.inner.store.read(ParticipantAttributes::clone)
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.store.read(|a| a.session_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.store.read(|a| a.user_id.clone())
    }

    pub fn name(&self) -> Option<String> {
        self.inner.store.read(|a| a.name.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.store.read(|a| a.connection_state)
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.inner.store.read(|a| a.stream.clone())
    }

    pub fn screen_stream(&self) -> Option<MediaStream> {
        self.inner.store.read(|a| a.screen_stream.clone())
    }

    pub fn audio_available(&self) -> TriState {
        self.inner.store.read(|a| a.audio_available)
    }

    pub fn speaking(&self) -> TriState {
        self.inner.store.read(|a| a.speaking)
    }

    pub fn video_available(&self) -> TriState {
        self.inner.store.read(|a| a.video_available)
    }

    pub fn raised_hand(&self) -> RaisedHand {
        self.inner.store.read(|a| a.raised_hand)
    }

    pub fn media_peer(&self) -> Option<PeerKey> {
        self.inner.store.read(|a| a.media_peer.clone())
    }

    pub fn screen_peer(&self) -> Option<PeerKey> {
        self.inner.store.read(|a| a.screen_peer.clone())
    }

    pub fn has_audio_sink(&self) -> bool {
        self.inner.audio_sink.borrow().is_some()
    }

    /// `None` while there is no audio sink.
    pub fn is_audio_muted(&self) -> Option<bool> {
        self.inner.audio_sink.borrow().as_ref().map(ScopedAudioSink::is_muted)
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        self.set(Attr::SessionId, Value::Text(session_id));
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        self.set(Attr::UserId, Value::Text(user_id));
    }

    fn set(&self, key: ParticipantAttribute, value: ParticipantValue) {
        self.inner.store.set(self, key, value);
    }

    fn set_media_state(&self, value: TriState) {
        self.set(Attr::AudioAvailable, Value::TriState(value));
        self.set(Attr::Speaking, Value::TriState(value));
        self.set(Attr::VideoAvailable, Value::TriState(value));
    }

    fn lookup(&self, key: &PeerKey) -> Option<Rc<dyn TransportPeer>> {
        let peer = self.inner.context.peers.peer(key);
        if peer.is_none() {
            debug!(peer_id = %self.inner.peer_id, peer = %key, "peer is not known to the transport");
        }
        peer
    }

    // -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
    // Peers

    /// Binds `peer` to `slot`, or clears the slot when `peer` is `None`.
    pub fn bind(&self, slot: PeerSlot, peer: Option<PeerKey>) {
        if let Some(key) = &peer {
            if key.id != self.inner.peer_id {
                warn!(
                    peer_id = %self.inner.peer_id,
                    given = %key,
                    %slot,
                    "mismatch between stored peer id and id of given peer"
                );
            }
        }

        match slot {
            PeerSlot::Media => self.bind_media_peer(peer),
            PeerSlot::Screen => self.bind_screen_peer(peer),
        }
    }

    pub fn unbind(&self, slot: PeerSlot) {
        self.bind(slot, None);
    }

    fn bind_media_peer(&self, peer: Option<PeerKey>) {
        self.release_peer_subscription();
        self.set(Attr::MediaPeer, Value::Peer(peer.clone()));

        let Some(key) = peer else {
            // The participant joined without any media track.
            debug!(peer_id = %self.inner.peer_id, "no media peer, participant has no streams");
            if self.has_audio_sink() || self.stream().is_some() {
                self.release_stream();
            }
            self.set(Attr::ConnectionState, Value::ConnectionState(ConnectionState::Completed));
            self.set_media_state(TriState::False);
            return;
        };

        let Some(transport) = self.lookup(&key) else {
            // Attached once the transport announces a stream for it.
            warn!(peer_id = %self.inner.peer_id, peer = %key, "media peer is not known to the transport yet");
            if self.has_audio_sink() || self.stream().is_some() {
                self.release_stream();
            }
            self.set(Attr::ConnectionState, Value::ConnectionState(ConnectionState::New));
            self.set_media_state(TriState::Unknown);
            return;
        };

        self.attach_media_peer(&key, transport.as_ref());
    }

    /// Adopts the state and stream of the bound media peer and follows its
    /// state changes from then on.
    fn attach_media_peer(&self, key: &PeerKey, transport: &dyn TransportPeer) {
        let reported = transport.ice_connection_state();
        self.apply_transport_state(transport, &reported);
        self.attach_media_stream(transport);

        let subscribed = self
            .inner
            .peer_subscription
            .borrow()
            .as_ref()
            .is_some_and(|(bound, _)| bound == key);
        if subscribed {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let id = transport.on_state_change(Rc::new(move |state: &str| {
            if let Some(inner) = weak.upgrade() {
                ParticipantConnection { inner }.handle_state_change(state);
            }
        }));
        *self.inner.peer_subscription.borrow_mut() = Some((key.clone(), id));
    }

    fn bind_screen_peer(&self, peer: Option<PeerKey>) {
        self.set(Attr::ScreenPeer, Value::Peer(peer.clone()));
        let stream = peer.and_then(|key| self.lookup(&key)).and_then(|transport| transport.stream());
        self.set(Attr::ScreenStream, Value::Stream(stream));
    }

    fn release_peer_subscription(&self) {
        let Some((key, id)) = self.inner.peer_subscription.borrow_mut().take() else {
            return;
        };
        if let Some(transport) = self.inner.context.peers.peer(&key) {
            transport.off_state_change(id);
        } else {
            trace!(peer = %key, "peer gone before its state subscription was released");
        }
    }

    fn handle_state_change(&self, reported: &str) {
        if self.is_destroyed() {
            return;
        }
        let Some(transport) = self.media_peer().and_then(|key| self.lookup(&key)) else {
            return;
        };
        self.apply_transport_state(transport.as_ref(), reported);
    }

    /// Maps the extended ICE connection state reported by `peer` to the
    /// connection state. Unknown states leave everything untouched.
    fn apply_transport_state(&self, peer: &dyn TransportPeer, reported: &str) {
        let reported = effective_state(peer, reported);
        let state = match reported.parse::<ConnectionState>() {
            Ok(state) => state,
            Err(_) => {
                error!(
                    peer_id = %self.inner.peer_id,
                    state = %reported,
                    "unexpected (extended) ICE connection state"
                );
                return;
            }
        };

        debug!(peer_id = %self.inner.peer_id, %state, "connection state changed");
        self.set(Attr::ConnectionState, Value::ConnectionState(state));

        if state.resets_media_state() {
            self.set_media_state(TriState::Unknown);
        } else if state.adopts_peer_nick() {
            // Without an MCU the name of registered users without streams is
            // only known from the transport.
            if let Some(nick) = peer.nick() {
                self.set(Attr::Name, Value::Text(Some(nick)));
            }
        }
    }

    // -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
    // Streams

    fn attach_media_stream(&self, peer: &dyn TransportPeer) {
        let stream = peer.stream();

        let previous = self.inner.audio_sink.borrow_mut().take();
        drop(previous);

        if let Some(stream) = &stream {
            let muted = !self.audio_available().is_true();
            let sink = ScopedAudioSink::attach(self.inner.context.audio_output.as_ref(), stream, muted);
            *self.inner.audio_sink.borrow_mut() = Some(sink);
        }
        self.set(Attr::Stream, Value::Stream(stream));

        if let Some(nick) = peer.nick() {
            self.set(Attr::Name, Value::Text(Some(nick)));
        }
    }

    fn release_stream(&self) {
        let sink = self.inner.audio_sink.borrow_mut().take();
        drop(sink);
        self.set(Attr::Stream, Value::Stream(None));
    }

    pub fn on_peer_stream_added(&self, peer: &PeerKey) {
        if self.media_peer().as_ref() == Some(peer) {
            if let Some(transport) = self.lookup(peer) {
                self.attach_media_peer(peer, transport.as_ref());
            }
        } else if self.screen_peer().as_ref() == Some(peer) {
            let stream = self.lookup(peer).and_then(|transport| transport.stream());
            self.set(Attr::ScreenStream, Value::Stream(stream));
        }
    }

    pub fn on_peer_stream_removed(&self, peer: &PeerKey) {
        if self.media_peer().as_ref() == Some(peer) {
            self.release_stream();
            self.set_media_state(TriState::Unknown);
        } else if self.screen_peer().as_ref() == Some(peer) {
            self.set(Attr::ScreenStream, Value::Stream(None));
        }
    }

    // -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
    // Signaling

    fn handle_signaling_event(&self, event: &SignalingEvent) {
        // A dispatch snapshot may still reach a model destroyed by an earlier
        // handler of the same event.
        if self.is_destroyed() {
            return;
        }
        match event {
            SignalingEvent::PeerStreamAdded { peer } => self.on_peer_stream_added(peer),
            SignalingEvent::PeerStreamRemoved { peer } => self.on_peer_stream_removed(peer),
            SignalingEvent::Nick { id, name } => self.on_nick(id, name),
            SignalingEvent::Mute { id, kind } => self.on_mute(id, *kind),
            SignalingEvent::Unmute { id, kind } => self.on_unmute(id, *kind),
            SignalingEvent::ChannelMessage { peer, label, payload } => self.on_channel_message(peer, label, payload),
            SignalingEvent::RaisedHand { id, raised } => self.on_raised_hand(id, *raised),
        }
    }

    fn is_bound_media_peer(&self, id: &str) -> bool {
        self.media_peer().is_some_and(|peer| peer.id == id)
    }

    /// A nickname may arrive before any peer is bound.
    pub fn on_nick(&self, id: &str, name: &str) {
        if id != self.inner.peer_id {
            return;
        }
        let name = (!name.is_empty()).then(|| name.to_string());
        self.set(Attr::Name, Value::Text(name));
    }

    pub fn on_mute(&self, id: &str, kind: TrackKind) {
        if !self.is_bound_media_peer(id) {
            return;
        }
        self.apply_mute(kind);
    }

    fn apply_mute(&self, kind: TrackKind) {
        match kind {
            TrackKind::Video => {
                self.set(Attr::VideoAvailable, Value::TriState(TriState::False));
            }
            TrackKind::Audio => {
                if let Some(sink) = self.inner.audio_sink.borrow_mut().as_mut() {
                    sink.set_muted(true);
                }
                self.set(Attr::AudioAvailable, Value::TriState(TriState::False));
                self.set(Attr::Speaking, Value::TriState(TriState::False));
            }
        }
    }

    pub fn on_unmute(&self, id: &str, kind: TrackKind) {
        if !self.is_bound_media_peer(id) {
            return;
        }
        match kind {
            TrackKind::Video => {
                self.set(Attr::VideoAvailable, Value::TriState(TriState::True));
            }
            TrackKind::Audio => {
                if let Some(sink) = self.inner.audio_sink.borrow_mut().as_mut() {
                    sink.set_muted(false);
                }
                self.set(Attr::AudioAvailable, Value::TriState(TriState::True));
            }
        }
    }

    /// Asks every party, the participant included, to mute its microphone.
    pub fn force_mute(&self) {
        let Some(peer) = self.media_peer() else {
            debug!(peer_id = %self.inner.peer_id, "cannot force mute without a media peer");
            return;
        };

        info!(peer_id = %self.inner.peer_id, "forcing mute");
        self.inner
            .context
            .hub
            .send_control_to_all(ControlMessage::ForceMute { peer_id: peer.id });

        // The broadcast does not come back to its sender.
        self.apply_mute(TrackKind::Audio);
    }

    pub fn on_channel_message(&self, peer: &PeerKey, label: &str, payload: &ChannelPayload) {
        if !self.is_bound_media_peer(&peer.id) {
            return;
        }
        if !self.inner.context.options.is_recognized_channel(label) {
            trace!(peer_id = %self.inner.peer_id, label, "ignoring message from unknown data channel");
            return;
        }

        match payload {
            ChannelPayload::Speaking => self.set(Attr::Speaking, Value::TriState(TriState::True)),
            ChannelPayload::StoppedSpeaking => self.set(Attr::Speaking, Value::TriState(TriState::False)),
            ChannelPayload::Other => {}
        }
    }

    /// Applied verbatim, out of order events are not detected. A hand may be
    /// raised before any peer is bound.
    pub fn on_raised_hand(&self, id: &str, raised: RaisedHand) {
        if id != self.inner.peer_id {
            return;
        }
        self.set(Attr::RaisedHand, Value::RaisedHand(raised));
    }

    // -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
    // Simulcast

    /// Requests `quality` for both the spatial and the temporal layer of the
    /// peer bound to `slot`.
    pub fn set_simulcast_quality(&self, slot: PeerSlot, quality: SimulcastQuality) {
        let key = match slot {
            PeerSlot::Media => self.media_peer(),
            PeerSlot::Screen => self.screen_peer(),
        };
        let Some(transport) = key.and_then(|key| self.lookup(&key)) else {
            return;
        };
        if !transport.simulcast_enabled() {
            trace!(peer = %transport.key(), "simulcast not enabled, ignoring quality change");
            return;
        }
        transport.select_simulcast_stream(quality, quality);
    }
}

/// Some browsers keep reporting `disconnected` as ICE state after the
/// connection itself failed.
fn effective_state<'a>(peer: &dyn TransportPeer, reported: &'a str) -> Cow<'a, str> {
    if reported == "disconnected" && peer.connection_state() == "failed" {
        Cow::Owned(peer.connection_state())
    } else {
        Cow::Borrowed(reported)
    }
}
