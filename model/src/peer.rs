//! Transport peers, seen from the participant models.
//!
//! Models never own a peer: they keep its [`PeerKey`] and look it up in the
//! [`PeerRegistry`] of the transport layer whenever they need it, so the peer
//! lifetime is governed by the transport alone.

use crate::{
    observable::{
        Emitter,
        SubscriptionId,
    },
    participant::SimulcastQuality,
};
use derive_more::Display;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::HashMap,
    fmt,
    rc::Rc,
};
use strum::{
    EnumIter,
    EnumString,
};

#[derive(Debug, Clone, Copy, strum::Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PeerSlot {
    /// Camera and microphone.
    Media,
    /// Screen share.
    Screen,
}

/// Identifies a transport peer. Media and screen peers of a participant share
/// the participant id and differ by slot.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{id}/{slot}")]
pub struct PeerKey {
    pub id: String,
    pub slot: PeerSlot,
}

impl PeerKey {
    pub fn media(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot: PeerSlot::Media,
        }
    }

    pub fn screen(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot: PeerSlot::Screen,
        }
    }
}

/// Handle of a received media stream.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{id}")]
#[serde(transparent)]
pub struct MediaStream {
    pub id: String,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Copy, strum::Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
}

impl MediaKind {
    /// Slot of the local peer that sends this kind of media.
    pub fn slot(self) -> PeerSlot {
        match self {
            Self::Audio | Self::Video => PeerSlot::Media,
            Self::Screen => PeerSlot::Screen,
        }
    }
}

/// Cumulative sender statistics of one media kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub packets_lost: u64,
    /// Latest round trip time, in seconds.
    #[serde(default)]
    pub round_trip_time: Option<f64>,
}

pub type StateChangeHandler = dyn Fn(&str);

pub trait TransportPeer {
    fn key(&self) -> &PeerKey;

    /// Nickname announced by the transport, only known for registered users
    /// connected without an MCU.
    fn nick(&self) -> Option<String>;

    fn stream(&self) -> Option<MediaStream>;

    /// Extended ICE connection state, e.g. `checking` or `disconnected-long`.
    fn ice_connection_state(&self) -> String;

    /// Connection level state of the underlying peer connection.
    fn connection_state(&self) -> String;

    fn simulcast_enabled(&self) -> bool;

    fn select_simulcast_stream(&self, spatial: SimulcastQuality, temporal: SimulcastQuality);

    fn sender_stats(&self, kind: MediaKind) -> Option<SenderStats>;

    /// Subscribes to extended ICE connection state changes.
    fn on_state_change(&self, handler: Rc<StateChangeHandler>) -> SubscriptionId;

    fn off_state_change(&self, id: SubscriptionId);
}

pub trait PeerRegistry {
    fn peer(&self, key: &PeerKey) -> Option<Rc<dyn TransportPeer>>;
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
enum PeerEvent {
    #[display("extendedIceConnectionStateChange")]
    StateChange,
}

#[derive(Debug, Clone, Default)]
struct LocalPeerState {
    nick: Option<String>,
    stream: Option<MediaStream>,
    ice_connection_state: String,
    connection_state: String,
    simulcast: bool,
    stats: HashMap<MediaKind, SenderStats>,
}

/// In-memory transport peer driven by hand, for the scenario replay and tests.
pub struct LocalPeer {
    key: PeerKey,
    state: RefCell<LocalPeerState>,
    selected_simulcast: Cell<Option<(SimulcastQuality, SimulcastQuality)>>,
    handlers: Emitter<PeerEvent, StateChangeHandler>,
}

impl fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPeer")
            .field("key", &self.key)
            .field("state", &self.state.borrow())
            .field("selected_simulcast", &self.selected_simulcast.get())
            .finish()
    }
}

impl LocalPeer {
    pub fn new(key: PeerKey) -> Self {
        Self {
            key,
            state: RefCell::new(LocalPeerState {
                ice_connection_state: "new".to_string(),
                connection_state: "new".to_string(),
                ..Default::default()
            }),
            selected_simulcast: Cell::new(None),
            handlers: Emitter::new(),
        }
    }

    pub fn set_nick(&self, nick: Option<String>) {
        self.state.borrow_mut().nick = nick;
    }

    pub fn set_stream(&self, stream: Option<MediaStream>) {
        self.state.borrow_mut().stream = stream;
    }

    pub fn set_simulcast_enabled(&self, enabled: bool) {
        self.state.borrow_mut().simulcast = enabled;
    }

    pub fn set_sender_stats(&self, kind: MediaKind, stats: SenderStats) {
        self.state.borrow_mut().stats.insert(kind, stats);
    }

    pub fn set_connection_state(&self, state: impl Into<String>) {
        self.state.borrow_mut().connection_state = state.into();
    }

    /// Updates the extended ICE connection state and notifies subscribers.
    pub fn set_ice_connection_state(&self, state: impl Into<String>) {
        let state = state.into();
        self.state.borrow_mut().ice_connection_state = state.clone();
        self.handlers.emit(&PeerEvent::StateChange, |handler| handler(&state));
    }

    pub fn selected_simulcast_stream(&self) -> Option<(SimulcastQuality, SimulcastQuality)> {
        self.selected_simulcast.get()
    }

    pub fn state_subscriber_count(&self) -> usize {
        self.handlers.subscriber_count(&PeerEvent::StateChange)
    }
}

impl TransportPeer for LocalPeer {
    fn key(&self) -> &PeerKey {
        &self.key
    }

    fn nick(&self) -> Option<String> {
        self.state.borrow().nick.clone()
    }

    fn stream(&self) -> Option<MediaStream> {
        self.state.borrow().stream.clone()
    }

    fn ice_connection_state(&self) -> String {
        self.state.borrow().ice_connection_state.clone()
    }

    fn connection_state(&self) -> String {
        self.state.borrow().connection_state.clone()
    }

    fn simulcast_enabled(&self) -> bool {
        self.state.borrow().simulcast
    }

    fn select_simulcast_stream(&self, spatial: SimulcastQuality, temporal: SimulcastQuality) {
        debug!(peer = %self.key, %spatial, %temporal, "selecting simulcast stream");
        self.selected_simulcast.set(Some((spatial, temporal)));
    }

    fn sender_stats(&self, kind: MediaKind) -> Option<SenderStats> {
        self.state.borrow().stats.get(&kind).copied()
    }

    fn on_state_change(&self, handler: Rc<StateChangeHandler>) -> SubscriptionId {
        self.handlers.on(PeerEvent::StateChange, handler)
    }

    fn off_state_change(&self, id: SubscriptionId) {
        self.handlers.off(&PeerEvent::StateChange, id);
    }
}

/// In-memory registry of [`LocalPeer`]s.
#[derive(Debug, Default)]
pub struct LocalPeerRegistry {
    peers: RefCell<HashMap<PeerKey, Rc<LocalPeer>>>,
}

impl LocalPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh peer, replacing any previous peer with the same key.
    pub fn insert(&self, key: PeerKey) -> Rc<LocalPeer> {
        let peer = Rc::new(LocalPeer::new(key.clone()));
        if self.peers.borrow_mut().insert(key.clone(), peer.clone()).is_some() {
            debug!(peer = %key, "replaced existing peer");
        }
        peer
    }

    pub fn remove(&self, key: &PeerKey) -> Option<Rc<LocalPeer>> {
        self.peers.borrow_mut().remove(key)
    }

    pub fn get(&self, key: &PeerKey) -> Option<Rc<LocalPeer>> {
        self.peers.borrow().get(key).cloned()
    }
}

impl PeerRegistry for LocalPeerRegistry {
    fn peer(&self, key: &PeerKey) -> Option<Rc<dyn TransportPeer>> {
        self.get(key).map(|peer| peer as Rc<dyn TransportPeer>)
    }
}
