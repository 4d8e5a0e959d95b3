//! Sender side connection quality grading.

use crate::{
    observable::{
        Attributes,
        Emitter,
        StoreEvent,
        SubscriptionId,
    },
    peer::{
        MediaKind,
        PeerKey,
        PeerRegistry,
        PeerSlot,
        SenderStats,
    },
};
use call_simulator_config::QualityThresholds;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::{
        HashMap,
        VecDeque,
    },
    fmt,
    rc::Rc,
};
use strum::{
    Display,
    EnumIter,
    IntoEnumIterator as _,
};

/// Coarse quality grade, ordered from unknown to best.
#[derive(
    Debug, Default, Clone, Copy, Display, EnumIter, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    NoTransmittedData,
    VeryBad,
    Bad,
    Medium,
    Good,
}

#[derive(Debug, Clone, Copy, Display, EnumIter, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityAttribute {
    SenderQualityAudio,
    SenderQualityVideo,
    SenderQualityScreen,
}

impl From<MediaKind> for QualityAttribute {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::SenderQualityAudio,
            MediaKind::Video => Self::SenderQualityVideo,
            MediaKind::Screen => Self::SenderQualityScreen,
        }
    }
}

/// Latest grade of every local sender.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SenderQualityGrades {
    pub audio: ConnectionQuality,
    pub video: ConnectionQuality,
    pub screen: ConnectionQuality,
}

impl Attributes for SenderQualityGrades {
    type Key = QualityAttribute;
    type Value = ConnectionQuality;

    fn get(&self, key: QualityAttribute) -> ConnectionQuality {
        match key {
            QualityAttribute::SenderQualityAudio => self.audio,
            QualityAttribute::SenderQualityVideo => self.video,
            QualityAttribute::SenderQualityScreen => self.screen,
        }
    }

    fn set(&mut self, key: QualityAttribute, value: ConnectionQuality) -> bool {
        let slot = match key {
            QualityAttribute::SenderQualityAudio => &mut self.audio,
            QualityAttribute::SenderQualityVideo => &mut self.video,
            QualityAttribute::SenderQualityScreen => &mut self.screen,
        };
        *slot = value;
        true
    }
}

/// Whether the local user currently sends each kind of media.
pub trait LocalMedia {
    fn is_enabled(&self, kind: MediaKind) -> bool;
}

/// [`LocalMedia`] toggled by hand. Every kind starts enabled.
#[derive(Debug)]
pub struct LocalMediaState {
    audio: Cell<bool>,
    video: Cell<bool>,
    screen: Cell<bool>,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            audio: Cell::new(true),
            video: Cell::new(true),
            screen: Cell::new(true),
        }
    }
}

impl LocalMediaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        self.flag(kind).set(enabled);
    }

    fn flag(&self, kind: MediaKind) -> &Cell<bool> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
            MediaKind::Screen => &self.screen,
        }
    }
}

impl LocalMedia for LocalMediaState {
    fn is_enabled(&self, kind: MediaKind) -> bool {
        self.flag(kind).get()
    }
}

/// The local end of the call: its id and the transport peers it sends through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalParticipant {
    pub peer_id: String,
    #[serde(default)]
    pub media_peer: Option<PeerKey>,
    #[serde(default)]
    pub screen_peer: Option<PeerKey>,
}

impl LocalParticipant {
    pub fn new(peer_id: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        Self {
            media_peer: Some(PeerKey::media(peer_id.clone())),
            screen_peer: Some(PeerKey::screen(peer_id.clone())),
            peer_id,
        }
    }

    /// Transport peer sending `kind`.
    pub fn sender(&self, kind: MediaKind) -> Option<&PeerKey> {
        match kind.slot() {
            PeerSlot::Media => self.media_peer.as_ref(),
            PeerSlot::Screen => self.screen_peer.as_ref(),
        }
    }
}

pub type QualityChangeHandler = dyn Fn(ConnectionQuality);

/// Grades the connection quality of the local senders.
pub trait QualityAnalyzer {
    fn on_change(&self, attribute: QualityAttribute, handler: Rc<QualityChangeHandler>) -> SubscriptionId;

    fn off_change(&self, attribute: QualityAttribute, id: SubscriptionId);

    /// Takes one stats sample per sender and publishes changed grades.
    fn analyze(&self);

    fn destroy(&self);
}

pub trait QualityAnalyzerFactory {
    fn sender_analyzer(&self, media: Rc<dyn LocalMedia>, local: &LocalParticipant) -> Rc<dyn QualityAnalyzer>;
}

/// [`QualityAnalyzer`] grading packet loss and round trip time over a window
/// of cumulative sender statistics.
pub struct StatsQualityAnalyzer {
    media: Rc<dyn LocalMedia>,
    local: LocalParticipant,
    peers: Rc<dyn PeerRegistry>,
    thresholds: QualityThresholds,
    grades: RefCell<SenderQualityGrades>,
    windows: RefCell<HashMap<MediaKind, VecDeque<SenderStats>>>,
    emitter: Emitter<StoreEvent<QualityAttribute>, QualityChangeHandler>,
    destroyed: Cell<bool>,
}

impl fmt::Debug for StatsQualityAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsQualityAnalyzer")
            .field("local", &self.local)
            .field("grades", &self.grades.borrow())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl StatsQualityAnalyzer {
    pub fn new(
        media: Rc<dyn LocalMedia>,
        local: LocalParticipant,
        peers: Rc<dyn PeerRegistry>,
        thresholds: QualityThresholds,
    ) -> Self {
        Self {
            media,
            local,
            peers,
            thresholds,
            grades: RefCell::default(),
            windows: RefCell::default(),
            emitter: Emitter::new(),
            destroyed: Cell::new(false),
        }
    }

    pub fn grades(&self) -> SenderQualityGrades {
        *self.grades.borrow()
    }

    fn sample(&self, kind: MediaKind) -> Option<SenderStats> {
        let key = self.local.sender(kind)?;
        self.peers.peer(key)?.sender_stats(kind)
    }

    fn grade_sender(&self, kind: MediaKind) -> ConnectionQuality {
        let mut windows = self.windows.borrow_mut();

        if !self.media.is_enabled(kind) {
            windows.remove(&kind);
            return ConnectionQuality::Unknown;
        }

        let Some(sample) = self.sample(kind) else {
            trace!(%kind, "no sender stats, forgetting the window");
            windows.remove(&kind);
            return ConnectionQuality::Unknown;
        };

        let window = windows.entry(kind).or_default();
        window.push_back(sample);
        while window.len() > self.thresholds.window.max(2) {
            window.pop_front();
        }
        grade(window, &self.thresholds)
    }

    fn publish(&self, attribute: QualityAttribute, quality: ConnectionQuality) {
        let changed = {
            let mut grades = self.grades.borrow_mut();
            grades.get(attribute) != quality && grades.set(attribute, quality)
        };
        if !changed {
            return;
        }
        debug!(%attribute, %quality, "sender quality changed");
        self.emitter
            .emit(&StoreEvent::Change(attribute), |handler| handler(quality));
    }
}

impl QualityAnalyzer for StatsQualityAnalyzer {
    fn on_change(&self, attribute: QualityAttribute, handler: Rc<QualityChangeHandler>) -> SubscriptionId {
        self.emitter.on(StoreEvent::Change(attribute), handler)
    }

    fn off_change(&self, attribute: QualityAttribute, id: SubscriptionId) {
        self.emitter.off(&StoreEvent::Change(attribute), id);
    }

    fn analyze(&self) {
        if self.destroyed.get() {
            trace!("analyzer destroyed, skipping analysis");
            return;
        }
        for kind in MediaKind::iter() {
            let quality = self.grade_sender(kind);
            self.publish(kind.into(), quality);
        }
    }

    fn destroy(&self) {
        self.destroyed.set(true);
        self.windows.borrow_mut().clear();
    }
}

/// Creates [`StatsQualityAnalyzer`]s reading from `peers`.
#[derive(derive_more::Debug)]
pub struct StatsQualityAnalyzerFactory {
    #[debug(skip)]
    peers: Rc<dyn PeerRegistry>,
    thresholds: QualityThresholds,
}

impl StatsQualityAnalyzerFactory {
    pub fn new(peers: Rc<dyn PeerRegistry>, thresholds: QualityThresholds) -> Self {
        Self { peers, thresholds }
    }
}

impl QualityAnalyzerFactory for StatsQualityAnalyzerFactory {
    fn sender_analyzer(&self, media: Rc<dyn LocalMedia>, local: &LocalParticipant) -> Rc<dyn QualityAnalyzer> {
        Rc::new(StatsQualityAnalyzer::new(
            media,
            local.clone(),
            self.peers.clone(),
            self.thresholds.clone(),
        ))
    }
}

/// Grades a window of cumulative samples, oldest first.
pub fn grade(window: &VecDeque<SenderStats>, thresholds: &QualityThresholds) -> ConnectionQuality {
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return ConnectionQuality::Unknown;
    };
    if window.len() < 2 {
        return ConnectionQuality::Unknown;
    }

    let sent = last.packets_sent.saturating_sub(first.packets_sent);
    if sent == 0 {
        return ConnectionQuality::NoTransmittedData;
    }
    let lost = last.packets_lost.saturating_sub(first.packets_lost);
    let loss_ratio = lost as f64 / (sent + lost) as f64;

    let by_loss = against(
        loss_ratio,
        thresholds.packet_loss_medium,
        thresholds.packet_loss_bad,
        thresholds.packet_loss_very_bad,
    );
    let by_round_trip = last.round_trip_time.map_or(ConnectionQuality::Good, |rtt| {
        against(
            rtt,
            thresholds.round_trip_time_medium,
            thresholds.round_trip_time_bad,
            thresholds.round_trip_time_very_bad,
        )
    });
    by_loss.min(by_round_trip)
}

fn against(value: f64, medium: f64, bad: f64, very_bad: f64) -> ConnectionQuality {
    if value >= very_bad {
        ConnectionQuality::VeryBad
    } else if value >= bad {
        ConnectionQuality::Bad
    } else if value >= medium {
        ConnectionQuality::Medium
    } else {
        ConnectionQuality::Good
    }
}
