//! Scenario files and their replay through the participant models.

use call_simulator_config::Config;
use call_simulator_model::{
    analyzer::SenderQualityGrades,
    participant::{
        ParticipantAttributes,
        SimulcastQuality,
    },
    peer::{
        LocalPeer,
        SenderStats,
    },
    signaling::ControlMessage,
    CallAnalyzer,
    CallContext,
    LocalAudioOutput,
    LocalMediaState,
    LocalParticipant,
    LocalPeerRegistry,
    LocalSignalingHub,
    MediaKind,
    MediaStream,
    ParticipantAttribute,
    ParticipantCollection,
    ParticipantConnection,
    PeerKey,
    PeerSlot,
    QualityAttribute,
    SignalingEvent,
    StatsQualityAnalyzerFactory,
    StoreEvent,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_yml::with::singleton_map_recursive;
use std::{
    cell::RefCell,
    path::{
        Path,
        PathBuf,
    },
    rc::Rc,
};
use strum::IntoEnumIterator as _;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("participant {0} has not joined")]
    UnknownParticipant(String),
    #[error("peer {0} is not registered")]
    UnknownPeer(PeerKey),
    #[error("scenario has no local participant")]
    NoLocalParticipant,
}

/// A call to replay: who takes part and what happens, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Local end of the call. Without it, media is considered to be routed
    /// through an MCU and sender quality is not analyzed.
    #[serde(default)]
    pub local: Option<LocalParticipant>,
    /// Remote participants present from the start.
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default, with = "singleton_map_recursive")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }
}

impl std::str::FromStr for Scenario {
    type Err = ScenarioError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Ok(serde_yml::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    /// Registers a transport peer, replacing any peer with the same key.
    AddPeer {
        peer: PeerKey,
        #[serde(default)]
        stream: Option<String>,
        #[serde(default)]
        nick: Option<String>,
        #[serde(default)]
        simulcast: bool,
    },
    RemovePeer {
        peer: PeerKey,
    },
    /// Updates the connection level state first, so that a following ICE
    /// state notification already sees it.
    SetPeerState {
        peer: PeerKey,
        #[serde(default)]
        connection: Option<String>,
        #[serde(default)]
        ice: Option<String>,
    },
    SetPeerStream {
        peer: PeerKey,
        #[serde(default)]
        stream: Option<String>,
    },
    Join {
        participant: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    Leave {
        participant: String,
    },
    Bind {
        participant: String,
        slot: PeerSlot,
        #[serde(default)]
        peer: Option<PeerKey>,
    },
    Unbind {
        participant: String,
        slot: PeerSlot,
    },
    Signal(SignalingEvent),
    ForceMute {
        participant: String,
    },
    SetSimulcastQuality {
        participant: String,
        slot: PeerSlot,
        quality: SimulcastQuality,
    },
    /// Cumulative stats of a local sender.
    SenderStats {
        kind: MediaKind,
        #[serde(flatten)]
        stats: SenderStats,
    },
    SetLocalMedia {
        kind: MediaKind,
        enabled: bool,
    },
    Analyze,
}

/// One attribute change observed during the replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub step: usize,
    pub source: String,
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub replayed_at: DateTime<Utc>,
    pub steps: usize,
    pub changes: usize,
    pub participants: Vec<ParticipantAttributes>,
    pub sender_quality: SenderQualityGrades,
    pub control_messages: Vec<ControlMessage>,
    pub attached_audio_sinks: usize,
}

/// A call assembled from in-memory collaborators, driven step by step.
pub struct Replay {
    hub: Rc<LocalSignalingHub>,
    peers: Rc<LocalPeerRegistry>,
    output: LocalAudioOutput,
    media: Rc<LocalMediaState>,
    local: Option<LocalParticipant>,
    participants: ParticipantCollection,
    analyzer: CallAnalyzer,
    step: Rc<RefCell<usize>>,
    changes: Rc<RefCell<Vec<Change>>>,
}

impl Replay {
    pub fn new(config: &Config, scenario: &Scenario) -> Self {
        let hub = Rc::new(LocalSignalingHub::new());
        let peers = Rc::new(LocalPeerRegistry::new());
        let output = LocalAudioOutput::new();
        let media = Rc::new(LocalMediaState::new());
        let context = CallContext::new(
            hub.clone(),
            peers.clone(),
            Rc::new(output.clone()),
            config.model.clone(),
        );
        let participants = ParticipantCollection::new(context);

        if let Some(local) = &scenario.local {
            for key in MediaKind::iter().filter_map(|kind| local.sender(kind)) {
                if peers.get(key).is_none() {
                    peers.insert(key.clone());
                }
            }
        }

        let factory = StatsQualityAnalyzerFactory::new(peers.clone(), config.quality.clone());
        let analyzer = CallAnalyzer::new(
            media.clone(),
            scenario.local.as_ref(),
            participants.clone(),
            &factory,
        );

        let replay = Self {
            hub,
            peers,
            output,
            media,
            local: scenario.local.clone(),
            participants,
            analyzer,
            step: Rc::default(),
            changes: Rc::default(),
        };
        replay.record_quality_changes();
        for peer_id in &scenario.participants {
            replay.join(peer_id);
        }
        replay
    }

    fn record_quality_changes(&self) {
        for attribute in QualityAttribute::iter() {
            let step = self.step.clone();
            let changes = self.changes.clone();
            self.analyzer
                .on(StoreEvent::Change(attribute), move |_, quality| {
                    info!(%attribute, %quality, "sender quality changed");
                    changes.borrow_mut().push(Change {
                        step: *step.borrow(),
                        source: "call".to_string(),
                        attribute: attribute.to_string(),
                        value: quality.to_string(),
                    });
                });
        }
    }

    fn join(&self, peer_id: &str) -> ParticipantConnection {
        if let Some(existing) = self.participants.get(peer_id) {
            return existing;
        }
        let participant = self.participants.add(peer_id);
        for attribute in ParticipantAttribute::iter() {
            let step = self.step.clone();
            let changes = self.changes.clone();
            participant.on(StoreEvent::Change(attribute), move |owner, value| {
                info!(peer_id = %owner.peer_id(), %attribute, %value, "participant changed");
                changes.borrow_mut().push(Change {
                    step: *step.borrow(),
                    source: owner.peer_id().to_string(),
                    attribute: attribute.to_string(),
                    value: value.to_string(),
                });
            });
        }
        info!(peer_id, "participant joined");
        participant
    }

    fn participant(&self, peer_id: &str) -> Result<ParticipantConnection, ScenarioError> {
        self.participants
            .get(peer_id)
            .ok_or_else(|| ScenarioError::UnknownParticipant(peer_id.to_string()))
    }

    fn peer(&self, key: &PeerKey) -> Result<Rc<LocalPeer>, ScenarioError> {
        self.peers.get(key).ok_or_else(|| ScenarioError::UnknownPeer(key.clone()))
    }

    pub fn run(&self, steps: &[Step]) -> Result<(), ScenarioError> {
        for step in steps {
            self.apply(step)?;
        }
        Ok(())
    }

    pub fn apply(&self, step: &Step) -> Result<(), ScenarioError> {
        let index = {
            let mut current = self.step.borrow_mut();
            *current += 1;
            *current
        };
        debug!(index, %step, "applying step");

        match step {
            Step::AddPeer {
                peer,
                stream,
                nick,
                simulcast,
            } => {
                let added = self.peers.insert(peer.clone());
                added.set_stream(stream.clone().map(MediaStream::new));
                added.set_nick(nick.clone());
                added.set_simulcast_enabled(*simulcast);
            }
            Step::RemovePeer { peer } => {
                self.peers.remove(peer).ok_or_else(|| ScenarioError::UnknownPeer(peer.clone()))?;
            }
            Step::SetPeerState { peer, connection, ice } => {
                let peer = self.peer(peer)?;
                if let Some(connection) = connection {
                    peer.set_connection_state(connection.clone());
                }
                if let Some(ice) = ice {
                    peer.set_ice_connection_state(ice.clone());
                }
            }
            Step::SetPeerStream { peer, stream } => {
                self.peer(peer)?.set_stream(stream.clone().map(MediaStream::new));
            }
            Step::Join {
                participant,
                session_id,
                user_id,
            } => {
                let participant = self.join(participant);
                if session_id.is_some() {
                    participant.set_session_id(session_id.clone());
                }
                if user_id.is_some() {
                    participant.set_user_id(user_id.clone());
                }
            }
            Step::Leave { participant } => {
                self.participants
                    .remove(participant)
                    .ok_or_else(|| ScenarioError::UnknownParticipant(participant.clone()))?;
                info!(peer_id = %participant, "participant left");
            }
            Step::Bind {
                participant,
                slot,
                peer,
            } => self.participant(participant)?.bind(*slot, peer.clone()),
            Step::Unbind { participant, slot } => self.participant(participant)?.unbind(*slot),
            Step::Signal(event) => self.hub.dispatch(event),
            Step::ForceMute { participant } => self.participant(participant)?.force_mute(),
            Step::SetSimulcastQuality {
                participant,
                slot,
                quality,
            } => self.participant(participant)?.set_simulcast_quality(*slot, *quality),
            Step::SenderStats { kind, stats } => {
                let local = self.local.as_ref().ok_or(ScenarioError::NoLocalParticipant)?;
                let key = local.sender(*kind).ok_or(ScenarioError::NoLocalParticipant)?;
                self.peer(key)?.set_sender_stats(*kind, *stats);
            }
            Step::SetLocalMedia { kind, enabled } => self.media.set_enabled(*kind, *enabled),
            Step::Analyze => self.analyzer.analyze(),
        }
        Ok(())
    }

    pub fn participants(&self) -> &ParticipantCollection {
        &self.participants
    }

    pub fn analyzer(&self) -> &CallAnalyzer {
        &self.analyzer
    }

    pub fn peers(&self) -> &LocalPeerRegistry {
        &self.peers
    }

    pub fn hub(&self) -> &LocalSignalingHub {
        &self.hub
    }

    pub fn changes(&self) -> Vec<Change> {
        self.changes.borrow().clone()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            replayed_at: Utc::now(),
            steps: *self.step.borrow(),
            changes: self.changes.borrow().len(),
            participants: self
                .participants
                .values()
                .iter()
                .map(ParticipantConnection::attributes)
                .collect(),
            sender_quality: self.analyzer.grades(),
            control_messages: self.hub.sent_messages(),
            attached_audio_sinks: self.output.attached(),
        }
    }

    /// Destroys every model. The replay is unusable afterwards.
    pub fn finish(&self) {
        self.participants.clear();
        self.analyzer.destroy();
        debug!(subscribers_left = self.hub.has_subscribers(), "replay finished");
    }
}
