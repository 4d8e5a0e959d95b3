//! Observable connection models of the remote participants of a call.

#[macro_use]
extern crate tracing;

pub mod analyzer;
pub mod observable;
pub mod participant;
pub mod peer;
pub mod signaling;

pub use analyzer::{
    CallAnalyzer,
    ConnectionQuality,
    LocalMediaState,
    LocalParticipant,
    QualityAttribute,
    StatsQualityAnalyzerFactory,
};
pub use observable::{
    StoreEvent,
    SubscriptionId,
};
pub use participant::{
    CallContext,
    ConnectionState,
    LocalAudioOutput,
    ParticipantAttribute,
    ParticipantCollection,
    ParticipantConnection,
    ParticipantValue,
    TriState,
};
pub use peer::{
    LocalPeerRegistry,
    MediaKind,
    MediaStream,
    PeerKey,
    PeerSlot,
};
pub use signaling::{
    LocalSignalingHub,
    SignalingEvent,
};
