//! Events exchanged with the signaling hub.

use crate::{
    observable::{
        Emitter,
        SubscriptionId,
    },
    participant::RaisedHand,
    peer::PeerKey,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    cell::RefCell,
    rc::Rc,
};
use strum::{
    Display,
    EnumDiscriminants,
    EnumIter,
};

#[derive(Debug, Default, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Audio,
    Video,
}

/// Payload of a data channel message. Only the speaking notifications matter
/// to the participant models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelPayload {
    Speaking,
    StoppedSpeaking,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(SignalingEventKind), derive(Hash, Display, EnumIter))]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignalingEvent {
    PeerStreamAdded {
        peer: PeerKey,
    },
    PeerStreamRemoved {
        peer: PeerKey,
    },
    Nick {
        id: String,
        #[serde(default)]
        name: String,
    },
    Mute {
        id: String,
        #[serde(default)]
        kind: TrackKind,
    },
    Unmute {
        id: String,
        #[serde(default)]
        kind: TrackKind,
    },
    ChannelMessage {
        peer: PeerKey,
        label: String,
        payload: ChannelPayload,
    },
    RaisedHand {
        id: String,
        raised: RaisedHand,
    },
}

/// Control message broadcast to every party of the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    #[serde(rename_all = "camelCase")]
    ForceMute { peer_id: String },
}

pub type SignalingHandler = dyn Fn(&SignalingEvent);

pub trait SignalingHub {
    fn on(&self, kind: SignalingEventKind, handler: Rc<SignalingHandler>) -> SubscriptionId;

    fn off(&self, kind: SignalingEventKind, id: SubscriptionId);

    /// Broadcasts `message` to all other parties. The sender does not receive
    /// its own broadcast.
    fn send_control_to_all(&self, message: ControlMessage);
}

/// In-memory signaling hub: dispatches events handed to [`Self::dispatch`] and
/// records the control messages sent through it.
#[derive(Debug, Default)]
pub struct LocalSignalingHub {
    emitter: Emitter<SignalingEventKind, SignalingHandler>,
    sent: RefCell<Vec<ControlMessage>>,
}

impl LocalSignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, event: &SignalingEvent) {
        let kind = SignalingEventKind::from(event);
        trace!(%kind, "dispatching signaling event");
        self.emitter.emit(&kind, |handler| handler(event));
    }

    pub fn sent_messages(&self) -> Vec<ControlMessage> {
        self.sent.borrow().clone()
    }

    pub fn subscriber_count(&self, kind: SignalingEventKind) -> usize {
        self.emitter.subscriber_count(&kind)
    }

    pub fn has_subscribers(&self) -> bool {
        !self.emitter.is_empty()
    }
}

impl SignalingHub for LocalSignalingHub {
    fn on(&self, kind: SignalingEventKind, handler: Rc<SignalingHandler>) -> SubscriptionId {
        self.emitter.on(kind, handler)
    }

    fn off(&self, kind: SignalingEventKind, id: SubscriptionId) {
        self.emitter.off(&kind, id);
    }

    fn send_control_to_all(&self, message: ControlMessage) {
        debug!(?message, "sending control message to all");
        self.sent.borrow_mut().push(message);
    }
}
