use super::state::{
    ConnectionState,
    RaisedHand,
    TriState,
};
use crate::{
    observable::Attributes,
    peer::{
        MediaStream,
        PeerKey,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use strum::{
    Display,
    EnumIter,
};

#[derive(Debug, Clone, Copy, Display, EnumIter, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParticipantAttribute {
    PeerId,
    SessionId,
    UserId,
    Name,
    ConnectionState,
    Stream,
    ScreenStream,
    AudioAvailable,
    Speaking,
    VideoAvailable,
    RaisedHand,
    MediaPeer,
    ScreenPeer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParticipantValue {
    Text(Option<String>),
    ConnectionState(ConnectionState),
    TriState(TriState),
    Stream(Option<MediaStream>),
    RaisedHand(RaisedHand),
    Peer(Option<PeerKey>),
}

impl fmt::Display for ParticipantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn optional(f: &mut fmt::Formatter<'_>, value: Option<&dyn fmt::Display>) -> fmt::Result {
            match value {
                Some(value) => write!(f, "{value}"),
                None => write!(f, "null"),
            }
        }

        match self {
            Self::Text(text) => optional(f, text.as_ref().map(|t| t as &dyn fmt::Display)),
            Self::ConnectionState(state) => write!(f, "{state}"),
            Self::TriState(value) => write!(f, "{value}"),
            Self::Stream(stream) => optional(f, stream.as_ref().map(|s| s as &dyn fmt::Display)),
            Self::RaisedHand(raised) => match (raised.raised_at(), raised.timestamp) {
                (Some(at), _) => write!(f, "{} at {}", raised.state, at.to_rfc3339()),
                (None, Some(timestamp)) => write!(f, "{} at {timestamp}", raised.state),
                (None, None) => write!(f, "{}", raised.state),
            },
            Self::Peer(peer) => optional(f, peer.as_ref().map(|p| p as &dyn fmt::Display)),
        }
    }
}

/// Everything a participant model knows about its remote participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParticipantAttributes {
    pub peer_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub connection_state: ConnectionState,
    pub stream: Option<MediaStream>,
    pub screen_stream: Option<MediaStream>,
    pub audio_available: TriState,
    pub speaking: TriState,
    pub video_available: TriState,
    pub raised_hand: RaisedHand,
    pub media_peer: Option<PeerKey>,
    pub screen_peer: Option<PeerKey>,
}

impl ParticipantAttributes {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ..Default::default()
        }
    }
}

impl Attributes for ParticipantAttributes {
    type Key = ParticipantAttribute;
    type Value = ParticipantValue;

    fn get(&self, key: ParticipantAttribute) -> ParticipantValue {
        use ParticipantAttribute as A;
        use ParticipantValue as V;

        match key {
            A::PeerId => V::Text(Some(self.peer_id.clone())),
            A::SessionId => V::Text(self.session_id.clone()),
            A::UserId => V::Text(self.user_id.clone()),
            A::Name => V::Text(self.name.clone()),
            A::ConnectionState => V::ConnectionState(self.connection_state),
            A::Stream => V::Stream(self.stream.clone()),
            A::ScreenStream => V::Stream(self.screen_stream.clone()),
            A::AudioAvailable => V::TriState(self.audio_available),
            A::Speaking => V::TriState(self.speaking),
            A::VideoAvailable => V::TriState(self.video_available),
            A::RaisedHand => V::RaisedHand(self.raised_hand),
            A::MediaPeer => V::Peer(self.media_peer.clone()),
            A::ScreenPeer => V::Peer(self.screen_peer.clone()),
        }
    }

    fn set(&mut self, key: ParticipantAttribute, value: ParticipantValue) -> bool {
        use ParticipantAttribute as A;
        use ParticipantValue as V;

        match (key, value) {
            (A::PeerId, V::Text(Some(peer_id))) => self.peer_id = peer_id,
            (A::SessionId, V::Text(session_id)) => self.session_id = session_id,
            (A::UserId, V::Text(user_id)) => self.user_id = user_id,
            (A::Name, V::Text(name)) => self.name = name,
            (A::ConnectionState, V::ConnectionState(state)) => self.connection_state = state,
            (A::Stream, V::Stream(stream)) => self.stream = stream,
            (A::ScreenStream, V::Stream(stream)) => self.screen_stream = stream,
            (A::AudioAvailable, V::TriState(value)) => self.audio_available = value,
            (A::Speaking, V::TriState(value)) => self.speaking = value,
            (A::VideoAvailable, V::TriState(value)) => self.video_available = value,
            (A::RaisedHand, V::RaisedHand(raised)) => self.raised_hand = raised,
            (A::MediaPeer, V::Peer(peer)) => self.media_peer = peer,
            (A::ScreenPeer, V::Peer(peer)) => self.screen_peer = peer,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn every_attribute_reads_back_what_was_written() {
        let mut attributes = ParticipantAttributes::new("P1");
        for key in ParticipantAttribute::iter() {
            let value = attributes.get(key);
            assert!(attributes.set(key, value.clone()), "{key} rejected its own value");
            assert_eq!(attributes.get(key), value);
        }
    }

    #[test]
    fn values_of_the_wrong_kind_are_rejected() {
        let mut attributes = ParticipantAttributes::new("P1");
        assert!(!attributes.set(ParticipantAttribute::Speaking, ParticipantValue::Text(None)));
        assert!(!attributes.set(ParticipantAttribute::PeerId, ParticipantValue::Text(None)));
        assert_eq!(attributes.peer_id, "P1");
        assert_eq!(attributes.speaking, TriState::Unknown);
    }

    #[test]
    fn values_display_for_logs() {
        assert_eq!(ParticipantValue::Text(None).to_string(), "null");
        assert_eq!(ParticipantValue::Text(Some("Alice".into())).to_string(), "Alice");
        assert_eq!(
            ParticipantValue::ConnectionState(ConnectionState::DisconnectedLong).to_string(),
            "disconnected-long"
        );
        assert_eq!(ParticipantValue::Peer(Some(PeerKey::screen("P1"))).to_string(), "P1/screen");
    }
}
