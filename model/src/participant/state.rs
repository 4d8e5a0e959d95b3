use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
};

/// Connection state of a remote participant, mirrored from the extended ICE
/// connection state reported by its transport peer.
#[derive(Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    /// Still disconnected after the transport's grace period.
    DisconnectedLong,
    Failed,
    /// Failed and no ICE restart will be attempted.
    FailedNoRestart,
    Closed,
}

impl ConnectionState {
    /// A (re)starting connection forgets everything known about the media.
    pub fn resets_media_state(self) -> bool {
        matches!(self, Self::New | Self::Checking)
    }

    /// Once established, the transport nickname becomes the display name.
    pub fn adopts_peer_nick(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// A boolean that may not be known yet.
#[derive(Debug, Default, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriState {
    #[default]
    Unknown,
    True,
    False,
}

impl TriState {
    pub fn is_true(self) -> bool {
        self == Self::True
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Raise-hand request of a participant. The timestamp is whatever the sender
/// put there, usually milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RaisedHand {
    pub state: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl RaisedHand {
    /// The timestamp as a point in time, if it is a valid epoch in milliseconds.
    pub fn raised_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }
}

/// Simulcast layer requested from a sender, used for both the spatial and the
/// temporal layer.
#[derive(Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SimulcastQuality {
    Low = 0,
    Medium = 1,
    #[default]
    High = 2,
}
