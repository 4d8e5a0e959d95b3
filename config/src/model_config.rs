use serde::{
    Deserialize,
    Serialize,
};

/// Options shared by every participant connection model of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Data channels whose `speaking`/`stoppedSpeaking` messages update the
    /// speaking state. Messages on any other channel are ignored.
    #[serde(default = "default_data_channel_labels")]
    pub data_channel_labels: Vec<String>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            data_channel_labels: default_data_channel_labels(),
        }
    }
}

impl ModelOptions {
    pub fn is_recognized_channel(&self, label: &str) -> bool {
        self.data_channel_labels.iter().any(|known| known == label)
    }
}

fn default_data_channel_labels() -> Vec<String> {
    vec!["status".to_string(), "JanusDataChannel".to_string()]
}

/// Grading limits of the stats based quality analyzer.
///
/// A sample window is graded by its packet loss ratio and by its latest round
/// trip time (in seconds); the worse of both grades wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Number of stats samples kept per media kind.
    pub window: usize,
    pub packet_loss_medium: f64,
    pub packet_loss_bad: f64,
    pub packet_loss_very_bad: f64,
    pub round_trip_time_medium: f64,
    pub round_trip_time_bad: f64,
    pub round_trip_time_very_bad: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            window: 5,
            packet_loss_medium: 0.1,
            packet_loss_bad: 0.2,
            packet_loss_very_bad: 0.3,
            round_trip_time_medium: 0.5,
            round_trip_time_bad: 1.0,
            round_trip_time_very_bad: 1.5,
        }
    }
}
