//! System event types

use serde::Serialize;

use crate::indicator::IndicatorId;
use crate::power::SystemState;

/// How a streaming session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum SessionOutcome {
    /// The consumer went away
    Disconnected,
    /// Stopped from outside: superseded by a newer session or power-off
    Deactivated,
    /// Gave up after initialization or capture failures
    Failed(String),
}

/// Events broadcast on the [`super::EventBus`]
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    #[serde(rename = "system.state_changed")]
    StateChanged { from: SystemState, to: SystemState },

    #[serde(rename = "capture.completed")]
    CaptureCompleted {
        /// File name inside the capture directory
        file: String,
        /// Whether the fallback (preview configuration) path produced it
        fallback: bool,
    },

    #[serde(rename = "capture.failed")]
    CaptureFailed { reason: String },

    #[serde(rename = "stream.session_ended")]
    StreamSessionEnded {
        session: String,
        outcome: SessionOutcome,
        frames: u64,
    },

    #[serde(rename = "indicator.changed")]
    IndicatorChanged { indicator: IndicatorId, active: bool },
}

impl SystemEvent {
    /// Event name, as used in the serialized `event` field
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "system.state_changed",
            Self::CaptureCompleted { .. } => "capture.completed",
            Self::CaptureFailed { .. } => "capture.failed",
            Self::StreamSessionEnded { .. } => "stream.session_ended",
            Self::IndicatorChanged { .. } => "indicator.changed",
        }
    }
}
