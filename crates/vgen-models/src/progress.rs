//! Progress message types published while a job runs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Progress message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMessageType {
    Log,
    Progress,
    Error,
    Done,
}

impl ProgressMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressMessageType::Log => "log",
            ProgressMessageType::Progress => "progress",
            ProgressMessageType::Error => "error",
            ProgressMessageType::Done => "done",
        }
    }
}

/// Progress message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// Log message with timestamp
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress update (0-100)
    Progress { value: u8 },

    /// Error message
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Job complete
    Done {
        #[serde(rename = "videoUrl")]
        video_url: String,
    },
}

impl ProgressMessage {
    /// Create a log message.
    pub fn log(message: impl Into<String>) -> Self {
        let now = Utc::now();
        let ts = now.format("%H:%M:%S").to_string();
        ProgressMessage::Log {
            message: format!("[{}] {}", ts, message.into()),
            timestamp: now,
        }
    }

    /// Create a progress message, clamped to 100.
    pub fn progress(value: u8) -> Self {
        ProgressMessage::Progress {
            value: value.min(100),
        }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        let now = Utc::now();
        let ts = now.format("%H:%M:%S").to_string();
        ProgressMessage::Error {
            message: format!("[{}] {}", ts, message.into()),
            timestamp: now,
        }
    }

    /// Create a done message.
    pub fn done(video_url: impl Into<String>) -> Self {
        ProgressMessage::Done {
            video_url: video_url.into(),
        }
    }

    pub fn message_type(&self) -> ProgressMessageType {
        match self {
            ProgressMessage::Log { .. } => ProgressMessageType::Log,
            ProgressMessage::Progress { .. } => ProgressMessageType::Progress,
            ProgressMessage::Error { .. } => ProgressMessageType::Error,
            ProgressMessage::Done { .. } => ProgressMessageType::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_message_serialization() {
        let json = serde_json::to_string(&ProgressMessage::progress(42)).unwrap();
        assert_eq!(json, r#"{"type":"progress","value":42}"#);
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(
            ProgressMessage::progress(250),
            ProgressMessage::Progress { value: 100 }
        );
    }

    #[test]
    fn test_done_uses_camel_case_url() {
        let json = serde_json::to_string(&ProgressMessage::done("https://x/y.mp4")).unwrap();
        assert!(json.contains("\"videoUrl\""));
        assert_eq!(
            ProgressMessage::done("u").message_type(),
            ProgressMessageType::Done
        );
    }
}
