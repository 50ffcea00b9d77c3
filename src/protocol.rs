//! Wire protocol for the streaming transcription socket.
//!
//! Binary frames carry raw f32 little-endian mono samples; text frames carry
//! the JSON control and result messages defined here.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Session metadata set by the client. Stored, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub language: Option<String>,
    pub use_itn: Option<bool>,
}

/// Control messages sent by the client as text frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        use_itn: Option<bool>,
    },
    /// End of stream: flush any pending segment, then close.
    Done,
    /// Answer to a server liveness ping.
    Pong,
    /// Client-initiated keepalive, no response required.
    Heartbeat,
    Status,
}

/// Messages sent to the client as text frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        message: String,
        model_loaded: bool,
    },
    Partial {
        text: String,
        timestamp: String,
        confidence: f32,
    },
    Final {
        text: String,
        timestamp: String,
        confidence: f32,
        segment_id: u64,
    },
    Error {
        message: String,
        code: u16,
    },
    /// Liveness probe; the client should answer with `pong`.
    Ping,
    /// Idle-close notice sent just before the server closes the session.
    Timeout {
        message: String,
        timestamp: String,
    },
}

/// ISO 8601 timestamp with millisecond precision for result messages.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"config","language":"yue","use_itn":true}"#).unwrap();
        match msg {
            ClientMessage::Config { language, use_itn } => {
                assert_eq!(language.as_deref(), Some("yue"));
                assert_eq!(use_itn, Some(true));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parses_done_and_pong() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"done"}"#).unwrap(),
            ClientMessage::Done
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"pong"}"#).unwrap(),
            ClientMessage::Pong
        ));
    }

    #[test]
    fn rejects_unknown_control_message() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn serializes_final_with_tag() {
        let msg = ServerMessage::Final {
            text: "hello".into(),
            timestamp: now_timestamp(),
            confidence: 0.98,
            segment_id: 3,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"final""#));
        assert!(json.contains(r#""segment_id":3"#));
    }
}
