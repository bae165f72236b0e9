//! Client wire protocol: tagged JSON control messages plus the raw binary
//! PCM frames carried alongside them on the same socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Transcript, VolumeCommand};

/// Inbound JSON control messages. Anything that doesn't parse into one of
/// these variants is logged and dropped; the session is preserved.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat {
        #[allow(dead_code)]
        timestamp: Option<DateTime<Utc>>,
    },
    Config {
        payload: Value,
        #[allow(dead_code)]
        timestamp: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AckPayload {
    pub client_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptPayload {
    pub id: Uuid,
    pub text: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub is_partial: bool,
    pub audio_segment_id: Uuid,
}

impl From<&Transcript> for TranscriptPayload {
    fn from(t: &Transcript) -> Self {
        Self {
            id: t.id,
            text: t.text.clone(),
            confidence: t.confidence,
            timestamp: t.timestamp,
            is_partial: t.is_partial,
            audio_segment_id: t.audio_segment_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeActionPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: String,
    pub confidence: f32,
}

impl From<&VolumeCommand> for VolumeActionPayload {
    fn from(cmd: &VolumeCommand) -> Self {
        Self {
            kind: match cmd.kind {
                crate::types::VolumeCommandKind::Dim => "LOWER_VOLUME",
                crate::types::VolumeCommandKind::Restore => "RESTORE_VOLUME",
            },
            timestamp: cmd.timestamp,
            trigger_reason: cmd.trigger_reason.to_string(),
            confidence: cmd.confidence,
        }
    }
}

/// Outbound JSON messages, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        payload: AckPayload,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Transcript {
        payload: TranscriptPayload,
        timestamp: DateTime<Utc>,
    },
    VolumeAction {
        payload: VolumeActionPayload,
        timestamp: DateTime<Utc>,
        client_id: Uuid,
    },
}

impl ServerMessage {
    pub fn ack(client_id: Uuid) -> Self {
        ServerMessage::Ack {
            payload: AckPayload {
                client_id,
                status: "connected",
            },
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        ServerMessage::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn transcript(transcript: &Transcript) -> Self {
        ServerMessage::Transcript {
            payload: transcript.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn volume_action(client_id: Uuid, command: &VolumeCommand) -> Self {
        ServerMessage::VolumeAction {
            payload: command.into(),
            timestamp: Utc::now(),
            client_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_control_message_parses() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"heartbeat","timestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert!(matches!(parsed, ClientMessage::Heartbeat { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let parsed = serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn ack_message_serializes_with_type_tag() {
        let msg = ServerMessage::ack(Uuid::new_v4());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["payload"]["status"], "connected");
    }
}
