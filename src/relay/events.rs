//! # Relay Event Protocol
//!
//! Every WebSocket frame is a JSON object with an `event` name and a `data`
//! payload:
//!
//! ```json
//! { "event": "send-text", "data": { "roomId": "r1", "text": "Hello", "sourceLanguage": "English" } }
//! ```
//!
//! Inbound payload fields default to empty so that missing fields reach the
//! engine's validation and come back as an `invalid_input` error instead of a
//! parse failure.

use serde::{Deserialize, Serialize};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    JoinRoom(JoinRoom),
    /// Sent without a payload: `{"event": "leave-room"}`
    LeaveRoom,
    AudioStream(AudioStream),
    SendText(SendText),
    Offer(Signal),
    Answer(Signal),
    IceCandidate(Signal),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinRoom {
    pub room_id: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioStream {
    pub room_id: String,
    /// Base64-encoded audio clip
    pub audio_data: String,
    pub source_language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendText {
    pub room_id: String,
    pub text: String,
    pub source_language: String,
}

/// WebRTC signaling payload, relayed without inspection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Signal {
    pub room_id: String,
    pub payload: serde_json::Value,
}

/// Which signaling message is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    Connected(Connected),
    RoomState(RoomState),
    UserConnected(Presence),
    UserDisconnected(Presence),
    Transcription(Transcription),
    TranslatedText(TranslatedText),
    TranslatedAudio(TranslatedAudio),
    Offer(RelayedSignal),
    Answer(RelayedSignal),
    IceCandidate(RelayedSignal),
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    pub fn signal(kind: SignalKind, from: &str, payload: serde_json::Value) -> Self {
        let relayed = RelayedSignal {
            from: from.to_string(),
            payload,
        };
        match kind {
            SignalKind::Offer => OutboundEvent::Offer(relayed),
            SignalKind::Answer => OutboundEvent::Answer(relayed),
            SignalKind::IceCandidate => OutboundEvent::IceCandidate(relayed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub connection_id: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room_id: String,
    pub members: Vec<MemberView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedText {
    pub original_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedAudio {
    pub original_text: String,
    pub translated_text: String,
    /// Base64-encoded synthesized speech
    pub audio_data: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub from: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_send_text_parses() {
        let raw = r#"{"event":"send-text","data":{"roomId":"R1","text":"Hello","sourceLanguage":"English"}}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            InboundEvent::SendText(SendText {
                room_id: "R1".into(),
                text: "Hello".into(),
                source_language: "English".into(),
            })
        );
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let raw = r#"{"event":"join-room","data":{"roomId":"R1"}}"#;
        match serde_json::from_str::<InboundEvent>(raw).unwrap() {
            InboundEvent::JoinRoom(join) => {
                assert_eq!(join.room_id, "R1");
                assert!(join.language.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_leave_room_without_data() {
        let event: InboundEvent = serde_json::from_str(r#"{"event":"leave-room"}"#).unwrap();
        assert_eq!(event, InboundEvent::LeaveRoom);
    }

    #[test]
    fn test_ice_candidate_payload_is_opaque() {
        let raw = r#"{"event":"ice-candidate","data":{"roomId":"R1","payload":{"candidate":"abc","sdpMid":"0"}}}"#;
        match serde_json::from_str::<InboundEvent>(raw).unwrap() {
            InboundEvent::IceCandidate(signal) => {
                assert_eq!(signal.payload, json!({"candidate": "abc", "sdpMid": "0"}));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<InboundEvent>(r#"{"event":"self-destruct","data":{}}"#).is_err());
    }

    #[test]
    fn test_outbound_translated_text_wire_format() {
        let event = OutboundEvent::TranslatedText(TranslatedText {
            original_text: "Hello".into(),
            translated_text: "Hola".into(),
            source_language: "English".into(),
            target_language: "Spanish".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "translated-text",
                "data": {
                    "originalText": "Hello",
                    "translatedText": "Hola",
                    "sourceLanguage": "English",
                    "targetLanguage": "Spanish"
                }
            })
        );
    }

    #[test]
    fn test_presence_omits_missing_language() {
        let event = OutboundEvent::UserDisconnected(Presence {
            connection_id: "abc".into(),
            language: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "user-disconnected", "data": {"connectionId": "abc"}}));
    }
}
