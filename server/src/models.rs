//! Wire types for the mesh.
//!
//! Every payload that crosses the bus or a WebSocket lives here. Outgoing and
//! incoming envelopes are discriminated by a `kind` tag; parsing an unknown
//! kind is an error the caller logs and drops, never a panic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// MARK: - Bus payloads

/// A finalized transcript record, published on `transcripts`.
///
/// `ts_start`/`ts_end` are seconds relative to the start of the utterance.
/// For a given `utterance_id`, `ts_start` never decreases and the final
/// record is the last one emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub msg_id: Uuid,
    pub utterance_id: Uuid,
    pub text: String,
    pub ts_start: f64,
    pub ts_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A detected design intent, published on `intents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMessage {
    pub utterance_id: Uuid,
    pub component: String,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub brand_refs: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

/// A design specification, published on `design_specs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSpec {
    pub spec_id: Uuid,
    pub component: String,
    #[serde(default)]
    pub theme_tokens: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
    #[serde(default)]
    pub source_utts: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A generated UI component, published on `components`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMessage {
    pub spec_id: Uuid,
    pub jsx: String,
    pub tailwind: bool,
    #[serde(default)]
    pub named_exports: Vec<String>,
    pub lint_passed: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPostPreview {
    pub post_id: String,
    pub text: String,
    pub sentiment: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Sentiment/demographic insight for a spec, published on `insights`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightMessage {
    pub spec_id: Uuid,
    pub sentiment_histogram: BTreeMap<String, u32>,
    pub demographic_breakdown: BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(default)]
    pub top_posts: Vec<SocialPostPreview>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
    Degraded,
}

/// Service health notice, published on `service_status` and also used to
/// acknowledge client commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

// MARK: - Orchestrator envelopes (server -> client)

/// Everything the orchestrator sends to a browser client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outgoing {
    Transcript(TranscriptMessage),
    Intent(IntentMessage),
    Component(ComponentMessage),
    Insight(InsightMessage),
    Error(ErrorNotice),
    ServiceStatus(ServiceStatus),
}

impl Outgoing {
    /// Serialize for the wire. The envelope types contain nothing
    /// unserializable, so failure here is a bug.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }

    pub fn status(service_name: &str, status: ServiceState, message: impl Into<String>) -> Self {
        Outgoing::ServiceStatus(ServiceStatus {
            service_name: service_name.to_string(),
            status,
            message: Some(message.into()),
        })
    }
}

// MARK: - Orchestrator envelopes (client -> server)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchType {
    FullCode,
    Diff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    StartListening,
    StopListening,
    RequestMockupNow,
}

/// Messages a browser client sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    AudioChunk {
        session_id: Uuid,
        data_b64: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp_client: Option<f64>,
    },
    EditComponent {
        session_id: Uuid,
        spec_id: Uuid,
        #[serde(default = "PatchType::full_code")]
        patch_type: PatchType,
        code: String,
    },
    ControlSession {
        session_id: Uuid,
        action: ControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },
    PingCustom,
}

impl PatchType {
    fn full_code() -> Self {
        PatchType::FullCode
    }
}

// MARK: - STT session events (server -> client on /v1/stream)

/// One transcript segment as sent to the streaming client. Partials carry no
/// confidence; finals may.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub msg_id: Uuid,
    pub utterance_id: Uuid,
    pub text: String,
    pub ts_start: f64,
    pub ts_end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Events emitted on the STT WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SttEvent {
    Partial(TranscriptSegment),
    Final(TranscriptSegment),
    /// Backpressure hint: the transcription pool was saturated when a new
    /// segment arrived.
    Slow,
    Error {
        message: String,
    },
}

impl SttEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_envelopes_carry_kind_tags() {
        let envelope = Outgoing::Transcript(TranscriptMessage {
            msg_id: Uuid::new_v4(),
            utterance_id: Uuid::new_v4(),
            text: "hello".into(),
            ts_start: 0.0,
            ts_end: 1.2,
            speaker: None,
            confidence: Some(0.9),
        });
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(value["kind"], "transcript");
        assert_eq!(value["text"], "hello");

        let status = Outgoing::status("orchestrator", ServiceState::Up, "pong_custom");
        let value: serde_json::Value = serde_json::from_str(&status.to_json()).unwrap();
        assert_eq!(value["kind"], "service_status");
        assert_eq!(value["status"], "up");
    }

    #[test]
    fn client_message_parses_audio_chunk() {
        let session_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"kind":"audio_chunk","session_id":"{session_id}","data_b64":"AAAA","sequence_id":7}}"#
        );
        match serde_json::from_str::<ClientMessage>(&raw).unwrap() {
            ClientMessage::AudioChunk {
                session_id: sid,
                data_b64,
                sequence_id,
                ..
            } => {
                assert_eq!(sid, session_id);
                assert_eq!(data_b64, "AAAA");
                assert_eq!(sequence_id, Some(7));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let raw = r#"{"kind":"telepathy","session_id":"00000000-0000-0000-0000-000000000000"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn edit_component_defaults_patch_type() {
        let raw = format!(
            r#"{{"kind":"edit_component","session_id":"{}","spec_id":"{}","code":"<div/>"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        match serde_json::from_str::<ClientMessage>(&raw).unwrap() {
            ClientMessage::EditComponent { patch_type, .. } => {
                assert_eq!(patch_type, PatchType::FullCode);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn stt_final_event_round_trips() {
        let event = SttEvent::Final(TranscriptSegment {
            msg_id: Uuid::new_v4(),
            utterance_id: Uuid::new_v4(),
            text: "done".into(),
            ts_start: 0.0,
            ts_end: 0.8,
            speaker: Some("session".into()),
            confidence: Some(0.77),
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["kind"], "final");
        let back: SttEvent = serde_json::from_value(value).unwrap();
        assert!(matches!(back, SttEvent::Final(_)));
    }
}
