//! Wire event types for the realtime data channel.
//!
//! Messages are UTF-8 JSON objects discriminated by a `type` field. The
//! enums here are internally tagged so the wire strings live next to the
//! variants; unrecognized server event types decode to
//! [`ServerEvent::Unknown`] for forward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

// ── Client Events ───────────────────────────────────────────────────────

/// Events sent from the client to the realtime server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Create a conversation item (used for function-call outputs).
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The conversation item payload.
        item: Value,
    },

    /// Trigger response generation.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Build the function-call output event for a result mapping.
    ///
    /// The result is JSON-encoded into the item's `output` field, matching
    /// the wire format the server expects.
    pub fn function_output(call_id: &str, result: &Value) -> Result<Self> {
        let output = serde_json::to_string(result)?;
        Ok(Self::ConversationItemCreate {
            item: serde_json::json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
        })
    }
}

// ── Server Events ───────────────────────────────────────────────────────

/// Events received from the realtime server on the data channel.
///
/// Fields the router does not strictly need are lenient (`#[serde(default)]`)
/// so a missing attribute never drops an otherwise well-formed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established on the server side.
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session details.
        #[serde(default)]
        session: Value,
    },

    /// Error reported by the server.
    #[serde(rename = "error")]
    Error {
        /// Error details.
        #[serde(default)]
        error: ErrorInfo,
    },

    /// User speech started (server VAD).
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// User speech stopped (server VAD).
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Final transcript of the user's speech.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        /// The completed user transcript.
        #[serde(default)]
        transcript: String,
    },

    /// Streaming chunk of the assistant's audio transcript.
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta {
        /// Incremental transcript text.
        #[serde(default)]
        delta: String,
    },

    /// Final assistant audio transcript.
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        /// The complete transcript.
        #[serde(default)]
        transcript: String,
    },

    /// A response output item completed (may carry a function call).
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// The completed item.
        #[serde(default)]
        item: Value,
    },

    /// Response generation completed.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Unknown event type (forward compatibility).
    #[serde(other)]
    Unknown,
}

/// Error information from the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type/code.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

// ── Function calls ──────────────────────────────────────────────────────

/// A function call extracted from a completed output item.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    /// Identifier used to correlate the result.
    pub call_id: String,
    /// Function name.
    pub name: String,
    /// Parsed argument mapping. An unparseable argument string yields an
    /// empty mapping, never an error.
    pub arguments: Map<String, Value>,
}

impl FunctionCallRequest {
    /// Extract a function call from a `response.output_item.done` item.
    ///
    /// Returns `None` when the item is not function-call shaped.
    pub fn from_item(item: &Value) -> Option<Self> {
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            return None;
        }
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let args_str = item.get("arguments").and_then(Value::as_str).unwrap_or("{}");
        let arguments = serde_json::from_str::<Map<String, Value>>(args_str).unwrap_or_default();
        Some(Self { call_id, name, arguments })
    }
}
