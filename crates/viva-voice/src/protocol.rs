//! Wire codec for the realtime data channel.
//!
//! Every message is a JSON object with a `type` discriminator. Only a handful of
//! inbound types drive turn state; the rest are informational. Anything that is not
//! a JSON object with a string `type` is a decode error, which callers log and skip.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};

pub const TRANSCRIPT_PARTIAL: &str = "transcript.partial";
pub const RESPONSE_START: &str = "response.start";
pub const RESPONSE_DONE: &str = "response.done";
pub const RESPONSE_TRANSCRIPT_DONE: &str = "response.audio_transcript.done";
pub const SESSION_CREATED: &str = "session.created";
pub const ERROR: &str = "error";

/// Types acknowledged without any state effect.
pub const INFORMATIONAL_TYPES: &[&str] = &[
    "session.updated",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.committed",
    "conversation.item.created",
    "rate_limits.updated",
];

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Cumulative speech-to-text hypothesis for the candidate.
    TranscriptPartial { text: String },
    /// The model started speaking.
    ResponseStart,
    /// The model finished speaking.
    ResponseDone,
    /// Full text of what the model just said.
    ResponseTranscriptDone { transcript: String },
    SessionCreated {
        model: Option<String>,
        voice: Option<String>,
    },
    /// Server-reported error; logged only.
    Error { message: String },
    /// Recognised type with no state effect.
    Informational { kind: String },
    /// Unrecognised type.
    Other { kind: String },
}

#[derive(Deserialize)]
struct TranscriptPayload {
    text: String,
}

#[derive(Deserialize)]
struct ResponseTranscriptPayload {
    #[serde(default)]
    transcript: String,
}

#[derive(Deserialize, Default)]
struct SessionInfo {
    model: Option<String>,
    voice: Option<String>,
}

#[derive(Deserialize)]
struct SessionPayload {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    session: Option<SessionInfo>,
}

#[derive(Deserialize, Default)]
struct ErrorInfo {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<ErrorInfo>,
    #[serde(default)]
    message: Option<String>,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: serde_json::Value) -> VoiceResult<T> {
    serde_json::from_value(value)
        .map_err(|e| VoiceError::Protocol(format!("malformed {} payload: {}", kind, e)))
}

impl InboundEvent {
    /// Decode one raw channel message.
    pub fn parse(raw: &str) -> VoiceResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| VoiceError::Protocol(format!("not JSON: {}", e)))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| VoiceError::Protocol("envelope has no string `type`".to_string()))?
            .to_string();

        let event = match kind.as_str() {
            TRANSCRIPT_PARTIAL => {
                let p: TranscriptPayload = payload(&kind, value)?;
                InboundEvent::TranscriptPartial { text: p.text }
            }
            RESPONSE_START => InboundEvent::ResponseStart,
            RESPONSE_DONE => InboundEvent::ResponseDone,
            RESPONSE_TRANSCRIPT_DONE => {
                let p: ResponseTranscriptPayload = payload(&kind, value)?;
                InboundEvent::ResponseTranscriptDone { transcript: p.transcript }
            }
            SESSION_CREATED => {
                let p: SessionPayload = payload(&kind, value)?;
                let nested = p.session.unwrap_or_default();
                InboundEvent::SessionCreated {
                    model: p.model.or(nested.model),
                    voice: p.voice.or(nested.voice),
                }
            }
            ERROR => {
                let p: ErrorPayload = payload(&kind, value)?;
                let message = p
                    .error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .or(p.message)
                    .unwrap_or_default();
                InboundEvent::Error { message }
            }
            other if INFORMATIONAL_TYPES.contains(&other) => InboundEvent::Informational {
                kind: other.to_string(),
            },
            other => InboundEvent::Other {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }

    /// Wire `type` of this event.
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::TranscriptPartial { .. } => TRANSCRIPT_PARTIAL,
            InboundEvent::ResponseStart => RESPONSE_START,
            InboundEvent::ResponseDone => RESPONSE_DONE,
            InboundEvent::ResponseTranscriptDone { .. } => RESPONSE_TRANSCRIPT_DONE,
            InboundEvent::SessionCreated { .. } => SESSION_CREATED,
            InboundEvent::Error { .. } => ERROR,
            InboundEvent::Informational { kind } | InboundEvent::Other { kind } => kind.as_str(),
        }
    }
}

/// Body of `response.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub modalities: Vec<String>,
    pub instructions: String,
}

/// Commands sent back over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundCommand {
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseBody },
    #[serde(rename = "response.interrupt")]
    ResponseInterrupt,
}

impl OutboundCommand {
    pub fn create(modalities: Vec<String>, instructions: String) -> Self {
        OutboundCommand::ResponseCreate {
            response: ResponseBody {
                modalities,
                instructions,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::ResponseCreate { .. } => "response.create",
            OutboundCommand::ResponseInterrupt => "response.interrupt",
        }
    }

    /// Instructions carried by a `response.create`.
    pub fn instructions(&self) -> Option<&str> {
        match self {
            OutboundCommand::ResponseCreate { response } => Some(&response.instructions),
            OutboundCommand::ResponseInterrupt => None,
        }
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
