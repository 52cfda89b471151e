//! Realtime event protocol message types.
//!
//! Every message on the data channel is one JSON object with a `type` discriminant.
//!
//! Client events (sent by the session):
//! - session.update - Configure instructions, voice, tools and turn detection
//! - conversation.item.create - Submit a function call result or a user text message
//! - response.create - Ask the assistant to produce a response
//!
//! Server events (interpreted by the engine):
//! - session.created - Session is ready for configuration
//! - conversation.item.input_audio_transcription.completed - User speech transcribed
//! - conversation.item.input_audio_transcription.failed - User speech could not be transcribed
//! - response.done - Response finished, may carry a transcript or a function call
//! - error - Error reported by the service
//!
//! Anything else decodes to [`ServerEvent::Unrecognized`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AssistantConfig, ToolDeclaration, TurnDetectionConfig};
use crate::core::tools::FunctionInvocation;
use crate::errors::{ProtocolError, ProtocolResult};

// =============================================================================
// Session Configuration
// =============================================================================

/// `session` payload of `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetectionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl From<&AssistantConfig> for SessionConfig {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            modalities: (!config.modalities.is_empty()).then(|| config.modalities.clone()),
            instructions: non_empty(&config.instructions),
            voice: non_empty(&config.voice),
            input_audio_transcription: non_empty(&config.transcription_model)
                .map(|model| InputAudioTranscription { model }),
            turn_detection: Some(config.turn_detection.clone()),
            tools: (!config.tools.is_empty()).then(|| config.tools.clone()),
            tool_choice: non_empty(&config.tool_choice),
            temperature: Some(config.temperature),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Item payload of `conversation.item.create`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// Result of a function call issued by the assistant
    FunctionCallOutput { call_id: String, output: String },
    /// Message typed by the user
    Message {
        role: String,
        content: Vec<InputContent>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
}

/// Optional `response` payload of `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    pub fn session_update(config: &AssistantConfig) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionConfig::from(config),
        }
    }

    /// Plain continuation request.
    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// Scripted response, used for the greeting.
    pub fn response_with_instructions(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                instructions: Some(instructions.into()),
            }),
        }
    }

    /// `conversation.item.create` carrying a function call result.
    pub fn function_call_output(
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let call_id = call_id.into();
        if call_id.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent(
                "function_call_output requires a call_id".to_string(),
            ));
        }
        Ok(ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id,
                output: output.into(),
            },
        })
    }

    /// `conversation.item.create` carrying a user text message.
    pub fn user_text(text: impl Into<String>) -> ProtocolResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent(
                "user message must not be empty".to_string(),
            ));
        }
        Ok(ClientEvent::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "user".to_string(),
                content: vec![InputContent::InputText { text }],
            },
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }

    /// Serialize to the single-line JSON sent on the channel.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events the engine reacts to. Payload fields are optional; absence is normal.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: Option<ApiError>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ApiError>,
    },

    /// Any type outside the vocabulary above
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    pub fn describe(&self) -> String {
        match (&self.message, &self.code) {
            (Some(message), Some(code)) => format!("{message} ({code})"),
            (Some(message), None) => message.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => self
                .error_type
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl ResponseInfo {
    /// Only the first output item is interpreted.
    pub fn first_output(&self) -> Option<&OutputItem> {
        self.output.first()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl OutputItem {
    /// Transcript of the first content part, or its text for text-only responses.
    pub fn transcript(&self) -> Option<&str> {
        let part = self.content.first()?;
        part.transcript
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| part.text.as_deref().filter(|t| !t.is_empty()))
    }

    /// The function call this item describes, if it is one with a call id.
    pub fn function_call(&self) -> Option<FunctionInvocation> {
        if self.item_type.as_deref() != Some("function_call") {
            return None;
        }
        let call_id = self.call_id.as_deref().filter(|id| !id.is_empty())?;
        Some(FunctionInvocation {
            call_id: call_id.to_string(),
            name: self.name.clone().unwrap_or_default(),
            arguments: self.arguments.clone().unwrap_or_else(|| "{}".to_string()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// A decoded inbound message together with its wire type.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_type: String,
    pub event: ServerEvent,
}

/// Decode one channel message.
///
/// Text that is not a JSON object with a string `type`, or a known type whose body
/// has the wrong shape, is a [`ProtocolError::MalformedEvent`]. Unknown types decode
/// to [`ServerEvent::Unrecognized`].
pub fn decode_server_event(text: &str) -> ProtocolResult<InboundEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::MalformedEvent(format!("invalid JSON: {e}")))?;

    let event_type = value
        .as_object()
        .ok_or_else(|| ProtocolError::MalformedEvent("not a JSON object".to_string()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedEvent("missing string `type`".to_string()))?
        .to_string();

    let event = serde_json::from_value::<ServerEvent>(value)
        .map_err(|e| ProtocolError::MalformedEvent(format!("{event_type}: {e}")))?;

    Ok(InboundEvent { event_type, event })
}

// =============================================================================
// Tests
// =============================================================================
