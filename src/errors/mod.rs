//! Error taxonomy for the realtime session client.
//!
//! Each failure class maps to a different blast radius:
//!
//! | Error | Effect |
//! |---|---|
//! | [`CredentialError`] | startup-fatal, the session never starts |
//! | [`TransportError`] | session-fatal, the session is torn down (no retry) |
//! | [`ProtocolError`] | non-fatal, logged, the session continues |
//! | [`ToolError`] | non-fatal, the tool yields a fallback result |
//! | [`ConfigError`] | startup-fatal, local config or `/config` document |
//!
//! [`SessionError`] wraps the fatal classes for the session controller.

use thiserror::Error;

/// Failures while obtaining the ephemeral transport credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The request never produced a response
    #[error("Credential request failed: {0}")]
    Network(String),

    /// The backend answered with a non-success status
    #[error("Credential request rejected ({status}): {message}")]
    Status { status: u16, message: String },

    /// The backend answered 2xx but the body is unusable
    #[error("Malformed credential response: {0}")]
    MalformedBody(String),

    /// The credential outlived its validity window before use
    #[error("Ephemeral credential expired before the transport was negotiated")]
    Expired,
}

/// Failures while negotiating or running the media transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No audio source could be obtained under any constraint profile
    #[error("No audio source available: {0}")]
    AudioUnavailable(String),

    /// The SDP relay rejected the offer or could not be reached
    #[error("Session description exchange failed (status {}): {message}", display_status(.status))]
    Relay {
        status: Option<u16>,
        message: String,
    },

    /// The remote description could not be applied
    #[error("Invalid remote description: {0}")]
    InvalidAnswer(String),

    /// Error raised by the WebRTC stack
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// The message channel is no longer usable
    #[error("Message channel closed")]
    ChannelClosed,

    /// Operation requires a state the transport is not in
    #[error("Invalid transport state: {0}")]
    InvalidState(String),
}

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "n/a".to_string(), |s| s.to_string())
}

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError::WebRtc(e.to_string())
    }
}

/// Non-fatal failures of the event protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound message is not a JSON object with a string `type`
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// An outbound event was attempted before the channel opened or after it closed
    #[error("Message channel is not open (state: {0})")]
    ChannelNotOpen(String),

    /// An outbound event could not be constructed
    #[error("Invalid outbound event: {0}")]
    InvalidEvent(String),

    /// Serialization of an outbound event failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Sending a constructed event failed
    #[error("Failed to send event: {0}")]
    Send(String),

    /// The remote side reported an `error` event
    #[error("Remote error: {message} (payload: {raw})")]
    Remote { message: String, raw: String },

    /// The remote side failed to transcribe user audio
    #[error("Input transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Non-fatal failures of a tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool backend answered with a non-success status
    #[error("Tool backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The tool backend could not be reached
    #[error("Tool backend request failed: {0}")]
    Network(String),

    /// The assistant supplied arguments the tool cannot use
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures while loading local configuration or the assistant configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load assistant configuration: {0}")]
    Fetch(String),

    #[error("Malformed assistant configuration: {0}")]
    MalformedDocument(String),
}

/// Fatal errors surfaced by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A client instance owns at most one live session
    #[error("A session is already active for this client")]
    AlreadyActive,
}

pub type CredentialResult<T> = Result<T, CredentialError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type ToolResult<T> = Result<T, ToolError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type SessionResult<T> = Result<T, SessionError>;
