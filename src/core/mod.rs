pub mod credential;
pub mod realtime;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;

// Re-export commonly used types for convenience
pub use credential::{Credential, SessionGrant, acquire_credential};

pub use realtime::{ChannelState, ClientEvent, EngineHandle, EventEngine, ServerEvent};

pub use session::{Session, SessionOptions, VoiceClient};

pub use tools::{
    CHUNKS_FALLBACK, FunctionInvocation, GET_CHUNKS, KnowledgeLookupTool, ToolDispatcher,
    ToolHandler,
};

pub use transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};

pub use transport::{
    AudioDevice, AudioSink, ChannelEvent, MessageChannel, Transport, TransportLink,
    TransportState, WebRtcNegotiator,
};
