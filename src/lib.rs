pub mod backend;
pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use backend::{AssistantConfigSource, BackendClient, CredentialSource, KnowledgeBackend, SdpRelay};
pub use config::{AssistantConfig, ClientConfig};
pub use crate::core::*;
pub use errors::{
    ConfigError, CredentialError, ProtocolError, SessionError, SessionResult, ToolError,
    TransportError,
};
