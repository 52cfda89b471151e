//! Backend collaborator contracts.
//!
//! The session never talks to the realtime service's control plane directly. A small
//! backend mints credentials, relays the session description exchange, serves the
//! knowledge lookup used by the `get_chunks` tool and hosts the assistant
//! configuration. Each concern is a narrow trait so tests can substitute any of them;
//! [`BackendClient`] implements all four over HTTP.

use async_trait::async_trait;

mod client;
mod messages;

pub use client::BackendClient;
pub use messages::{ChunksRequest, ErrorBody, SdpRequest, SdpResponse, StartSessionResponse};

use crate::config::AssistantConfig;
use crate::core::credential::{Credential, SessionGrant};
use crate::errors::{ConfigResult, CredentialResult, ToolResult, TransportResult};

/// `POST /start-session`
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn start_session(&self) -> CredentialResult<SessionGrant>;
}

/// `POST /webrtc-sdp`: trades a local offer for the remote answer.
#[async_trait]
pub trait SdpRelay: Send + Sync {
    async fn exchange_sdp(&self, credential: &Credential, offer_sdp: &str)
    -> TransportResult<String>;
}

/// `POST /chunks`: knowledge base lookup returning opaque text.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    async fn lookup_chunks(&self, query: &str) -> ToolResult<String>;
}

/// `GET /config`
#[async_trait]
pub trait AssistantConfigSource: Send + Sync {
    async fn fetch_config(&self) -> ConfigResult<AssistantConfig>;
}
