use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};
use url::Url;

use super::messages::{ChunksRequest, ErrorBody, SdpRequest, SdpResponse, StartSessionResponse};
use super::{AssistantConfigSource, CredentialSource, KnowledgeBackend, SdpRelay};
use crate::config::{AssistantConfig, ClientConfig};
use crate::core::credential::{Credential, SessionGrant};
use crate::errors::{
    ConfigError, ConfigResult, CredentialError, CredentialResult, ToolError, ToolResult,
    TransportError, TransportResult,
};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("realtime-voice-client/", env!("CARGO_PKG_VERSION"));

/// HTTP client for every backend endpoint.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http_client: Client,
    start_session_url: Url,
    sdp_url: Url,
    chunks_url: Url,
    config_url: Url,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> ConfigResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "backend_url".to_string(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            http_client,
            start_session_url: config.endpoint("start-session")?,
            sdp_url: config.endpoint("webrtc-sdp")?,
            chunks_url: config.endpoint("chunks")?,
            config_url: config.endpoint("config")?,
        })
    }
}

/// Read status and body text together; the body is needed on both paths.
async fn read_response(response: reqwest::Response) -> Result<(StatusCode, String), reqwest::Error> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

#[async_trait]
impl CredentialSource for BackendClient {
    async fn start_session(&self) -> CredentialResult<SessionGrant> {
        let response = self
            .http_client
            .post(self.start_session_url.clone())
            .send()
            .await
            .map_err(|e| CredentialError::Network(format!("Request failed: {e}")))?;

        let (status, body) = read_response(response)
            .await
            .map_err(|e| CredentialError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = ErrorBody::message_from(&body);
            error!(status = status.as_u16(), "Session start rejected: {}", message);
            return Err(CredentialError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: StartSessionResponse = serde_json::from_str(&body)
            .map_err(|e| CredentialError::MalformedBody(e.to_string()))?;

        let session_id = parsed
            .session_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CredentialError::MalformedBody("missing session_id".to_string()))?;
        let secret = parsed
            .ephemeral_key
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CredentialError::MalformedBody("missing ephemeral_key".to_string()))?;

        let mut credential = Credential::new(secret);
        if let Some(expires_at) = parsed.expires_at {
            credential = credential.with_expiry_unix(expires_at);
        }

        Ok(SessionGrant {
            session_id,
            credential,
        })
    }
}

#[async_trait]
impl SdpRelay for BackendClient {
    async fn exchange_sdp(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> TransportResult<String> {
        debug!(
            credential = %credential.masked(),
            offer_len = offer_sdp.len(),
            "Sending local session description to relay"
        );

        let response = self
            .http_client
            .post(self.sdp_url.clone())
            .json(&SdpRequest {
                ephemeral_key: credential.expose_secret(),
                offer_sdp,
            })
            .send()
            .await
            .map_err(|e| TransportError::Relay {
                status: None,
                message: format!("Request failed: {e}"),
            })?;

        let (status, body) = read_response(response)
            .await
            .map_err(|e| TransportError::Relay {
                status: None,
                message: format!("Failed to read response: {e}"),
            })?;

        if !status.is_success() {
            return Err(TransportError::Relay {
                status: Some(status.as_u16()),
                message: ErrorBody::message_from(&body),
            });
        }

        let parsed: SdpResponse = serde_json::from_str(&body).map_err(|e| {
            TransportError::InvalidAnswer(format!("Unparsable relay response: {e}"))
        })?;

        parsed
            .answer_sdp
            .filter(|sdp| !sdp.trim().is_empty())
            .ok_or_else(|| TransportError::InvalidAnswer("missing answer_sdp".to_string()))
    }
}

#[async_trait]
impl KnowledgeBackend for BackendClient {
    async fn lookup_chunks(&self, query: &str) -> ToolResult<String> {
        let response = self
            .http_client
            .post(self.chunks_url.clone())
            .json(&ChunksRequest { userquery: query })
            .send()
            .await
            .map_err(|e| ToolError::Network(format!("Request failed: {e}")))?;

        let (status, body) = read_response(response)
            .await
            .map_err(|e| ToolError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Chunks backend error: {}", body);
            return Err(ToolError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl AssistantConfigSource for BackendClient {
    async fn fetch_config(&self) -> ConfigResult<AssistantConfig> {
        let response = self
            .http_client
            .get(self.config_url.clone())
            .send()
            .await
            .map_err(|e| ConfigError::Fetch(format!("Request failed: {e}")))?;

        let (status, body) = read_response(response)
            .await
            .map_err(|e| ConfigError::Fetch(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ConfigError::Fetch(format!(
                "status {}: {}",
                status.as_u16(),
                ErrorBody::message_from(&body)
            )));
        }

        AssistantConfig::from_json(&body)
    }
}
