//! Request and response bodies exchanged with the backend.

use serde::{Deserialize, Serialize};

/// Body of a successful `POST /start-session`.
///
/// Fields are optional so a 2xx with missing values can be reported as malformed
/// instead of failing deserialization wholesale.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ephemeral_key: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// `{error, details}` body the backend returns with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl ErrorBody {
    /// Extract the error text from a failed response, falling back to the raw body.
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                error,
                details: Some(details),
            }) if !details.is_empty() => format!("{error}: {details}"),
            Ok(parsed) => parsed.error,
            Err(_) if body.trim().is_empty() => "empty response body".to_string(),
            Err(_) => body.trim().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SdpRequest<'a> {
    pub ephemeral_key: &'a str,
    pub offer_sdp: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdpResponse {
    #[serde(default)]
    pub answer_sdp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunksRequest<'a> {
    pub userquery: &'a str,
}
