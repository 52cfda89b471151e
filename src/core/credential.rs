//! Ephemeral transport credential and the exchange that produces it.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::backend::CredentialSource;
use crate::errors::{CredentialError, CredentialResult};

/// Short-lived secret authorizing one transport negotiation.
///
/// Not `Clone`: the credential is moved into the negotiator and dropped (and wiped)
/// once the session description exchange is done. `Debug` only shows the masked form.
pub struct Credential {
    secret: Zeroizing<String>,
    expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            expires_at: None,
        }
    }

    /// Attach an expiry reported as seconds since the Unix epoch.
    pub fn with_expiry_unix(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(UNIX_EPOCH + Duration::from_secs(expires_at));
        self
    }

    pub fn with_expiry(mut self, expires_at: SystemTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw secret. Only the SDP relay request should read this.
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }

    /// `***` followed by the last four characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 4 {
            return "***".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{tail}")
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| SystemTime::now() >= deadline)
    }

    /// Refuse a credential whose validity window already passed.
    pub fn ensure_valid(&self) -> CredentialResult<()> {
        if self.is_expired() {
            return Err(CredentialError::Expired);
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &self.masked())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a successful credential exchange.
#[derive(Debug)]
pub struct SessionGrant {
    pub session_id: String,
    pub credential: Credential,
}

/// Obtain a credential and session id from the backend.
///
/// Called once per session. On failure nothing is retained.
pub async fn acquire_credential(source: &dyn CredentialSource) -> CredentialResult<SessionGrant> {
    debug!("Requesting ephemeral credential");
    let grant = source.start_session().await?;
    info!(
        session_id = %grant.session_id,
        credential = %grant.credential.masked(),
        "Ephemeral credential received"
    );
    Ok(grant)
}
