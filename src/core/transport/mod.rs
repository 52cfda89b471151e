//! Media transport and the auxiliary message channel.
//!
//! A [`Transport`] turns a [`Credential`] into a live link: an audio send track, an
//! ordered and reliable message channel, and a stream of [`ChannelEvent`]s produced by
//! the channel's callbacks. Callbacks never touch session state; they only enqueue
//! events and cancel the link's `closed` token.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod audio;
pub mod codec;
mod peer;

pub use audio::{
    AudioCapture, AudioConstraints, AudioDevice, AudioSink, NullSink, SilenceDevice,
    WavFileDevice, WavRecorderSink,
};
pub use codec::{CodecCapability, CodecSelection, select_codec};
pub use peer::{WebRtcNegotiator, WebRtcOptions};

use crate::core::credential::Credential;
use crate::errors::TransportResult;

/// Lifecycle of a transport. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Uninitialized,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Uninitialized => write!(f, "uninitialized"),
            TransportState::Negotiating => write!(f, "negotiating"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

impl TransportState {
    /// Whether moving to `next` respects the forward-only ordering.
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        matches!(
            (self, next),
            (Uninitialized, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Closed)
                | (Connected, Closed)
                | (Uninitialized, Closed)
        )
    }
}

/// What the message channel reports, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed,
}

/// Outbound half of the message channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_text(&self, text: String) -> TransportResult<()>;

    fn label(&self) -> &str;
}

/// Result of a successful negotiation.
pub struct TransportLink {
    pub channel: Arc<dyn MessageChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Cancelled as soon as the channel or the peer connection closes
    pub closed: CancellationToken,
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("channel", &self.channel.label())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn state(&self) -> TransportState;

    /// Negotiate the transport. The credential is consumed.
    async fn establish(&self, credential: Credential) -> TransportResult<TransportLink>;

    /// Release the channel, the peer connection and the audio capture.
    ///
    /// Idempotent; capture is released before this returns.
    async fn teardown(&self) -> TransportResult<()>;
}
