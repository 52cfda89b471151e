use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::messages::ClientEvent;
use crate::core::transport::MessageChannel;
use crate::errors::{ProtocolError, ProtocolResult};

/// State of the message channel as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Opening,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Opening => write!(f, "opening"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Sends client events, refusing whenever the channel is not open.
#[derive(Clone)]
pub struct EventSender {
    channel: Arc<dyn MessageChannel>,
    state: Arc<RwLock<ChannelState>>,
    closed: CancellationToken,
}

impl EventSender {
    pub fn new(channel: Arc<dyn MessageChannel>, closed: CancellationToken) -> Self {
        Self {
            channel,
            state: Arc::new(RwLock::new(ChannelState::Opening)),
            closed,
        }
    }

    /// Current state. A cancelled `closed` token always reads as `Closed`.
    pub fn state(&self) -> ChannelState {
        if self.closed.is_cancelled() {
            return ChannelState::Closed;
        }
        *self.state.read()
    }

    pub fn mark_open(&self) {
        let mut state = self.state.write();
        if *state == ChannelState::Opening {
            *state = ChannelState::Open;
        }
    }

    pub fn mark_closed(&self) {
        *self.state.write() = ChannelState::Closed;
        self.closed.cancel();
    }

    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub async fn send(&self, event: &ClientEvent) -> ProtocolResult<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(ProtocolError::ChannelNotOpen(state.to_string()));
        }

        let text = event.to_json()?;
        debug!(event_type = event.event_type(), "Sending client event");
        self.channel
            .send_text(text)
            .await
            .map_err(|e| ProtocolError::Send(e.to_string()))
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("channel", &self.channel.label())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageChannel for Recorder {
        async fn send_text(&self, text: String) -> TransportResult<()> {
            self.sent.lock().push(text);
            Ok(())
        }

        fn label(&self) -> &str {
            "test"
        }
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let sender = EventSender::new(recorder.clone(), CancellationToken::new());

        let result = sender.send(&ClientEvent::response_create()).await;
        match result {
            Err(ProtocolError::ChannelNotOpen(state)) => assert_eq!(state, "opening"),
            other => panic!("Expected ChannelNotOpen, got {other:?}"),
        }
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_when_open() {
        let recorder = Arc::new(Recorder::default());
        let sender = EventSender::new(recorder.clone(), CancellationToken::new());
        sender.mark_open();

        sender.send(&ClientEvent::response_create()).await.unwrap();
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_closes_channel() {
        let recorder = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let sender = EventSender::new(recorder.clone(), token.clone());
        sender.mark_open();

        token.cancel();
        assert_eq!(sender.state(), ChannelState::Closed);
        assert!(sender.send(&ClientEvent::response_create()).await.is_err());
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_closed_is_terminal() {
        let sender = EventSender::new(Arc::new(Recorder::default()), CancellationToken::new());
        sender.mark_closed();
        sender.mark_open();
        assert_eq!(sender.state(), ChannelState::Closed);
    }
}
