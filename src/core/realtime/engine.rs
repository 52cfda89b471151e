//! Sequential event loop for one session.
//!
//! Channel callbacks feed [`ChannelEvent`]s into an unbounded queue; the engine takes
//! them one at a time and finishes each, including any tool round-trip, before the
//! next. Application requests (`send_text`) go through the same loop so they never
//! interleave with a result/continuation pair.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::channel::{ChannelState, EventSender};
use super::messages::{ClientEvent, InboundEvent, ResponseInfo, ServerEvent, decode_server_event};
use crate::config::AssistantConfig;
use crate::core::tools::{FunctionInvocation, ToolDispatcher};
use crate::core::transcript::{Speaker, TranscriptAccumulator};
use crate::core::transport::ChannelEvent;
use crate::errors::{ProtocolError, ProtocolResult};

/// Callback for non-fatal protocol problems, for the presentation layer.
pub type NoticeCallback =
    Arc<dyn Fn(ProtocolError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Requests from the application to the running engine.
#[derive(Debug)]
pub enum EngineCommand {
    SendText {
        text: String,
        reply: oneshot::Sender<ProtocolResult<()>>,
    },
}

/// Application-side handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    sender: EventSender,
}

impl EngineHandle {
    pub fn channel_state(&self) -> ChannelState {
        self.sender.state()
    }

    /// Send a user text turn followed by a continuation request.
    pub async fn send_text(&self, text: impl Into<String>) -> ProtocolResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::SendText {
                text: text.into(),
                reply,
            })
            .map_err(|_| ProtocolError::ChannelNotOpen(ChannelState::Closed.to_string()))?;
        response
            .await
            .map_err(|_| ProtocolError::ChannelNotOpen(ChannelState::Closed.to_string()))?
    }
}

pub struct EventEngine {
    session_id: String,
    sender: EventSender,
    tools: ToolDispatcher,
    transcript: TranscriptAccumulator,
    assistant: Arc<AssistantConfig>,
    session_configured: bool,
    notice: Option<NoticeCallback>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
}

impl EventEngine {
    pub fn new(
        session_id: impl Into<String>,
        sender: EventSender,
        tools: ToolDispatcher,
        transcript: TranscriptAccumulator,
        assistant: Arc<AssistantConfig>,
    ) -> (Self, EngineHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = EngineHandle {
            commands: commands_tx,
            sender: sender.clone(),
        };
        let engine = Self {
            session_id: session_id.into(),
            sender,
            tools,
            transcript,
            assistant,
            session_configured: false,
            notice: None,
            commands: commands_rx,
        };
        (engine, handle)
    }

    pub fn with_notice_callback(mut self, callback: NoticeCallback) -> Self {
        self.notice = Some(callback);
        self
    }

    /// Process channel events until the channel closes or the queue is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let closed = self.sender.closed_token().clone();
        info!(session_id = %self.session_id, "Event engine started");

        loop {
            tokio::select! {
                biased;

                // Events still queued behind a close are dropped
                _ = closed.cancelled() => {
                    info!(session_id = %self.session_id, "Session closed, stopping event engine");
                    break;
                }

                event = events.recv() => match event {
                    Some(ChannelEvent::Closed) | None => {
                        info!(session_id = %self.session_id, "Message channel closed");
                        break;
                    }
                    Some(event) => self.handle_channel_event(event).await,
                },

                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }

        self.sender.mark_closed();
        info!(session_id = %self.session_id, "Event engine stopped");
    }

    /// Handle a single channel event.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                info!(session_id = %self.session_id, "Message channel open");
                self.sender.mark_open();
            }
            ChannelEvent::Message(text) => self.handle_message(&text).await,
            ChannelEvent::Closed => self.sender.mark_closed(),
        }
    }

    async fn handle_message(&mut self, text: &str) {
        match decode_server_event(text) {
            Ok(inbound) => self.handle_server_event(inbound, text).await,
            Err(e) => self.report(e).await,
        }
    }

    async fn handle_server_event(&mut self, inbound: InboundEvent, raw: &str) {
        debug!(
            session_id = %self.session_id,
            event_type = %inbound.event_type,
            "Received server event"
        );

        match inbound.event {
            ServerEvent::SessionCreated { session } => {
                if let Some(id) = session.and_then(|s| s.id) {
                    info!(session_id = %self.session_id, remote_session = %id, "Realtime session created");
                }
                self.configure_session().await;
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                if let Some(text) = transcript.filter(|t| !t.trim().is_empty()) {
                    self.transcript.append(Speaker::User, text.trim());
                }
            }

            ServerEvent::TranscriptionFailed { error, item_id } => {
                let reason = error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "no details".to_string());
                let message = match item_id {
                    Some(id) => format!("item {id}: {reason}"),
                    None => reason,
                };
                self.report(ProtocolError::TranscriptionFailed(message)).await;
            }

            ServerEvent::ResponseDone { response } => {
                self.handle_response_done(response).await;
            }

            ServerEvent::Error { error } => {
                let message = error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.report(ProtocolError::Remote {
                    message,
                    raw: raw.to_string(),
                })
                .await;
            }

            ServerEvent::Unrecognized => {
                debug!(event_type = %inbound.event_type, "Ignoring unrecognized event");
            }
        }
    }

    /// Send the session configuration once, then the optional greeting.
    ///
    /// Only a delivered `session.update` counts; a rejected send is retried on the
    /// next `session.created`.
    async fn configure_session(&mut self) {
        if self.session_configured {
            debug!(session_id = %self.session_id, "Session already configured");
            return;
        }

        if let Err(e) = self
            .sender
            .send(&ClientEvent::session_update(&self.assistant))
            .await
        {
            self.report(e).await;
            return;
        }
        self.session_configured = true;

        let greeting = self
            .assistant
            .greeting
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty());
        if let Some(greeting) = greeting {
            let event = ClientEvent::response_with_instructions(greeting);
            if let Err(e) = self.sender.send(&event).await {
                self.report(e).await;
            }
        }
    }

    async fn handle_response_done(&mut self, response: Option<ResponseInfo>) {
        let Some(item) = response.as_ref().and_then(ResponseInfo::first_output) else {
            return;
        };

        if let Some(text) = item.transcript() {
            self.transcript.append(Speaker::Assistant, text);
        }

        if let Some(invocation) = item.function_call() {
            self.run_tool_call(invocation).await;
        }
    }

    async fn run_tool_call(&self, invocation: FunctionInvocation) {
        if !self.tools.is_registered(&invocation.name) {
            debug!(
                call_id = %invocation.call_id,
                tool = %invocation.name,
                "No handler registered for tool, ignoring call"
            );
            return;
        }

        info!(
            session_id = %self.session_id,
            call_id = %invocation.call_id,
            tool = %invocation.name,
            "Dispatching tool call"
        );

        let closed = self.sender.closed_token().clone();
        let result = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            result = self.tools.dispatch(&invocation) => result,
        };

        if closed.is_cancelled() {
            info!(
                call_id = %invocation.call_id,
                "Channel closed during tool call, discarding result"
            );
            return;
        }
        let Some(result) = result else {
            return;
        };

        let output = self.assistant.tool_output(&result);
        let event = match ClientEvent::function_call_output(invocation.call_id.as_str(), output) {
            Ok(event) => event,
            Err(e) => {
                self.report(e).await;
                return;
            }
        };

        // The continuation is only requested once the result went out
        if let Err(e) = self.sender.send(&event).await {
            self.report(e).await;
            return;
        }
        if let Err(e) = self.sender.send(&ClientEvent::response_create()).await {
            self.report(e).await;
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SendText { text, reply } => {
                let result = self.send_user_text(text).await;
                if let Err(e) = &result {
                    warn!(session_id = %self.session_id, "Failed to send text turn: {}", e);
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn send_user_text(&self, text: String) -> ProtocolResult<()> {
        let message = ClientEvent::user_text(text)?;
        self.sender.send(&message).await?;
        self.sender.send(&ClientEvent::response_create()).await
    }

    async fn report(&self, error: ProtocolError) {
        warn!(session_id = %self.session_id, "{}", error);
        if let Some(callback) = &self.notice {
            callback(error).await;
        }
    }
}
