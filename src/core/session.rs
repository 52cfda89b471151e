//! Session controller.
//!
//! [`VoiceClient`] owns the "one live session per client" rule. A [`Session`] owns the
//! transport, the event engine task and the transcript, and tears them down on every
//! exit path: explicit [`Session::stop`], channel close followed by `stop`, or drop.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CredentialSource, SdpRelay};
use crate::config::{AssistantConfig, ClientConfig};
use crate::core::credential::{SessionGrant, acquire_credential};
use crate::core::realtime::{ChannelState, EngineHandle, EventEngine, EventSender, NoticeCallback};
use crate::core::tools::ToolDispatcher;
use crate::core::transcript::TranscriptAccumulator;
use crate::core::transport::{
    AudioDevice, AudioSink, NullSink, SilenceDevice, Transport, TransportState, WavFileDevice,
    WavRecorderSink, WebRtcNegotiator, WebRtcOptions,
};
use crate::errors::{ProtocolResult, SessionError, SessionResult};

/// Builds a fresh transport for each session. Transports are single-use.
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

/// Per-session inputs.
#[derive(Clone)]
pub struct SessionOptions {
    pub assistant: Arc<AssistantConfig>,
    pub tools: ToolDispatcher,
    pub notice: Option<NoticeCallback>,
    /// Where the session records its turns. Subscribe before `start` to see every entry.
    pub transcript: TranscriptAccumulator,
}

impl SessionOptions {
    pub fn new(assistant: AssistantConfig, tools: ToolDispatcher) -> Self {
        Self {
            assistant: Arc::new(assistant),
            tools,
            notice: None,
            transcript: TranscriptAccumulator::new(),
        }
    }

    pub fn with_notice_callback(mut self, callback: NoticeCallback) -> Self {
        self.notice = Some(callback);
        self
    }

    pub fn with_transcript(mut self, transcript: TranscriptAccumulator) -> Self {
        self.transcript = transcript;
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("voice", &self.assistant.voice)
            .field("tools", &self.tools)
            .field("notice", &self.notice.is_some())
            .field("transcript", &self.transcript)
            .finish()
    }
}

/// Clears the client's active flag when dropped.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct VoiceClient {
    credentials: Arc<dyn CredentialSource>,
    transports: TransportFactory,
    active: Arc<AtomicBool>,
}

impl VoiceClient {
    pub fn new(credentials: Arc<dyn CredentialSource>, transports: TransportFactory) -> Self {
        Self {
            credentials,
            transports,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Client backed by WebRTC, with audio devices chosen from `config`.
    ///
    /// Without an input WAV the session is listen-only; without a record path remote
    /// audio is discarded.
    pub fn webrtc<B>(config: &ClientConfig, backend: Arc<B>) -> SessionResult<Self>
    where
        B: CredentialSource + SdpRelay + 'static,
    {
        let device: Arc<dyn AudioDevice> = match &config.input_wav {
            Some(path) => Arc::new(WavFileDevice::new(path)),
            None => Arc::new(SilenceDevice),
        };
        let sink: Arc<dyn AudioSink> = match &config.record_wav {
            Some(path) => Arc::new(WavRecorderSink::create(path)?),
            None => Arc::new(NullSink),
        };
        info!(device = %device.name(), recording = config.record_wav.is_some(), "Audio configured");

        let options = WebRtcOptions::from(config);
        let relay: Arc<dyn SdpRelay> = backend.clone();
        let transports: TransportFactory = Arc::new(move || {
            Arc::new(WebRtcNegotiator::new(
                options.clone(),
                Arc::clone(&relay),
                Arc::clone(&device),
                Arc::clone(&sink),
            )) as Arc<dyn Transport>
        });

        Ok(Self::new(backend, transports))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Credential exchange, transport negotiation, then the event engine.
    ///
    /// Fails with [`SessionError::AlreadyActive`] while another session from this
    /// client is live. A failed start leaves nothing behind.
    pub async fn start(&self, options: SessionOptions) -> SessionResult<Session> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyActive);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let SessionGrant {
            session_id,
            credential,
        } = acquire_credential(self.credentials.as_ref()).await?;
        credential.ensure_valid()?;

        let transport = (self.transports)();
        let link = match transport.establish(credential).await {
            Ok(link) => link,
            Err(e) => {
                if let Err(teardown_err) = transport.teardown().await {
                    debug!("Teardown after failed negotiation: {}", teardown_err);
                }
                return Err(e.into());
            }
        };

        let transcript = options.transcript;
        let sender = EventSender::new(Arc::clone(&link.channel), link.closed.clone());
        let (engine, handle) = EventEngine::new(
            session_id.clone(),
            sender,
            options.tools,
            transcript.clone(),
            options.assistant,
        );
        let engine = match options.notice {
            Some(callback) => engine.with_notice_callback(callback),
            None => engine,
        };
        let task = tokio::spawn(engine.run(link.events));

        info!(session_id = %session_id, "Session started");
        Ok(Session {
            session_id,
            transport,
            handle,
            transcript,
            closed: link.closed,
            engine: Mutex::new(Some(task)),
            stopped: AtomicBool::new(false),
            active: Mutex::new(Some(guard)),
        })
    }
}

impl fmt::Debug for VoiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceClient")
            .field("active", &self.is_active())
            .finish()
    }
}

/// One live voice session.
pub struct Session {
    session_id: String,
    transport: Arc<dyn Transport>,
    handle: EngineHandle,
    transcript: TranscriptAccumulator,
    closed: CancellationToken,
    engine: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    active: Mutex<Option<ActiveGuard>>,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &TranscriptAccumulator {
        &self.transcript
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.handle.channel_state()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// Send a user text turn. Rejected unless the channel is open.
    pub async fn send_text(&self, text: impl Into<String>) -> ProtocolResult<()> {
        self.handle.send_text(text).await
    }

    /// Resolves once the channel or the peer connection has closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop the engine and release the transport and audio capture. Idempotent.
    pub async fn stop(&self) -> SessionResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(session_id = %self.session_id, "Stopping session");

        self.closed.cancel();
        let task = self.engine.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(session_id = %self.session_id, "Event engine task failed: {}", e);
        }

        let result = self.transport.teardown().await;
        self.active.lock().take();
        info!(session_id = %self.session_id, "Session stopped");
        result.map_err(SessionError::from)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();

        let transport = Arc::clone(&self.transport);
        let guard = self.active.lock().take();
        let session_id = self.session_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transport.teardown().await {
                        warn!(session_id = %session_id, "Teardown on drop failed: {}", e);
                    }
                    drop(guard);
                });
            }
            Err(_) => {
                warn!(session_id = %session_id, "Session dropped outside a runtime, transport not torn down");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("transport_state", &self.transport.state())
            .field("channel_state", &self.handle.channel_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credential::Credential;
    use crate::core::transport::{ChannelEvent, MessageChannel, TransportLink};
    use crate::errors::{CredentialError, CredentialResult, TransportError, TransportResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct FixedCredentials {
        expires_at: Option<u64>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialSource for FixedCredentials {
        async fn start_session(&self) -> CredentialResult<SessionGrant> {
            if self.fail {
                return Err(CredentialError::Network("connection refused".to_string()));
            }
            let mut credential = Credential::new("ek_test_secret_1234");
            if let Some(at) = self.expires_at {
                credential = credential.with_expiry_unix(at);
            }
            Ok(SessionGrant {
                session_id: "sess_abc".to_string(),
                credential,
            })
        }
    }

    struct NoopChannel;

    #[async_trait]
    impl MessageChannel for NoopChannel {
        async fn send_text(&self, _text: String) -> TransportResult<()> {
            Ok(())
        }

        fn label(&self) -> &str {
            "noop"
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        state: Mutex<TransportState>,
        fail: bool,
        teardowns: AtomicUsize,
        events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn state(&self) -> TransportState {
            *self.state.lock()
        }

        async fn establish(&self, _credential: Credential) -> TransportResult<TransportLink> {
            if self.fail {
                *self.state.lock() = TransportState::Closed;
                return Err(TransportError::Relay {
                    status: Some(502),
                    message: "relay down".to_string(),
                });
            }
            *self.state.lock() = TransportState::Connected;
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events.lock() = Some(tx);
            Ok(TransportLink {
                channel: Arc::new(NoopChannel),
                events: rx,
                closed: CancellationToken::new(),
            })
        }

        async fn teardown(&self) -> TransportResult<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = TransportState::Closed;
            Ok(())
        }
    }

    fn client_with(
        credentials: FixedCredentials,
        transport: Arc<FakeTransport>,
    ) -> VoiceClient {
        let factory: TransportFactory =
            Arc::new(move || transport.clone() as Arc<dyn Transport>);
        VoiceClient::new(Arc::new(credentials), factory)
    }

    fn options() -> SessionOptions {
        SessionOptions::new(AssistantConfig::default(), ToolDispatcher::new())
    }

    #[tokio::test]
    async fn test_only_one_session_at_a_time() {
        let transport = Arc::new(FakeTransport::default());
        let client = client_with(
            FixedCredentials {
                expires_at: None,
                fail: false,
            },
            transport.clone(),
        );

        let session = client.start(options()).await.unwrap();
        assert_eq!(session.session_id(), "sess_abc");
        assert!(client.is_active());

        match client.start(options()).await {
            Err(SessionError::AlreadyActive) => {}
            other => panic!("Expected AlreadyActive, got {other:?}"),
        }

        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(transport.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(session.transport_state(), TransportState::Closed);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_credential_failure_releases_client() {
        let transport = Arc::new(FakeTransport::default());
        let client = client_with(
            FixedCredentials {
                expires_at: None,
                fail: true,
            },
            transport.clone(),
        );

        match client.start(options()).await {
            Err(SessionError::Credential(CredentialError::Network(_))) => {}
            other => panic!("Expected credential error, got {other:?}"),
        }
        assert!(!client.is_active());
        assert_eq!(*transport.state.lock(), TransportState::Uninitialized);
    }

    #[tokio::test]
    async fn test_expired_credential_refused_before_negotiation() {
        let transport = Arc::new(FakeTransport::default());
        let client = client_with(
            FixedCredentials {
                expires_at: Some(1),
                fail: false,
            },
            transport.clone(),
        );

        match client.start(options()).await {
            Err(SessionError::Credential(CredentialError::Expired)) => {}
            other => panic!("Expected Expired, got {other:?}"),
        }
        assert_eq!(*transport.state.lock(), TransportState::Uninitialized);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_negotiation_failure_tears_down() {
        let transport = Arc::new(FakeTransport {
            fail: true,
            ..Default::default()
        });
        let client = client_with(
            FixedCredentials {
                expires_at: None,
                fail: false,
            },
            transport.clone(),
        );

        match client.start(options()).await {
            Err(SessionError::Transport(TransportError::Relay { status, .. })) => {
                assert_eq!(status, Some(502));
            }
            other => panic!("Expected relay error, got {other:?}"),
        }
        assert_eq!(transport.teardowns.load(Ordering::SeqCst), 1);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_channel_close_resolves_closed() {
        let transport = Arc::new(FakeTransport::default());
        let client = client_with(
            FixedCredentials {
                expires_at: None,
                fail: false,
            },
            transport.clone(),
        );
        let session = client.start(options()).await.unwrap();

        let events = transport.events.lock().clone().unwrap();
        events.send(ChannelEvent::Opened).unwrap();
        events.send(ChannelEvent::Closed).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), session.closed())
            .await
            .unwrap();
        assert!(session.is_closed());
        assert_eq!(session.channel_state(), ChannelState::Closed);

        session.stop().await.unwrap();
        assert_eq!(transport.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transcript_subscriber_sees_first_entry() {
        let transport = Arc::new(FakeTransport::default());
        let client = client_with(
            FixedCredentials {
                expires_at: None,
                fail: false,
            },
            transport.clone(),
        );
        let transcript = TranscriptAccumulator::new();
        let mut entries = transcript.subscribe();
        let session = client
            .start(options().with_transcript(transcript))
            .await
            .unwrap();

        let events = transport.events.lock().clone().unwrap();
        events.send(ChannelEvent::Opened).unwrap();
        events
            .send(ChannelEvent::Message(
                r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#
                    .to_string(),
            ))
            .unwrap();

        let entry = tokio::time::timeout(std::time::Duration::from_secs(1), entries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.text, "hello");
        assert_eq!(entry.order, 0);
        assert_eq!(session.transcript().len(), 1);

        session.stop().await.unwrap();
    }
}
