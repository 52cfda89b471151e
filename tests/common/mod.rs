//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use realtime_voice_client::backend::KnowledgeBackend;
use realtime_voice_client::core::realtime::{EventSender, NoticeCallback};
use realtime_voice_client::core::transport::{AudioCapture, AudioConstraints};
use realtime_voice_client::errors::{ProtocolError, ToolResult, TransportError, TransportResult};
use realtime_voice_client::{
    AssistantConfig, AudioDevice, EngineHandle, EventEngine, MessageChannel, ToolDispatcher,
    TranscriptAccumulator,
};

// =============================================================================
// Message channel
// =============================================================================

/// Records every outbound message.
#[derive(Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<String>>,
}

impl MemoryChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send_text(&self, text: String) -> TransportResult<()> {
        assert!(!text.contains('\n'), "channel messages are single-line JSON");
        self.sent.lock().push(text);
        Ok(())
    }

    fn label(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Engine harness
// =============================================================================

pub struct Harness {
    pub engine: EventEngine,
    pub handle: EngineHandle,
    pub channel: Arc<MemoryChannel>,
    pub transcript: TranscriptAccumulator,
    pub closed: CancellationToken,
    pub notices: Arc<Mutex<Vec<ProtocolError>>>,
}

pub fn harness(tools: ToolDispatcher) -> Harness {
    harness_with(tools, AssistantConfig::default())
}

pub fn harness_with(tools: ToolDispatcher, assistant: AssistantConfig) -> Harness {
    let channel = Arc::new(MemoryChannel::default());
    let closed = CancellationToken::new();
    let sender = EventSender::new(channel.clone(), closed.clone());
    let transcript = TranscriptAccumulator::new();
    let (engine, handle) = EventEngine::new(
        "sess_test",
        sender,
        tools,
        transcript.clone(),
        Arc::new(assistant),
    );

    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    let callback: NoticeCallback = Arc::new(move |e: ProtocolError| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().push(e);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });

    Harness {
        engine: engine.with_notice_callback(callback),
        handle,
        channel,
        transcript,
        closed,
        notices,
    }
}

pub fn function_call_done(call_id: &str, name: &str, arguments: &str) -> String {
    serde_json::json!({
        "type": "response.done",
        "response": {
            "id": "resp_1",
            "status": "completed",
            "output": [{
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }]
        }
    })
    .to_string()
}

// =============================================================================
// Tool backends
// =============================================================================

/// Knowledge backend that blocks until released.
#[derive(Default)]
pub struct BlockingBackend {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl KnowledgeBackend for BlockingBackend {
    async fn lookup_chunks(&self, _query: &str) -> ToolResult<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok("late result".to_string())
    }
}

// =============================================================================
// Audio
// =============================================================================

/// Device that counts captures still alive.
#[derive(Default)]
pub struct CountingDevice {
    pub live: Arc<AtomicUsize>,
    pub opened: AtomicUsize,
    pub reject_all: bool,
}

impl CountingDevice {
    pub fn live_captures(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct CountingCapture {
    live: Arc<AtomicUsize>,
    sample_rate: u32,
}

impl AudioCapture for CountingCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, len: usize) -> Vec<i16> {
        vec![0; len]
    }
}

impl Drop for CountingCapture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AudioDevice for CountingDevice {
    fn name(&self) -> &str {
        "counting"
    }

    fn open(&self, constraints: &AudioConstraints) -> TransportResult<Box<dyn AudioCapture>> {
        if self.reject_all {
            return Err(TransportError::AudioUnavailable("no microphone".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingCapture {
            live: self.live.clone(),
            sample_rate: constraints.sample_rate.unwrap_or(48000),
        }))
    }
}
