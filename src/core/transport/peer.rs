//! WebRTC implementation of [`Transport`].
//!
//! One peer connection carries the local audio track (G.711 at 8 kHz) and one ordered,
//! reliable data channel. ICE gathering completes before the offer is relayed, so the
//! relay sees a single complete session description.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::audio::{
    AudioCapture, AudioConstraints, AudioDevice, AudioSink, WIRE_SAMPLE_RATE, open_capture,
    resample_linear,
};
use super::codec::{CodecCapability, CodecSelection, G711, preference_order, select_codec};
use super::{ChannelEvent, MessageChannel, Transport, TransportLink, TransportState};
use crate::backend::SdpRelay;
use crate::config::ClientConfig;
use crate::core::credential::Credential;
use crate::errors::{TransportError, TransportResult};

const FRAME_DURATION: Duration = Duration::from_millis(20);
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(10);

/// Negotiation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebRtcOptions {
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
    pub target_codec: String,
    pub target_sample_rate: u32,
    pub capture_sample_rate: u32,
}

impl From<&ClientConfig> for WebRtcOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            data_channel_label: config.data_channel_label.clone(),
            target_codec: config.target_codec.clone(),
            target_sample_rate: config.target_sample_rate,
            capture_sample_rate: config.capture_sample_rate,
        }
    }
}

/// Codecs registered with the media engine, in default preference order.
pub fn supported_codecs() -> Vec<CodecCapability> {
    [G711::Pcmu, G711::Pcma]
        .into_iter()
        .map(|codec| {
            CodecCapability::new(codec.mime_type(), WIRE_SAMPLE_RATE, 1, codec.payload_type())
        })
        .collect()
}

fn rtc_capability(codec: &CodecCapability) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type.clone(),
        clock_rate: codec.clock_rate,
        channels: codec.channels,
        ..Default::default()
    }
}

fn rtc_parameters(codec: &CodecCapability) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: rtc_capability(codec),
        payload_type: codec.payload_type,
        ..Default::default()
    }
}

/// Resources owned by an established link.
struct LiveLink {
    peer: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    pump: Option<JoinHandle<()>>,
    closed: CancellationToken,
}

pub struct WebRtcNegotiator {
    options: WebRtcOptions,
    relay: Arc<dyn SdpRelay>,
    device: Arc<dyn AudioDevice>,
    sink: Arc<dyn AudioSink>,
    state: Mutex<TransportState>,
    live: Mutex<Option<LiveLink>>,
}

impl WebRtcNegotiator {
    pub fn new(
        options: WebRtcOptions,
        relay: Arc<dyn SdpRelay>,
        device: Arc<dyn AudioDevice>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            options,
            relay,
            device,
            sink,
            state: Mutex::new(TransportState::Uninitialized),
            live: Mutex::new(None),
        }
    }

    fn set_state(&self, next: TransportState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "Transport state change");
            *state = next;
        }
    }

    async fn new_peer_connection(&self) -> TransportResult<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        for codec in supported_codecs() {
            media_engine.register_codec(rtc_parameters(&codec), RTPCodecType::Audio)?;
        }

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .options
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        Ok(Arc::new(api.new_peer_connection(rtc_config).await?))
    }

    async fn negotiate(
        &self,
        credential: Credential,
        capture: Box<dyn AudioCapture>,
        peer: &Arc<RTCPeerConnection>,
    ) -> TransportResult<TransportLink> {
        // Codec selection from what the media engine advertises
        let codecs = supported_codecs();
        let selection = select_codec(
            &codecs,
            &self.options.target_codec,
            self.options.target_sample_rate,
        );
        let send_codec = selection
            .index()
            .and_then(|i| codecs.get(i))
            .or_else(|| codecs.first())
            .cloned()
            .ok_or_else(|| TransportError::InvalidState("no codecs registered".to_string()))?;
        let encoder = G711::from_mime_type(&send_codec.mime_type).unwrap_or(G711::Pcmu);
        if selection == CodecSelection::PlatformDefault {
            warn!(
                target_codec = %self.options.target_codec,
                "Target codec not supported, using platform defaults"
            );
        }

        // Local audio as a send track
        let track = Arc::new(TrackLocalStaticSample::new(
            rtc_capability(&send_codec),
            "audio".to_owned(),
            format!("realtime-voice-{}", uuid::Uuid::new_v4()),
        ));
        let rtp_sender = peer
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain RTCP so interceptors keep working
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        if selection != CodecSelection::PlatformDefault {
            let preferences: Vec<RTCRtpCodecParameters> = preference_order(&codecs, selection)
                .iter()
                .map(rtc_parameters)
                .collect();
            for transceiver in peer.get_transceivers().await {
                if transceiver.kind() != RTPCodecType::Audio {
                    continue;
                }
                if let Err(e) = transceiver.set_codec_preferences(preferences.clone()).await {
                    warn!("Codec preferences not applied, using platform defaults: {}", e);
                }
            }
        }

        // Ordered, reliable data channel
        let channel = peer
            .create_data_channel(
                &self.options.data_channel_label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        self.wire_callbacks(peer, &channel, events_tx, closed.clone());

        // Offer, wait for ICE gathering, relay, apply answer
        let offer = peer.create_offer(None).await?;
        let mut gathering_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(offer).await?;
        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gathering_complete.recv())
            .await
            .is_err()
        {
            warn!("ICE gathering timed out, sending the candidates gathered so far");
        }

        let local = peer.local_description().await.ok_or_else(|| {
            TransportError::InvalidState("no local session description".to_string())
        })?;

        let answer_sdp = self.relay.exchange_sdp(&credential, &local.sdp).await?;
        drop(credential);

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| TransportError::InvalidAnswer(e.to_string()))?;
        peer.set_remote_description(answer)
            .await
            .map_err(|e| TransportError::InvalidAnswer(e.to_string()))?;

        self.set_state(TransportState::Connected);
        info!(
            codec = %encoder,
            label = %self.options.data_channel_label,
            "Transport connected"
        );

        let pump = tokio::spawn(pump_audio(capture, track, encoder, closed.clone()));

        *self.live.lock() = Some(LiveLink {
            peer: Arc::clone(peer),
            channel: Arc::clone(&channel),
            pump: Some(pump),
            closed: closed.clone(),
        });

        Ok(TransportLink {
            channel: Arc::new(DataChannelSender {
                label: self.options.data_channel_label.clone(),
                channel,
            }),
            events: events_rx,
            closed,
        })
    }

    /// Callbacks only enqueue events and cancel the `closed` token.
    fn wire_callbacks(
        &self,
        peer: &Arc<RTCPeerConnection>,
        channel: &Arc<RTCDataChannel>,
        events: mpsc::UnboundedSender<ChannelEvent>,
        closed: CancellationToken,
    ) {
        let tx = events.clone();
        channel.on_open(Box::new(move || {
            let _ = tx.send(ChannelEvent::Opened);
            Box::pin(async {})
        }));

        let tx = events.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(ChannelEvent::Message(text));
                    }
                    Err(e) => warn!("Dropping non UTF-8 channel message: {}", e),
                }
            } else {
                debug!(len = msg.data.len(), "Ignoring binary channel message");
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        let token = closed.clone();
        channel.on_close(Box::new(move || {
            token.cancel();
            let _ = tx.send(ChannelEvent::Closed);
            Box::pin(async {})
        }));

        channel.on_error(Box::new(move |e| {
            warn!("Data channel error: {}", e);
            Box::pin(async {})
        }));

        let tx = events;
        let token = closed.clone();
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(state = %state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                token.cancel();
                let _ = tx.send(ChannelEvent::Closed);
            }
            Box::pin(async {})
        }));

        let sink = Arc::clone(&self.sink);
        peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = Arc::clone(&sink);
            let stop = closed.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    tokio::spawn(forward_remote_audio(track, sink, stop));
                }
            })
        }));
    }
}

#[async_trait]
impl Transport for WebRtcNegotiator {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn establish(&self, credential: Credential) -> TransportResult<TransportLink> {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Uninitialized {
                return Err(TransportError::InvalidState(format!(
                    "cannot establish a {} transport",
                    *state
                )));
            }
            *state = TransportState::Negotiating;
        }

        let preferred = AudioConstraints::preferred(self.options.capture_sample_rate);
        let capture = match open_capture(self.device.as_ref(), &preferred) {
            Ok(capture) => capture,
            Err(e) => {
                error!("Transport negotiation failed: {}", e);
                self.set_state(TransportState::Closed);
                return Err(e);
            }
        };

        let peer = match self.new_peer_connection().await {
            Ok(peer) => peer,
            Err(e) => {
                error!("Transport negotiation failed: {}", e);
                self.set_state(TransportState::Closed);
                return Err(e);
            }
        };

        match self.negotiate(credential, capture, &peer).await {
            Ok(link) => Ok(link),
            Err(e) => {
                error!("Transport negotiation failed: {}", e);
                if let Err(close_err) = peer.close().await {
                    debug!("Error closing failed peer connection: {}", close_err);
                }
                self.set_state(TransportState::Closed);
                Err(e)
            }
        }
    }

    async fn teardown(&self) -> TransportResult<()> {
        let live = self.live.lock().take();

        if let Some(mut live) = live {
            live.closed.cancel();
            if let Some(pump) = live.pump.take()
                && let Err(e) = pump.await
            {
                warn!("Audio pump ended abnormally: {}", e);
            }
            if let Err(e) = live.channel.close().await {
                debug!("Error closing data channel: {}", e);
            }
            if let Err(e) = live.peer.close().await {
                warn!("Error closing peer connection: {}", e);
            }
            if let Err(e) = self.sink.finish() {
                warn!("Error finishing audio sink: {}", e);
            }
            info!("Transport torn down");
        }

        self.set_state(TransportState::Closed);
        Ok(())
    }
}

/// Capture → resample → G.711 → send track, one 20 ms frame per tick.
///
/// Owns the capture; it is released when this returns.
async fn pump_audio(
    mut capture: Box<dyn AudioCapture>,
    track: Arc<TrackLocalStaticSample>,
    codec: G711,
    stop: CancellationToken,
) {
    let source_rate = capture.sample_rate();
    let frame_len = (source_rate as usize * FRAME_DURATION.as_millis() as usize) / 1000;
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(source_rate, frame_len, codec = %codec, "Audio pump started");
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let frame = capture.read_frame(frame_len);
                let wire = resample_linear(&frame, source_rate, WIRE_SAMPLE_RATE);
                let sample = Sample {
                    data: Bytes::from(codec.encode(&wire)),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Dropping audio frame: {}", e);
                }
            }
        }
    }
    drop(capture);
    debug!("Audio capture released");
}

async fn forward_remote_audio(
    track: Arc<TrackRemote>,
    sink: Arc<dyn AudioSink>,
    stop: CancellationToken,
) {
    let mime_type = track.codec().capability.mime_type;
    info!(mime_type = %mime_type, "Remote audio track received");

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            read = track.read_rtp() => match read {
                Ok((packet, _attributes)) => {
                    if !packet.payload.is_empty() {
                        sink.write_payload(&mime_type, &packet.payload);
                    }
                }
                Err(e) => {
                    debug!("Remote track read ended: {}", e);
                    break;
                }
            }
        }
    }
}

/// [`MessageChannel`] over an `RTCDataChannel`.
struct DataChannelSender {
    label: String,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl MessageChannel for DataChannelSender {
    async fn send_text(&self, text: String) -> TransportResult<()> {
        self.channel.send_text(text).await?;
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}
