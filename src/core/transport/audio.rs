//! Local audio sources and sinks for the media transport.
//!
//! Capture is abstracted behind [`AudioDevice`] so the negotiator can ask for the
//! preferred constraint profile, fall back to a minimal one, and release the capture
//! deterministically by dropping it.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::codec::G711;
use crate::errors::{TransportError, TransportResult};

/// Clock rate of the G.711 codecs carried on the wire
pub const WIRE_SAMPLE_RATE: u32 = 8000;

/// Requested capture characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    /// None = any rate
    pub sample_rate: Option<u32>,
    /// None = any channel count
    pub channels: Option<u16>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl AudioConstraints {
    /// Mono at a fixed rate with echo cancellation and noise suppression.
    pub fn preferred(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels: Some(1),
            echo_cancellation: true,
            noise_suppression: true,
        }
    }

    /// Accept whatever the device offers.
    pub fn minimal() -> Self {
        Self {
            sample_rate: None,
            channels: None,
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

/// An open capture stream. Dropping it releases the device.
pub trait AudioCapture: Send {
    fn sample_rate(&self) -> u32;

    /// Next `len` mono samples. Returns silence once the source is exhausted.
    fn read_frame(&mut self, len: usize) -> Vec<i16>;
}

pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Open a capture stream satisfying `constraints`, or reject them.
    fn open(&self, constraints: &AudioConstraints) -> TransportResult<Box<dyn AudioCapture>>;
}

/// Open `device` under `preferred`, falling back to [`AudioConstraints::minimal`].
///
/// Fails only when the device rejects both profiles.
pub fn open_capture(
    device: &dyn AudioDevice,
    preferred: &AudioConstraints,
) -> TransportResult<Box<dyn AudioCapture>> {
    match device.open(preferred) {
        Ok(capture) => {
            debug!(device = device.name(), "Audio capture opened with preferred constraints");
            Ok(capture)
        }
        Err(e) => {
            warn!(
                device = device.name(),
                "Preferred audio constraints rejected ({}), retrying with minimal constraints",
                e
            );
            device.open(&AudioConstraints::minimal()).map_err(|e| {
                TransportError::AudioUnavailable(format!("{}: {e}", device.name()))
            })
        }
    }
}

/// Samples held in memory, padded with silence once exhausted.
struct BufferedCapture {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
}

impl AudioCapture for BufferedCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, len: usize) -> Vec<i16> {
        let end = (self.position + len).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        self.position = end;
        frame.resize(len, 0);
        frame
    }
}

/// Streams a 16-bit PCM WAV file as the microphone.
#[derive(Debug, Clone)]
pub struct WavFileDevice {
    path: PathBuf,
    name: String,
}

impl WavFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("wav:{}", path.display());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioDevice for WavFileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, constraints: &AudioConstraints) -> TransportResult<Box<dyn AudioCapture>> {
        let reader = hound::WavReader::open(&self.path)
            .map_err(|e| TransportError::AudioUnavailable(format!("{}: {e}", self.name)))?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(TransportError::AudioUnavailable(format!(
                "{}: only 16-bit integer PCM is supported",
                self.name
            )));
        }
        if let Some(rate) = constraints.sample_rate
            && rate != spec.sample_rate
        {
            return Err(TransportError::AudioUnavailable(format!(
                "{}: file is {} Hz, {rate} Hz requested",
                self.name, spec.sample_rate
            )));
        }
        if let Some(channels) = constraints.channels
            && channels != spec.channels
        {
            return Err(TransportError::AudioUnavailable(format!(
                "{}: file has {} channels, {channels} requested",
                self.name, spec.channels
            )));
        }

        let interleaved = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<i16>, _>>()
            .map_err(|e| TransportError::AudioUnavailable(format!("{}: {e}", self.name)))?;

        let samples = if spec.channels > 1 {
            downmix(&interleaved, spec.channels as usize)
        } else {
            interleaved
        };

        info!(
            device = %self.name,
            sample_rate = spec.sample_rate,
            samples = samples.len(),
            "WAV capture opened"
        );

        Ok(Box::new(BufferedCapture {
            samples,
            position: 0,
            sample_rate: spec.sample_rate,
        }))
    }
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Listen-only source producing silence at the requested rate.
#[derive(Debug, Clone, Default)]
pub struct SilenceDevice;

struct SilentCapture {
    sample_rate: u32,
}

impl AudioCapture for SilentCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, len: usize) -> Vec<i16> {
        vec![0; len]
    }
}

impl AudioDevice for SilenceDevice {
    fn name(&self) -> &str {
        "silence"
    }

    fn open(&self, constraints: &AudioConstraints) -> TransportResult<Box<dyn AudioCapture>> {
        Ok(Box::new(SilentCapture {
            sample_rate: constraints.sample_rate.unwrap_or(WIRE_SAMPLE_RATE),
        }))
    }
}

/// Resample audio (simple linear interpolation)
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(samples.len() - 1);
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = src_idx - idx0 as f64;

        let sample = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
        resampled.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }
    resampled
}

// =============================================================================
// Sinks
// =============================================================================

/// Receives the assistant's audio as RTP payloads.
pub trait AudioSink: Send + Sync {
    fn write_payload(&self, mime_type: &str, payload: &[u8]);

    /// Flush and release any output. Called once at teardown.
    fn finish(&self) -> TransportResult<()> {
        Ok(())
    }
}

/// Discards inbound audio.
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write_payload(&self, _mime_type: &str, _payload: &[u8]) {}
}

type WavWriter = hound::WavWriter<BufWriter<File>>;

/// Decodes G.711 payloads and records them as 8 kHz mono WAV.
pub struct WavRecorderSink {
    path: PathBuf,
    writer: Mutex<Option<WavWriter>>,
}

impl WavRecorderSink {
    pub fn create(path: impl Into<PathBuf>) -> TransportResult<Self> {
        let path = path.into();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: WIRE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            TransportError::InvalidState(format!("cannot record to {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSink for WavRecorderSink {
    fn write_payload(&self, mime_type: &str, payload: &[u8]) {
        let Some(codec) = G711::from_mime_type(mime_type) else {
            debug!(mime_type, "Not recording audio in an unsupported codec");
            return;
        };

        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        for sample in codec.decode(payload) {
            if let Err(e) = writer.write_sample(sample) {
                warn!(path = %self.path.display(), "Stopping recording: {}", e);
                *guard = None;
                return;
            }
        }
    }

    fn finish(&self) -> TransportResult<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize().map_err(|e| {
                TransportError::InvalidState(format!(
                    "cannot finalize {}: {e}",
                    self.path.display()
                ))
            })?;
            info!(path = %self.path.display(), "Assistant audio recorded");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WavRecorderSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRecorderSink")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_constraint_profiles() {
        let preferred = AudioConstraints::preferred(24000);
        assert_eq!(preferred.sample_rate, Some(24000));
        assert_eq!(preferred.channels, Some(1));
        assert!(preferred.echo_cancellation && preferred.noise_suppression);

        let minimal = AudioConstraints::minimal();
        assert!(minimal.sample_rate.is_none());
        assert!(!minimal.echo_cancellation);
    }

    #[test]
    fn test_wav_device_matching_rate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, 24000, 1, &[1, 2, 3]);

        let mut capture = WavFileDevice::new(&path)
            .open(&AudioConstraints::preferred(24000))
            .unwrap();
        assert_eq!(capture.sample_rate(), 24000);
        assert_eq!(capture.read_frame(5), vec![1, 2, 3, 0, 0]);
        assert_eq!(capture.read_frame(2), vec![0, 0]);
    }

    #[test]
    fn test_wav_device_falls_back_to_minimal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, 16000, 2, &[100, 300, -100, -300]);

        let device = WavFileDevice::new(&path);
        assert!(device.open(&AudioConstraints::preferred(24000)).is_err());

        let mut capture = open_capture(&device, &AudioConstraints::preferred(24000)).unwrap();
        assert_eq!(capture.sample_rate(), 16000);
        assert_eq!(capture.read_frame(2), vec![200, -200]);
    }

    #[test]
    fn test_missing_wav_is_unavailable() {
        let device = WavFileDevice::new("/nonexistent/input.wav");
        let result = open_capture(&device, &AudioConstraints::preferred(24000));
        assert!(matches!(result, Err(TransportError::AudioUnavailable(_))));
    }

    #[test]
    fn test_silence_device() {
        let mut capture = SilenceDevice
            .open(&AudioConstraints::preferred(24000))
            .unwrap();
        assert_eq!(capture.sample_rate(), 24000);
        assert!(capture.read_frame(480).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_resample_linear() {
        let input: Vec<i16> = (0..480).map(|i| i as i16).collect();
        let output = resample_linear(&input, 24000, 8000);
        assert_eq!(output.len(), 160);
        assert_eq!(output[0], 0);
        assert_eq!(output[1], 3);

        assert_eq!(resample_linear(&input, 8000, 8000), input);
        assert!(resample_linear(&[], 24000, 8000).is_empty());
    }

    #[test]
    fn test_wav_recorder_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let sink = WavRecorderSink::create(&path).unwrap();

        let payload = G711::Pcmu.encode(&[0, 1000, -1000, 0]);
        sink.write_payload("audio/PCMU", &payload);
        sink.write_payload("audio/opus", &[1, 2, 3]);
        sink.finish().unwrap();
        // Second finish is a no-op
        sink.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 4);
    }
}
