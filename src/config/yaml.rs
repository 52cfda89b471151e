use serde::Deserialize;
use std::path::Path;

use crate::errors::ConfigResult;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Environment variables can
/// override any values specified here.
///
/// # Example YAML structure
/// ```yaml
/// backend:
///   url: "http://127.0.0.1:8080"
///   request_timeout_secs: 30
///
/// audio:
///   target_codec: "audio/PCMU"
///   target_sample_rate: 8000
///   capture_sample_rate: 24000
///   input_wav: "question.wav"
///   record_wav: "assistant.wav"
///
/// webrtc:
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///   data_channel_label: "realtime-channel"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub backend: Option<BackendYaml>,
    pub audio: Option<AudioYaml>,
    pub webrtc: Option<WebRtcYaml>,
}

/// Backend collaborator settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendYaml {
    pub url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Audio capture and codec settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub target_codec: Option<String>,
    pub target_sample_rate: Option<u32>,
    pub capture_sample_rate: Option<u32>,
    pub input_wav: Option<String>,
    pub record_wav: Option<String>,
}

/// Peer connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    pub ice_servers: Vec<String>,
    pub data_channel_label: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
