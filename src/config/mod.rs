//! Configuration module for the realtime voice client
//!
//! Two documents configure a session:
//!
//! - [`ClientConfig`]: local settings (backend URL, codec targets, ICE servers, WAV
//!   input/recording paths). Loaded from `.env`, environment variables and an optional
//!   YAML file. Priority: YAML > ENV vars > .env values > defaults.
//! - [`AssistantConfig`]: the assistant configuration document served by the backend
//!   at `GET /config` (instructions, voice, tools, turn detection, greeting).
//!
//! # Example
//! ```rust,no_run
//! use realtime_voice_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("client.yaml"))?;
//!
//! println!("Backend at {}", config.backend_url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::{Path, PathBuf};

use url::Url;

mod assistant;
mod yaml;

pub use assistant::{AssistantConfig, ToolDeclaration, TurnDetectionConfig};
pub use yaml::YamlConfig;

use crate::errors::{ConfigError, ConfigResult};

/// Default backend address (the reference backend listens on 127.0.0.1:8080)
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080";

/// Default codec the negotiator tries to select
pub const DEFAULT_TARGET_CODEC: &str = "audio/PCMU";

/// Default clock rate for the target codec
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 8000;

/// Sample rate requested from the capture device under the preferred profile
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 24000;

/// Label of the auxiliary data channel carrying the event protocol
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "realtime-channel";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client configuration
///
/// Contains everything needed to start a session against a backend:
/// - Backend base URL and request timeout
/// - Codec selection targets and capture sample rate
/// - Optional WAV file used as the microphone, optional WAV recording of the assistant
/// - ICE servers and the data channel label
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub backend_url: String,
    pub request_timeout_secs: u64,

    // Audio settings
    pub target_codec: String,
    pub target_sample_rate: u32,
    pub capture_sample_rate: u32,
    /// WAV file streamed as the local audio source. None = listen-only (silence)
    pub input_wav: Option<PathBuf>,
    /// Where to record the assistant's audio. None = discard
    pub record_wav: Option<PathBuf>,

    // Peer connection settings
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            target_codec: DEFAULT_TARGET_CODEC.to_string(),
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            input_wav: None,
            record_wav: None,
            ice_servers: Vec::new(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Recognized variables:
    /// `REALTIME_BACKEND_URL`, `REALTIME_REQUEST_TIMEOUT_SECS`, `REALTIME_TARGET_CODEC`,
    /// `REALTIME_TARGET_SAMPLE_RATE`, `REALTIME_CAPTURE_SAMPLE_RATE`,
    /// `REALTIME_ICE_SERVERS` (comma-separated), `REALTIME_INPUT_WAV`,
    /// `REALTIME_RECORD_WAV`, `REALTIME_DATA_CHANNEL_LABEL`.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        config.apply_env()?;
        config.apply_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(url) = env_var("REALTIME_BACKEND_URL") {
            parse_url("REALTIME_BACKEND_URL", &url)?;
            self.backend_url = url;
        }
        if let Some(value) = env_var("REALTIME_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REALTIME_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(codec) = env_var("REALTIME_TARGET_CODEC") {
            self.target_codec = codec;
        }
        if let Some(value) = env_var("REALTIME_TARGET_SAMPLE_RATE") {
            self.target_sample_rate = parse_number("REALTIME_TARGET_SAMPLE_RATE", &value)?;
        }
        if let Some(value) = env_var("REALTIME_CAPTURE_SAMPLE_RATE") {
            self.capture_sample_rate = parse_number("REALTIME_CAPTURE_SAMPLE_RATE", &value)?;
        }
        if let Some(servers) = env_var("REALTIME_ICE_SERVERS") {
            self.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(path) = env_var("REALTIME_INPUT_WAV") {
            self.input_wav = Some(PathBuf::from(path));
        }
        if let Some(path) = env_var("REALTIME_RECORD_WAV") {
            self.record_wav = Some(PathBuf::from(path));
        }
        if let Some(label) = env_var("REALTIME_DATA_CHANNEL_LABEL") {
            self.data_channel_label = label;
        }
        Ok(())
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> ConfigResult<()> {
        if let Some(backend) = yaml.backend {
            if let Some(url) = backend.url {
                parse_url("backend.url", &url)?;
                self.backend_url = url;
            }
            if let Some(timeout) = backend.request_timeout_secs {
                self.request_timeout_secs = timeout;
            }
        }
        if let Some(audio) = yaml.audio {
            if let Some(codec) = audio.target_codec {
                self.target_codec = codec;
            }
            if let Some(rate) = audio.target_sample_rate {
                self.target_sample_rate = rate;
            }
            if let Some(rate) = audio.capture_sample_rate {
                self.capture_sample_rate = rate;
            }
            if let Some(path) = audio.input_wav {
                self.input_wav = Some(PathBuf::from(path));
            }
            if let Some(path) = audio.record_wav {
                self.record_wav = Some(PathBuf::from(path));
            }
        }
        if let Some(webrtc) = yaml.webrtc {
            if !webrtc.ice_servers.is_empty() {
                self.ice_servers = webrtc.ice_servers;
            }
            if let Some(label) = webrtc.data_channel_label {
                self.data_channel_label = label;
            }
        }
        Ok(())
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = parse_url("backend_url", &self.backend_url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "backend_url".to_string(),
                    message: format!("scheme must be http or https, got {other}"),
                });
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if !self.target_codec.starts_with("audio/") {
            return Err(ConfigError::InvalidValue {
                key: "target_codec".to_string(),
                message: format!("expected an audio MIME type, got {}", self.target_codec),
            });
        }
        if self.target_sample_rate == 0 || self.capture_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sample_rate".to_string(),
                message: "sample rates must be greater than zero".to_string(),
            });
        }
        if self.data_channel_label.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "data_channel_label".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve an endpoint path against the backend base URL, keeping any base path.
    pub fn endpoint(&self, path: &str) -> ConfigResult<Url> {
        let mut base = parse_url("backend_url", &self.backend_url)?;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ConfigError::InvalidValue {
                key: "backend_url".to_string(),
                message: e.to_string(),
            })
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_url(key: &str, value: &str) -> ConfigResult<Url> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("REALTIME_BACKEND_URL");
            env::remove_var("REALTIME_REQUEST_TIMEOUT_SECS");
            env::remove_var("REALTIME_TARGET_CODEC");
            env::remove_var("REALTIME_TARGET_SAMPLE_RATE");
            env::remove_var("REALTIME_CAPTURE_SAMPLE_RATE");
            env::remove_var("REALTIME_ICE_SERVERS");
            env::remove_var("REALTIME_INPUT_WAV");
            env::remove_var("REALTIME_RECORD_WAV");
            env::remove_var("REALTIME_DATA_CHANNEL_LABEL");
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend_url, "http://127.0.0.1:8080");
        assert_eq!(config.target_codec, "audio/PCMU");
        assert_eq!(config.data_channel_label, "realtime-channel");
    }

    #[test]
    fn test_endpoint_join() {
        let config = ClientConfig::default();
        assert_eq!(
            config.endpoint("/start-session").unwrap().as_str(),
            "http://127.0.0.1:8080/start-session"
        );

        let prefixed = ClientConfig {
            backend_url: "https://example.com/voice".to_string(),
            ..Default::default()
        };
        assert_eq!(
            prefixed.endpoint("/chunks").unwrap().as_str(),
            "https://example.com/voice/chunks"
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("REALTIME_BACKEND_URL", "https://voice.example.com");
            env::set_var("REALTIME_ICE_SERVERS", "stun:a.example.com:3478, stun:b.example.com:3478");
            env::set_var("REALTIME_CAPTURE_SAMPLE_RATE", "16000");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.backend_url, "https://voice.example.com");
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1], "stun:b.example.com:3478");
        assert_eq!(config.capture_sample_rate, 16000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("REALTIME_TARGET_SAMPLE_RATE", "fast");
        }

        let result = ClientConfig::from_env();
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "REALTIME_TARGET_SAMPLE_RATE")
            }
            other => panic!("Expected InvalidValue, got {other:?}"),
        }

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("client.yaml");
        fs::write(
            &config_path,
            r#"
backend:
  url: "http://10.0.0.5:8080"
audio:
  record_wav: "/tmp/assistant.wav"
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("REALTIME_BACKEND_URL", "http://env.example.com");
            env::set_var("REALTIME_TARGET_CODEC", "audio/PCMA");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.backend_url, "http://10.0.0.5:8080");
        // ENV value kept where YAML is silent
        assert_eq!(config.target_codec, "audio/PCMA");
        assert_eq!(
            config.record_wav,
            Some(PathBuf::from("/tmp/assistant.wav"))
        );

        cleanup_env_vars();
    }

    #[test]
    fn test_validate_rejects_non_http_scheme() {
        let config = ClientConfig {
            backend_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_audio_codec() {
        let config = ClientConfig {
            target_codec: "video/VP8".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
