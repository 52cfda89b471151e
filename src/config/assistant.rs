//! Assistant configuration document served by the backend at `GET /config`.

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};

const DEFAULT_VOICE: &str = "verse";
const DEFAULT_TEMPERATURE: f32 = 0.6;
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Assistant configuration forwarded to the realtime service in `session.update`.
///
/// Both the snake_case keys and the uppercase keys used by older backends
/// (`SYSTEM_PROMPT`, `VOICE`, `TOOLS`, ...) are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    #[serde(alias = "SYSTEM_PROMPT")]
    pub instructions: String,

    #[serde(alias = "VOICE")]
    pub voice: String,

    /// Voices the backend allows. Empty means unrestricted.
    #[serde(alias = "VOICES")]
    pub voices: Vec<String>,

    #[serde(alias = "TOOLS")]
    pub tools: Vec<ToolDeclaration>,

    pub tool_choice: String,

    #[serde(alias = "TEMPERATURE")]
    pub temperature: f32,

    #[serde(alias = "TRANSCRIPTION_MODEL")]
    pub transcription_model: String,

    pub modalities: Vec<String>,

    pub turn_detection: TurnDetectionConfig,

    /// Scripted greeting requested right after the session is configured
    #[serde(alias = "GREETING_PROMPT")]
    pub greeting: Option<String>,

    /// Text placed before every tool result (`"{preamble}\n\n{result}"`)
    pub tool_result_preamble: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            voice: DEFAULT_VOICE.to_string(),
            voices: Vec::new(),
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            turn_detection: TurnDetectionConfig::default(),
            greeting: None,
            tool_result_preamble: None,
        }
    }
}

impl AssistantConfig {
    /// Parse and validate a `/config` document.
    pub fn from_json(body: &str) -> ConfigResult<Self> {
        let config: AssistantConfig = serde_json::from_str(body)
            .map_err(|e| ConfigError::MalformedDocument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.voices.is_empty() && !self.voices.iter().any(|v| v == &self.voice) {
            return Err(ConfigError::InvalidValue {
                key: "voice".to_string(),
                message: format!(
                    "'{}' is not one of the allowed voices: {}",
                    self.voice,
                    self.voices.join(", ")
                ),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "temperature".to_string(),
                message: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "tools".to_string(),
                message: format!("tool of type '{}' has an empty name", tool.tool_type),
            });
        }
        Ok(())
    }

    /// Apply the optional preamble to a tool result.
    pub fn tool_output(&self, result: &str) -> String {
        match self.tool_result_preamble.as_deref() {
            Some(preamble) if !preamble.is_empty() => format!("{preamble}\n\n{result}"),
            _ => result.to_string(),
        }
    }
}

/// Tool declaration in the flat form the realtime service expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn function_type() -> String {
    "function".to_string()
}

/// Server-driven turn detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio kept before detected speech (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence before end of turn (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether the service creates a response at end of turn
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AssistantConfig::default();
        assert_eq!(config.voice, "verse");
        assert_eq!(config.tool_choice, "auto");
        assert_eq!(config.transcription_model, "whisper-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_uppercase_document() {
        let body = r#"{
            "VOICE": "verse",
            "TEMPERATURE": 0.6,
            "TRANSCRIPTION_MODEL": "whisper-1",
            "VOICES": ["alloy", "verse"],
            "TOOLS": [{
                "type": "function",
                "name": "get_chunks",
                "description": "Search the knowledge base",
                "parameters": {
                    "type": "object",
                    "properties": {"userquery": {"type": "string"}},
                    "required": ["userquery"]
                }
            }],
            "GREETING_PROMPT": "Hello there",
            "SYSTEM_PROMPT": "Answer briefly."
        }"#;

        let config = AssistantConfig::from_json(body).unwrap();
        assert_eq!(config.instructions, "Answer briefly.");
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name, "get_chunks");
        assert_eq!(config.greeting.as_deref(), Some("Hello there"));
        assert_eq!(config.voices.len(), 2);
    }

    #[test]
    fn test_snake_case_document_with_turn_detection() {
        let body = r#"{
            "instructions": "Be nice",
            "voice": "alloy",
            "turn_detection": {"type": "server_vad", "threshold": 0.7, "silence_duration_ms": 800}
        }"#;

        let config = AssistantConfig::from_json(body).unwrap();
        match config.turn_detection {
            TurnDetectionConfig::ServerVad {
                threshold,
                silence_duration_ms,
                prefix_padding_ms,
                ..
            } => {
                assert_eq!(threshold, Some(0.7));
                assert_eq!(silence_duration_ms, Some(800));
                assert_eq!(prefix_padding_ms, None);
            }
            _ => panic!("Expected ServerVad"),
        }
    }

    #[test]
    fn test_voice_must_be_allowed() {
        let body = r#"{"voice": "robot", "voices": ["alloy", "verse"]}"#;
        let result = AssistantConfig::from_json(body);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_malformed_document() {
        let result = AssistantConfig::from_json("not json");
        assert!(matches!(result, Err(ConfigError::MalformedDocument(_))));
    }

    #[test]
    fn test_tool_output_preamble() {
        let mut config = AssistantConfig::default();
        assert_eq!(config.tool_output("result"), "result");

        config.tool_result_preamble = Some("Use only this context.".to_string());
        assert_eq!(
            config.tool_output("result"),
            "Use only this context.\n\nresult"
        );
    }

    #[test]
    fn test_turn_detection_serializes_with_tag() {
        let json = serde_json::to_value(TurnDetectionConfig::default()).unwrap();
        assert_eq!(json["type"], "server_vad");
        assert_eq!(json["prefix_padding_ms"], 300);

        let none = serde_json::to_value(TurnDetectionConfig::None).unwrap();
        assert_eq!(none["type"], "none");
    }
}
