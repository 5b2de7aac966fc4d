//! Gemini Live API module
//!
//! Wire types for the bidirectional streaming endpoint: the setup frame, realtime
//! input, and the server messages the session reacts to.

use crate::events::{LiveMessage, MediaEnvelope};
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, warn};

pub const LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Error type for Gemini API operations
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GeminiError>;

/// Response modality options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Audio => "AUDIO",
        }
    }
}

/// Configuration a session is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub system_instruction: String,
    pub voice: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            response_modality: ResponseModality::Audio,
            system_instruction: String::new(),
            voice: "Fenrir".to_string(),
        }
    }
}

impl LiveConfig {
    pub fn to_setup(&self) -> BidiGenerateContentSetup {
        BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec![self.response_modality.as_str().to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                }),
                temperature: None,
            }),
            system_instruction: (!self.system_instruction.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: Some(self.system_instruction.clone()),
                }],
            }),
        }
    }
}

pub fn endpoint_url(api_key: &str) -> String {
    format!("{}?key={}", LIVE_ENDPOINT, api_key)
}

/// Generation configuration for setup.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Session setup message.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// A chunk of realtime input (audio/video/text)
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

impl From<&MediaEnvelope> for Blob {
    fn from(envelope: &MediaEnvelope) -> Self {
        Self {
            data: envelope.payload_base64().to_string(),
            mime_type: envelope.mime_type().to_string(),
        }
    }
}

impl RealtimeInput {
    /// Route an envelope to the field matching its mime family.
    pub fn from_envelope(envelope: &MediaEnvelope) -> Result<Self> {
        if envelope.is_audio() {
            Ok(Self {
                audio: Some(envelope.into()),
                ..Default::default()
            })
        } else if envelope.is_image() {
            Ok(Self {
                video: Some(envelope.into()),
                ..Default::default()
            })
        } else if envelope.is_text() {
            let bytes = general_purpose::STANDARD
                .decode(envelope.payload_base64())
                .map_err(|e| GeminiError::Other(format!("invalid text payload: {}", e)))?;
            let text = String::from_utf8(bytes)
                .map_err(|e| GeminiError::Other(format!("text payload is not UTF-8: {}", e)))?;
            Ok(Self {
                text: Some(text),
                ..Default::default()
            })
        } else {
            Err(GeminiError::Other(format!(
                "unsupported mime type: {}",
                envelope.mime_type()
            )))
        }
    }
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(RealtimeInput),
}

/// Server -> client messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: serde_json::Value,
    },
    ServerContent {
        #[serde(rename = "serverContent")]
        server_content: serde_json::Value,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: serde_json::Value,
    },
    GoAway {
        #[serde(rename = "goAway")]
        go_away: serde_json::Value,
    },
    SessionResumptionUpdate {
        #[serde(rename = "sessionResumptionUpdate")]
        session_resumption_update: serde_json::Value,
    },
}

/// Reduce a `serverContent` payload to speech audio and the turn marker.
pub fn parse_server_content(content: &serde_json::Value) -> LiveMessage {
    let mut message = LiveMessage {
        audio: Vec::new(),
        turn_complete: content
            .get("turnComplete")
            .and_then(|t| t.as_bool())
            .unwrap_or(false),
    };

    let parts = content
        .get("modelTurn")
        .and_then(|turn| turn.get("parts"))
        .and_then(|p| p.as_array());

    for part in parts.into_iter().flatten() {
        let Some(inline_data) = part.get("inlineData") else {
            continue;
        };
        match inline_data.get("data").and_then(|d| d.as_str()) {
            Some(data) if !data.is_empty() => {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| crate::pcm::pcm_mime_type(crate::pcm::OUTPUT_SAMPLE_RATE));
                message.audio.push(MediaEnvelope::new(data, mime_type));
            }
            Some(_) => debug!("Skipping empty inline data part"),
            None => warn!("Received inline data without data field: {:?}", inline_data),
        }
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let config = LiveConfig {
            system_instruction: "You are a party host.".to_string(),
            ..Default::default()
        };
        let msg = ClientMessage::Setup(config.to_setup());
        let parsed = serde_json::to_value(&msg).unwrap();

        let setup = &parsed["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Fenrir"
        );
        assert_eq!(
            setup["systemInstruction"]["parts"][0]["text"],
            "You are a party host."
        );
        assert!(setup["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_realtime_input_routing() {
        let audio = MediaEnvelope::new("AAAA", "audio/pcm;rate=16000");
        let msg = ClientMessage::RealtimeInput(RealtimeInput::from_envelope(&audio).unwrap());
        let parsed = serde_json::to_value(&msg).unwrap();
        assert_eq!(parsed["realtimeInput"]["audio"]["data"], "AAAA");
        assert_eq!(
            parsed["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert!(parsed["realtimeInput"].get("video").is_none());

        let frame = MediaEnvelope::new("/9j/", "image/jpeg");
        let input = RealtimeInput::from_envelope(&frame).unwrap();
        assert_eq!(input.video.unwrap().mime_type, "image/jpeg");
        assert!(input.audio.is_none());
    }

    #[test]
    fn test_text_envelope_is_sent_as_plain_text() {
        let text = MediaEnvelope::new(general_purpose::STANDARD.encode("Happy New Year"), "text/plain");
        let input = RealtimeInput::from_envelope(&text).unwrap();
        assert_eq!(input.text.as_deref(), Some("Happy New Year"));

        let unknown = MediaEnvelope::new("AAAA", "application/octet-stream");
        assert!(RealtimeInput::from_envelope(&unknown).is_err());
    }

    #[test]
    fn test_server_message_variants() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::SetupComplete { .. }));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::ServerContent { .. }));

        let msg: ServerMessage = serde_json::from_str(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::GoAway { .. }));
    }

    #[test]
    fn test_parse_server_content_audio_parts() {
        let content = json!({
            "modelTurn": {"parts": [
                {"inlineData": {"data": "AQI=", "mimeType": "audio/pcm;rate=24000"}},
                {"text": "ignored"},
                {"inlineData": {"data": "AwQ="}}
            ]}
        });
        let message = parse_server_content(&content);
        assert_eq!(message.audio.len(), 2);
        assert_eq!(message.audio[0].payload_base64(), "AQI=");
        assert_eq!(message.audio[1].mime_type(), "audio/pcm;rate=24000");
        assert!(!message.turn_complete);
    }

    #[test]
    fn test_parse_server_content_turn_complete_only() {
        let message = parse_server_content(&json!({"turnComplete": true}));
        assert!(message.audio.is_empty());
        assert!(message.turn_complete);
    }

    #[test]
    fn test_enum_as_str() {
        assert_eq!(ResponseModality::Text.as_str(), "TEXT");
        assert_eq!(ResponseModality::Audio.as_str(), "AUDIO");
    }
}
