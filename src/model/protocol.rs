//! # Voice Model Wire Protocol
//!
//! Messages exchanged with the generative voice model over its bidirectional
//! streaming WebSocket.
//!
//! ## Client → Server:
//! - `{setup:{...}}` once, right after the transport opens
//! - `{realtimeInput:{audio|video|text}}` for streamed input
//! - `{clientContent:{turns, turnComplete}}` for whole turns and function responses
//!
//! ## Server → Client:
//! - `{setupComplete:{}}` once the session is configured
//! - `{serverContent:{...}}` repeatedly: audio/text/function-call parts,
//!   turn flags, transcription fragments and usage metadata

use crate::audio::MODEL_OUTPUT_MIME;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level client message; serializes as `{"<variant>": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
            ClientMessage::ClientContent(_) => "clientContent",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub input_audio_transcription: Value,
    pub output_audio_transcription: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
    pub language_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Inline binary data, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// One conversational turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn holding a single text part.
    pub fn user_text(text: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }
}

/// A turn part. Exactly one field is expected to be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponsePart>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponsePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// Any message the model sends; unrecognised top-level keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut message: ServerMessage = serde_json::from_str(text)?;
        // Usage metadata is sometimes a sibling of serverContent; fold it in.
        if let (Some(content), Some(usage)) = (message.server_content.as_mut(), message.usage_metadata.take()) {
            content.usage_metadata.get_or_insert(usage);
        }
        Ok(message)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub generation_complete: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

impl ServerContent {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.model_turn.iter().flat_map(|turn| turn.parts.iter())
    }

    /// Base64 payloads of the 24kHz PCM audio parts, in order.
    ///
    /// Parts tagged with any other MIME type are skipped.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.parts()
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type == MODEL_OUTPUT_MIME)
            .map(|blob| blob.data.as_str())
    }

    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts().filter_map(|part| part.text.as_deref())
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts().filter_map(|part| part.function_call.as_ref())
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete.unwrap_or(false)
    }
}
