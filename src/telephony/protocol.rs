//! # Telephony Media-Stream Protocol
//!
//! JSON vocabulary spoken by the telephony provider over the media-stream
//! WebSocket. Inbound frames are discriminated by their `event` field.
//!
//! ## Inbound events:
//! - **connected**: transport is up, protocol name and version
//! - **start**: stream metadata (stream SID, call SID, custom parameters, media format)
//! - **media**: one chunk of base64 μ-law audio on the inbound or outbound track
//! - **stop**: the call ended on the telephony side
//! - **dtmf**: the caller pressed a key
//! - **mark**: playback reached a mark we previously sent
//!
//! Any other event name parses as [`TelephonyEvent::Unknown`] so newer provider
//! events never break an existing deployment.
//!
//! ## Outbound frames:
//! - `{event:"media", streamSid, media:{payload}}`
//! - `{event:"clear", streamSid}`
//! - `{event:"mark", streamSid, mark:{name}}`

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// An inbound media-stream event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected(ConnectedEvent),
    Start(StartEvent),
    Media(MediaEvent),
    Stop(StopEvent),
    Dtmf(DtmfEvent),
    Mark(MarkEvent),
    /// Any event name outside the fixed vocabulary
    #[serde(other)]
    Unknown,
}

impl TelephonyEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TelephonyEvent::Connected(_) => "connected",
            TelephonyEvent::Start(_) => "start",
            TelephonyEvent::Media(_) => "media",
            TelephonyEvent::Stop(_) => "stop",
            TelephonyEvent::Dtmf(_) => "dtmf",
            TelephonyEvent::Mark(_) => "mark",
            TelephonyEvent::Unknown => "unknown",
        }
    }

    /// Per-stream sequence number, if the event carries one.
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            TelephonyEvent::Start(e) => e.sequence_number,
            TelephonyEvent::Media(e) => e.sequence_number,
            TelephonyEvent::Stop(e) => e.sequence_number,
            TelephonyEvent::Dtmf(e) => e.sequence_number,
            TelephonyEvent::Mark(e) => e.sequence_number,
            TelephonyEvent::Connected(_) | TelephonyEvent::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedEvent {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvent {
    #[serde(default, deserialize_with = "flexible_sequence")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub stream_sid: String,
    pub start: StartMetadata,
}

impl StartEvent {
    /// Stream identifier, preferring the nested metadata copy.
    pub fn stream_sid(&self) -> &str {
        if self.start.stream_sid.is_empty() {
            &self.stream_sid
        } else {
            &self.start.stream_sid
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub stream_sid: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub call_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEvent {
    #[serde(default, deserialize_with = "flexible_sequence")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub stream_sid: String,
    pub media: MediaPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: MediaTrack,
    #[serde(default, deserialize_with = "flexible_text")]
    pub chunk: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub timestamp: Option<String>,
    /// Base64 μ-law audio
    #[serde(default)]
    pub payload: String,
}

/// Which side of the call a media chunk belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTrack {
    #[default]
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEvent {
    #[serde(default, deserialize_with = "flexible_sequence")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub stream_sid: String,
    #[serde(default)]
    pub stop: StopMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub call_sid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmfEvent {
    #[serde(default, deserialize_with = "flexible_sequence")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub stream_sid: String,
    pub dtmf: DtmfPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub digit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEvent {
    #[serde(default, deserialize_with = "flexible_sequence")]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub stream_sid: String,
    pub mark: MarkPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames sent back to the telephony provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
    #[serde(rename_all = "camelCase")]
    Mark {
        stream_sid: String,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    /// Base64 μ-law audio
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Sequence numbers arrive as JSON strings from some providers and as numbers
/// from others; accept both and treat anything unparseable as absent.
fn flexible_sequence<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(s)) => s.parse().ok(),
        Some(NumberOrText::Other(_)) | None => None,
    })
}

/// Informational fields such as `chunk` and `timestamp`: numbers are kept as
/// their decimal text, other non-string values are dropped.
fn flexible_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
