//! # Audio Frames
//!
//! Tagged audio payloads flowing through the bridge. Every frame carries the
//! encoding it was produced in, so the codec can refuse nothing and still never
//! mix up sample rates.
//!
//! ## Encodings on the wire:
//! - **Mulaw8k**: G.711 μ-law, one byte per sample, 8kHz (telephony leg)
//! - **Linear16k**: 16-bit signed little-endian PCM, 16kHz (sent to the model)
//! - **Linear24k**: 16-bit signed little-endian PCM, 24kHz (received from the model)

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// MIME type used for every audio chunk sent to the voice model.
pub const MODEL_INPUT_MIME: &str = "audio/pcm;rate=16000";

/// The only MIME type accepted from the voice model; other parts are ignored.
pub const MODEL_OUTPUT_MIME: &str = "audio/pcm;rate=24000";

/// Encoding of an [`AudioFrame`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    Mulaw8k,
    Linear16k,
    Linear24k,
}

impl AudioEncoding {
    /// Samples per second for this encoding.
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioEncoding::Mulaw8k => 8_000,
            AudioEncoding::Linear16k => 16_000,
            AudioEncoding::Linear24k => 24_000,
        }
    }

    /// Bytes used to store one sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Mulaw8k => 1,
            AudioEncoding::Linear16k | AudioEncoding::Linear24k => 2,
        }
    }

    /// MIME tag used by the model protocol, if the encoding has one.
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            AudioEncoding::Mulaw8k => None,
            AudioEncoding::Linear16k => Some(MODEL_INPUT_MIME),
            AudioEncoding::Linear24k => Some(MODEL_OUTPUT_MIME),
        }
    }
}

/// Immutable audio payload tagged with its encoding.
///
/// ## Ownership:
/// The frame owns its bytes. Transcoding consumes a borrowed frame and
/// produces a brand new one, so nothing is ever modified in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    encoding: AudioEncoding,
    data: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw bytes in a frame of the given encoding.
    pub fn new(encoding: AudioEncoding, data: Vec<u8>) -> Self {
        Self { encoding, data }
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole samples in the payload.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.encoding.bytes_per_sample()
    }

    /// Playback duration of the payload in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.sample_count() as u64 * 1000) / self.encoding.sample_rate() as u64
    }
}

/// Read 16-bit little-endian samples out of a byte buffer.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn pcm_from_le_bytes(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    samples
}

/// Write samples as 16-bit little-endian bytes.
pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_byte_conversion() {
        let samples = vec![0i16, 1, -1, 32767, -32768, 1234];
        let bytes = pcm_to_le_bytes(&samples);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[2..4], &[0x01, 0x00]);
        assert_eq!(&bytes[4..6], &[0xFF, 0xFF]);
        assert_eq!(pcm_from_le_bytes(&bytes), samples);
    }

    #[test]
    fn test_odd_trailing_byte_is_dropped() {
        let samples = pcm_from_le_bytes(&[0x10, 0x00, 0x7F]);
        assert_eq!(samples, vec![16]);
    }

    #[test]
    fn test_frame_metrics() {
        let mulaw = AudioFrame::new(AudioEncoding::Mulaw8k, vec![0xFF; 160]);
        assert_eq!(mulaw.sample_count(), 160);
        assert_eq!(mulaw.duration_ms(), 20);

        let linear = AudioFrame::new(AudioEncoding::Linear24k, vec![0; 960]);
        assert_eq!(linear.sample_count(), 480);
        assert_eq!(linear.duration_ms(), 20);
        assert_eq!(linear.encoding().mime_type(), Some(MODEL_OUTPUT_MIME));
    }
}
