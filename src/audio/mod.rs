//! # Audio Module
//!
//! Everything the bridge needs to move audio between the telephony leg and the
//! voice model leg.
//!
//! ## Key Components:
//! - **Frame**: tagged audio payloads and little-endian PCM helpers
//! - **Codec**: G.711 μ-law companding plus the 8k→16k and 24k→8k resamplers
//!
//! ## Audio Formats:
//! - **Telephony**: μ-law, 8kHz, mono, base64 inside JSON frames
//! - **Model input**: 16-bit PCM, 16kHz, mono (`audio/pcm;rate=16000`)
//! - **Model output**: 16-bit PCM, 24kHz, mono (`audio/pcm;rate=24000`)

pub mod codec;    // μ-law companding and resampling
pub mod frame;    // Tagged audio frames

pub use frame::{AudioEncoding, AudioFrame, MODEL_OUTPUT_MIME};
