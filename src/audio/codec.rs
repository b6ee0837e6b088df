//! # Telephony Codec
//!
//! Stateless conversion between G.711 μ-law at 8kHz (telephony) and linear
//! 16-bit PCM at the rates the voice model speaks.
//!
//! ## Key Functions:
//! - **mulaw_decode / mulaw_encode**: bit-exact G.711 μ-law companding
//! - **upsample**: μ-law 8kHz → linear 16kHz (decode, then zero-order hold)
//! - **downsample**: linear 24kHz → μ-law 8kHz (average runs of three, then encode)
//!
//! ## Real-time Safety:
//! Nothing here allocates more than the output buffer, nothing keeps state
//! between frames, and every input produces an output. Garbage in gives
//! bounded garbage out, never a panic.

use crate::audio::frame::{pcm_from_le_bytes, pcm_to_le_bytes, AudioEncoding, AudioFrame};

/// Bias added before the exponent search (G.711 μ-law).
const MULAW_BIAS: i32 = 0x84;

/// Largest magnitude that survives biasing without overflowing 15 bits.
const MULAW_CLIP: i32 = 32635;

/// Expand one μ-law byte to a 16-bit linear sample.
///
/// ## Process:
/// 1. Invert all bits (μ-law bytes are stored complemented)
/// 2. Split into sign, 3-bit exponent and 4-bit mantissa
/// 3. Rebuild the biased magnitude and remove the bias
pub fn mulaw_decode(byte: u8) -> i16 {
    let inverted = !byte;
    let sign = inverted & 0x80;
    let exponent = ((inverted >> 4) & 0x07) as i32;
    let mantissa = (inverted & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;

    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compress one 16-bit linear sample to a μ-law byte.
///
/// ## Process:
/// 1. Take the sign and work with the magnitude
/// 2. Clip at 32635 and add the 0x84 bias
/// 3. Find the exponent by scanning the 8 segment bits from the top
/// 4. Keep the 4 bits below the segment bit as mantissa
/// 5. Pack and complement
pub fn mulaw_encode(sample: i16) -> u8 {
    // Widen first so that -32768 has a representable magnitude.
    let mut value = sample as i32;
    let sign: u8 = if value < 0 { 0x80 } else { 0x00 };
    if value < 0 {
        value = -value;
    }
    if value > MULAW_CLIP {
        value = MULAW_CLIP;
    }
    value += MULAW_BIAS;

    let mut exponent: i32 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && (value & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

/// Convert μ-law 8kHz bytes into linear 16kHz little-endian PCM bytes.
///
/// Every decoded sample is written twice (zero-order hold). The output holds
/// exactly `2 * input.len()` samples, i.e. `4 * input.len()` bytes.
pub fn upsample(mulaw: &[u8]) -> Vec<u8> {
    let mut samples = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        let sample = mulaw_decode(byte);
        samples.push(sample);
        samples.push(sample);
    }
    pcm_to_le_bytes(&samples)
}

/// Convert linear 24kHz little-endian PCM bytes into μ-law 8kHz bytes.
///
/// Samples are averaged in runs of three with round-to-nearest. A trailing run
/// of one or two samples is padded by repeating its last sample, so the output
/// holds `ceil(samples / 3)` bytes.
pub fn downsample(linear24k: &[u8]) -> Vec<u8> {
    let samples = pcm_from_le_bytes(linear24k);
    let mut out = Vec::with_capacity(samples.len().div_ceil(3));

    for run in samples.chunks(3) {
        let last = run[run.len() - 1] as i32;
        let sum: i32 = run.iter().map(|&s| s as i32).sum::<i32>() + last * (3 - run.len() as i32);
        // Thirds never tie, so flooring (sum + 1) / 3 is round-to-nearest for any sign.
        let averaged = (sum + 1).div_euclid(3);
        out.push(mulaw_encode(averaged as i16));
    }

    out
}

/// Frame-level [`upsample`]: a μ-law 8kHz frame becomes a linear 16kHz frame.
///
/// Frames in another encoding are passed through untouched; the bridge only
/// ever calls this with telephony audio.
pub fn upsample_frame(frame: &AudioFrame) -> AudioFrame {
    match frame.encoding() {
        AudioEncoding::Mulaw8k => AudioFrame::new(AudioEncoding::Linear16k, upsample(frame.data())),
        _ => frame.clone(),
    }
}

/// Frame-level [`downsample`]: a linear 24kHz frame becomes a μ-law 8kHz frame.
pub fn downsample_frame(frame: &AudioFrame) -> AudioFrame {
    match frame.encoding() {
        AudioEncoding::Linear24k => AudioFrame::new(AudioEncoding::Mulaw8k, downsample(frame.data())),
        _ => frame.clone(),
    }
}
