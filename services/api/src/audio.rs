//! Audio codec and resampling utilities.
//!
//! Everything here is a pure function over sample buffers: G.711
//! mu-law companding for the telephony leg, linear-interpolation
//! resampling between the telephony and Live API sample rates, and
//! base64 transport encoding of little-endian PCM16.

use base64::Engine;

/// Telephony carriers deliver and expect 8 kHz mu-law.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;
/// The Live API accepts PCM16 input at 16 kHz.
pub const LIVE_API_INPUT_SAMPLE_RATE: u32 = 16000;
/// The Live API emits PCM16 output at 24 kHz.
pub const LIVE_API_OUTPUT_SAMPLE_RATE: u32 = 24000;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Encodes one 16-bit linear sample to an 8-bit mu-law byte
/// (G.711, bias 0x84, 14-bit dynamic range).
pub fn mulaw_encode(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    if value > MULAW_CLIP {
        value = MULAW_CLIP;
    }
    value += MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decodes one 8-bit mu-law byte back to a 16-bit linear sample.
pub fn mulaw_decode(byte: u8) -> i16 {
    let value = !byte as i32;
    let sign = value & 0x80;
    let exponent = (value >> 4) & 0x07;
    let mantissa = value & 0x0F;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn mulaw_decode_slice(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| mulaw_decode(b)).collect()
}

pub fn mulaw_encode_slice(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| mulaw_encode(s)).collect()
}

/// Resamples PCM16 audio by linear interpolation.
///
/// Identity when the rates match. Output length is
/// `round(len / (in_rate / out_rate))`; the upper interpolation index
/// is clamped to the last valid sample.
pub fn resample_pcm16(samples: &[i16], in_rate: u32, out_rate: u32) -> Vec<i16> {
    if in_rate == out_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = src.floor() as usize;
        let idx = idx.min(samples.len() - 1);
        let next = (idx + 1).min(samples.len() - 1);
        let frac = src - src.floor();
        let sample = samples[idx] as f64 + (samples[next] as f64 - samples[idx] as f64) * frac;
        out.push(sample.round() as i16);
    }
    out
}

/// Encodes PCM16 samples as base64 little-endian bytes for transport.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes base64 little-endian PCM16 into samples. Malformed input
/// yields an empty buffer; one bad frame must never take down a call.
pub fn decode_pcm16_base64(fragment: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(bytes) => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
        Err(_) => {
            tracing::warn!("Failed to decode base64 PCM16 fragment");
            Vec::new()
        }
    }
}
