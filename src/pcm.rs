//! PCM frame codec
//!
//! Converts between floating point samples and the 16-bit little-endian PCM
//! representation the Live API speaks, plus the base64 text encoding used on
//! the wire.

use crate::events::MediaEnvelope;
use base64::engine::general_purpose;
use base64::Engine;

/// Microphone audio sent to the endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Synthesized speech received from the endpoint.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Error decoding an inbound PCM payload
#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A block of quantized samples. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioChunk {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Packed little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Wrap the chunk as an `audio/pcm;rate=N` envelope.
    pub fn to_envelope(&self) -> MediaEnvelope {
        MediaEnvelope::new(
            general_purpose::STANDARD.encode(self.to_le_bytes()),
            pcm_mime_type(self.sample_rate),
        )
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Quantize one sample. Negative values scale by 32768, the rest by 32767.
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn encode_samples(samples: &[f32], sample_rate: u32) -> AudioChunk {
    AudioChunk {
        samples: samples.iter().copied().map(quantize).collect(),
        sample_rate,
    }
}

/// Encode a capture block straight to a wire envelope.
pub fn encode_outbound(samples: &[f32], sample_rate: u32) -> MediaEnvelope {
    encode_samples(samples, sample_rate).to_envelope()
}

/// Reverse mapping: every 16-bit sample divided by 32768.
///
/// A trailing odd byte is ignored; the transport delivers whole chunks.
pub fn decode_inbound(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

pub fn decode_base64(data: &str) -> Result<Vec<f32>, PcmError> {
    let bytes = general_purpose::STANDARD.decode(data)?;
    Ok(decode_inbound(&bytes))
}
