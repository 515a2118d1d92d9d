//! Canonical PCM WAV layout: 44-byte header with `RIFF`/`WAVE`/`fmt `/`data`
//! chunks followed by 16-bit little-endian samples.

use thiserror::Error;

pub const HEADER_LEN: usize = 44;
const PCM_FORMAT: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WavError {
    #[error("wav too short: {0} bytes")]
    TooShort(usize),
    #[error("missing {0} chunk id")]
    BadChunk(&'static str),
    #[error("unsupported wav format {format} with {bits} bits per sample")]
    Unsupported { format: u16, bits: u16 },
}

/// Fields of a canonical 44-byte PCM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, WavError> {
        if bytes.len() < HEADER_LEN {
            return Err(WavError::TooShort(bytes.len()));
        }
        if &bytes[0..4] != b"RIFF" {
            return Err(WavError::BadChunk("RIFF"));
        }
        if &bytes[8..12] != b"WAVE" {
            return Err(WavError::BadChunk("WAVE"));
        }
        if &bytes[12..16] != b"fmt " {
            return Err(WavError::BadChunk("fmt "));
        }
        if &bytes[36..40] != b"data" {
            return Err(WavError::BadChunk("data"));
        }
        let format = u16_at(bytes, 20);
        let bits_per_sample = u16_at(bytes, 34);
        if format != PCM_FORMAT || bits_per_sample != BITS_PER_SAMPLE {
            return Err(WavError::Unsupported {
                format,
                bits: bits_per_sample,
            });
        }
        Ok(Self {
            channels: u16_at(bytes, 22),
            sample_rate: u32_at(bytes, 24),
            bits_per_sample,
            data_len: u32_at(bytes, 40),
        })
    }

    /// Duration of the payload described by the header.
    pub fn duration_secs(&self) -> f64 {
        let frame = u32::from(self.channels) * u32::from(self.bits_per_sample / 8);
        if frame == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        f64::from(self.data_len / frame) / f64::from(self.sample_rate)
    }
}

/// Encode interleaved PCM16 samples as a WAV byte buffer.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
