//! Sample encodings and per-block peak extraction
//!
//! Capture callbacks hand over raw byte blocks; the extractor reduces each
//! block to the largest absolute sample it contains, in the encoding's own
//! units. Normalization to full scale happens later, in the aggregator.

use serde::{Deserialize, Serialize};

/// Layout of the samples inside a raw audio block. All variants are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SampleEncoding {
    /// IEEE 754 single precision, full scale at 1.0
    Float32,
    /// Signed 16-bit integer PCM
    Pcm16,
    /// Packed signed 24-bit integer PCM, three bytes per sample
    Pcm24,
    /// Signed 32-bit integer PCM
    Pcm32,
}

impl SampleEncoding {
    /// Bytes occupied by one sample
    pub fn width(self) -> usize {
        match self {
            SampleEncoding::Float32 => 4,
            SampleEncoding::Pcm16 => 2,
            SampleEncoding::Pcm24 => 3,
            SampleEncoding::Pcm32 => 4,
        }
    }

    /// Magnitude of a full-scale sample, the divisor that maps peaks onto [0, 1]
    pub fn full_scale(self) -> f64 {
        match self {
            SampleEncoding::Float32 => 1.0,
            SampleEncoding::Pcm16 => 32_768.0,
            SampleEncoding::Pcm24 => 8_388_608.0,
            SampleEncoding::Pcm32 => 2_147_483_648.0,
        }
    }

    /// The cpal sample format delivering this layout, if cpal has one
    pub fn cpal_format(self) -> Option<cpal::SampleFormat> {
        match self {
            SampleEncoding::Float32 => Some(cpal::SampleFormat::F32),
            SampleEncoding::Pcm16 => Some(cpal::SampleFormat::I16),
            SampleEncoding::Pcm32 => Some(cpal::SampleFormat::I32),
            // cpal has no packed 24-bit format
            SampleEncoding::Pcm24 => None,
        }
    }

    /// The layout of a cpal sample format, for drivers that dictate their own
    pub fn from_cpal(format: cpal::SampleFormat) -> Option<Self> {
        match format {
            cpal::SampleFormat::F32 => Some(SampleEncoding::Float32),
            cpal::SampleFormat::I16 => Some(SampleEncoding::Pcm16),
            cpal::SampleFormat::I32 => Some(SampleEncoding::Pcm32),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SampleEncoding::Float32 => "32-bit float",
            SampleEncoding::Pcm16 => "16-bit PCM",
            SampleEncoding::Pcm24 => "24-bit PCM",
            SampleEncoding::Pcm32 => "32-bit PCM",
        };
        f.write_str(name)
    }
}

/// One block of raw audio as delivered by a capture callback.
///
/// Borrowed for the duration of the callback only.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    bytes: &'a [u8],
    encoding: SampleEncoding,
}

impl<'a> AudioBlock<'a> {
    /// Wrap the recorded bytes of a buffer
    pub fn new(bytes: &'a [u8], encoding: SampleEncoding) -> Self {
        Self { bytes, encoding }
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// The valid bytes, trailing partial sample included
    pub fn recorded(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Largest absolute sample of the block, in the encoding's units.
///
/// A trailing partial sample is ignored. An empty block yields 0, and so do
/// non-finite float samples.
pub fn extract(block: AudioBlock<'_>) -> f32 {
    let bytes = block.recorded();
    match block.encoding() {
        SampleEncoding::Float32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]).abs())
            .filter(|s| s.is_finite())
            .fold(0.0f32, f32::max),
        SampleEncoding::Pcm16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]).unsigned_abs())
            .max()
            .map_or(0.0, f32::from),
        SampleEncoding::Pcm24 => bytes
            .chunks_exact(3)
            .map(|c| decode_pcm24([c[0], c[1], c[2]]).unsigned_abs())
            .max()
            .map_or(0.0, |m| m as f32),
        SampleEncoding::Pcm32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]).unsigned_abs())
            .max()
            .map_or(0.0, |m| m as f32),
    }
}

/// Peak of one channel of an interleaved block, as a float on the [0, 1] scale.
///
/// Used where the driver picks the sample layout, so the result no longer
/// depends on it. A trailing partial frame is ignored.
pub fn extract_channel(block: AudioBlock<'_>, channels: usize, channel: usize) -> f32 {
    if channels == 0 || channel >= channels {
        return 0.0;
    }
    let encoding = block.encoding();
    let width = encoding.width();
    let start = channel * width;
    let peak = block
        .recorded()
        .chunks_exact(width * channels)
        .map(|frame| extract(AudioBlock::new(&frame[start..start + width], encoding)))
        .fold(0.0f32, f32::max);
    (f64::from(peak) / encoding.full_scale()) as f32
}

/// Reassemble a little-endian 24-bit sample and sign-extend bit 23
#[inline]
pub fn decode_pcm24(bytes: [u8; 3]) -> i32 {
    let raw = i32::from(bytes[0]) | (i32::from(bytes[1]) << 8) | (i32::from(bytes[2]) << 16);
    if raw & 0x80_0000 != 0 {
        raw | !0xFF_FFFF
    } else {
        raw
    }
}
