//! Audio format and chunk value types

/// Describes one leg of a session's audio (input or output).
///
/// Immutable per session leg; the input and output legs commonly differ
/// (16 kHz in, 24 kHz out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count (mono throughout this system)
    pub channels: u16,
    /// Bits per sample
    pub bit_depth: u16,
}

impl AudioFormat {
    /// Mono 16-bit PCM at the given rate
    #[must_use]
    pub const fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Bytes of PCM data per second for this format
    #[must_use]
    pub const fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bit_depth as u32 / 8)
    }

    /// Duration in milliseconds of a raw PCM byte buffer in this format
    #[must_use]
    pub const fn duration_ms(&self, byte_len: usize) -> u64 {
        (byte_len as u64 * 1000) / self.bytes_per_second() as u64
    }

    /// MIME-style tag describing this format on the wire,
    /// e.g. `audio/pcm;rate=16000`
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// One unit of captured audio.
///
/// Produced by the capture engine, consumed exactly once by the outbound
/// sender; never retained after send.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw little-endian PCM16 bytes
    pub data: Vec<u8>,
    /// Monotonic capture timestamp in milliseconds
    pub timestamp_ms: u64,
}
