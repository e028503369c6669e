//! Pure sample conversions: float/PCM16, resampling, level metering,
//! and the transport-text encoding used to embed audio in JSON frames

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Convert f32 samples in [-1, 1] to signed 16-bit PCM.
///
/// The scale is intentionally asymmetric: negative samples map through
/// 32768 and non-negative samples through 32767, so -1.0 reaches the full
/// i16 range. This must be preserved for bit-exact behavior.
#[must_use]
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            #[allow(clippy::cast_possible_truncation)]
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert signed 16-bit PCM to f32 samples.
///
/// Divides uniformly by 32768 (not 32767) so zero amplitude maps to
/// exactly 0.0 with no discontinuity at the zero crossing.
#[must_use]
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Decode little-endian PCM16 bytes to f32 samples.
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_bytes_to_float(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Pack PCM16 samples into little-endian bytes
#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Resample by nearest-neighbor index mapping.
///
/// `src_index = floor(i * from_rate / to_rate)`; no interpolation or
/// anti-aliasing. A deliberate simplicity/latency tradeoff for speech,
/// not a high-fidelity resampler.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            let src = (i as f64 * ratio) as usize;
            samples[src.min(samples.len() - 1)]
        })
        .collect()
}

/// Root-mean-square level of a sample buffer, in [0, 1].
///
/// Used for UI metering and for the barge-in trigger.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Encode raw bytes as transport-safe text for embedding in JSON frames
#[must_use]
pub fn to_transport_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode transport text back to raw bytes.
///
/// # Errors
///
/// Returns [`crate::Error::Api`] if the text is not valid transport
/// encoding.
pub fn from_transport_text(text: &str) -> crate::Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| crate::Error::Api(format!("invalid transport text: {e}")))
}
