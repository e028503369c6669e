//! Shared test utilities

#![allow(dead_code)]

use cadence_voice::audio::{float_to_pcm16, pcm16_to_bytes};

/// Generate sine wave audio samples
#[must_use]
pub fn sine_samples(sample_rate: u32, frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
pub fn silence(sample_rate: u32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Encode float samples as raw PCM16 bytes
#[must_use]
pub fn as_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    pcm16_to_bytes(&float_to_pcm16(samples))
}
