//! Audio pipeline integration tests
//!
//! Tests sample conversion, chunking, and playback scheduling without
//! requiring audio hardware.

use cadence_voice::audio::{
    AudioFormat, float_to_pcm16, from_transport_text, pcm16_bytes_to_float, resample, rms_level,
    to_transport_text,
};
use cadence_voice::voice::{AudioPlaybackEngine, ChunkAssembler, PlaybackScheduler};

mod common;

#[test]
fn test_pcm16_conversion_extremes() {
    let pcm = float_to_pcm16(&[-1.0, 0.0, 1.0, -2.0, 2.0]);
    // Full-scale negative and positive map to the i16 extremes, and
    // out-of-range input clamps rather than wrapping.
    assert_eq!(pcm, vec![-32768, 0, 32767, -32768, 32767]);
}

#[test]
fn test_pcm16_roundtrip_tolerance() {
    let original = common::sine_samples(16_000, 440.0, 0.1, 0.8);
    let bytes = common::as_pcm16_bytes(&original);
    let restored = pcm16_bytes_to_float(&bytes);

    assert_eq!(restored.len(), original.len());
    for (a, b) in original.iter().zip(&restored) {
        assert!((a - b).abs() < 1.0 / 16_384.0, "{a} vs {b}");
    }
}

#[test]
fn test_resample_length_is_proportional() {
    for (from, to, len) in [(44_100, 16_000, 4410), (48_000, 16_000, 4800), (24_000, 24_000, 2400)] {
        let input: Vec<f32> = (0..len).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let output = resample(&input, from, to);
        let expected = (input.len() as f64 * f64::from(to) / f64::from(from)).round() as usize;
        assert_eq!(output.len(), expected, "{from} -> {to}");
    }
}

#[test]
fn test_resample_preserves_silence_and_level() {
    let quiet = common::silence(48_000, 0.1);
    assert!(resample(&quiet, 48_000, 16_000).iter().all(|s| *s == 0.0));

    let loud = common::sine_samples(48_000, 440.0, 0.1, 0.5);
    let down = resample(&loud, 48_000, 16_000);
    // RMS of a sine is amplitude / sqrt(2); resampling should not move it much
    let expected = 0.5 / std::f32::consts::SQRT_2;
    assert!((rms_level(&down) - expected).abs() < 0.05);
}

#[test]
fn test_transport_text_roundtrip() {
    let bytes = common::as_pcm16_bytes(&common::sine_samples(16_000, 440.0, 0.01, 0.3));
    let text = to_transport_text(&bytes);
    assert!(text.is_ascii());
    assert_eq!(from_transport_text(&text).unwrap(), bytes);

    assert!(from_transport_text("not valid base64!!!").is_err());
}

#[test]
fn test_assembler_produces_interval_sized_chunks() {
    let mut assembler = ChunkAssembler::new(48_000, 16_000);

    // Three 100ms flushes fed by uneven device ticks
    let tick = common::sine_samples(48_000, 440.0, 0.025, 0.5);
    let mut total_samples = 0;
    for flush in 0..3u64 {
        for _ in 0..4 {
            assembler.push(&tick);
        }
        let chunk = assembler.flush(flush * 100).expect("chunk");
        total_samples += chunk.data.len() / 2;
    }

    // 300ms at 16kHz, allowing rounding at each flush boundary
    assert!((4797..=4803).contains(&total_samples), "got {total_samples}");
}

#[test]
fn test_scheduler_entries_are_contiguous() {
    let mut scheduler = PlaybackScheduler::new();
    let first = scheduler.schedule(1.0, 0.25);
    let second = scheduler.schedule(1.01, 0.25);
    let third = scheduler.schedule(1.02, 0.25);

    assert!((first - 1.0).abs() < 1e-9);
    assert!((second - 1.25).abs() < 1e-9);
    assert!((third - 1.5).abs() < 1e-9);
}

#[test]
fn test_playback_queue_without_device() {
    // The queue and clock work with no output device attached
    let engine = AudioPlaybackEngine::new(AudioFormat::pcm16_mono(24_000));
    assert!(!engine.is_active());

    let chunk = common::as_pcm16_bytes(&common::sine_samples(24_000, 440.0, 0.1, 0.5));
    engine.enqueue(&chunk);
    engine.enqueue(&chunk);

    assert!(engine.is_active());
    // Two 100ms entries scheduled back to back
    assert!(engine.next_play_time() >= 0.2);
}

#[test]
fn test_playback_clear_empties_immediately() {
    let engine = AudioPlaybackEngine::new(AudioFormat::pcm16_mono(24_000));
    let chunk = common::as_pcm16_bytes(&common::sine_samples(24_000, 440.0, 0.5, 0.5));
    engine.enqueue(&chunk);
    assert!(engine.is_active());

    engine.clear();
    assert!(!engine.is_active());
    assert!(engine.next_play_time().abs() < 1e-9);

    // Idempotent on an empty queue
    engine.clear();
    assert!(!engine.is_active());
}

#[test]
fn test_playback_start_callback_fires_once_per_idle_period() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let engine = AudioPlaybackEngine::new(AudioFormat::pcm16_mono(24_000));
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    engine.set_on_playback_start(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let chunk = common::as_pcm16_bytes(&common::sine_samples(24_000, 440.0, 0.05, 0.5));
    engine.enqueue(&chunk);
    engine.enqueue(&chunk);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    engine.clear();
    engine.enqueue(&chunk);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_tiny_chunks_are_dropped() {
    let engine = AudioPlaybackEngine::new(AudioFormat::pcm16_mono(24_000));
    engine.enqueue(&[]);
    engine.enqueue(&[0x00]);
    assert!(!engine.is_active());
}
