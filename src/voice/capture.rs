//! Audio capture from microphone
//!
//! Owns the input device, accumulates samples between flushes, and emits
//! one PCM16 chunk per flush interval at the session's input sample rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{AudioChunk, float_to_pcm16, pcm16_to_bytes, resample, rms_level};
use crate::{Error, Result};

/// Callback receiving one chunk per flush
pub type ChunkCallback = Arc<dyn Fn(AudioChunk) + Send + Sync>;
/// Callback receiving the RMS level of each raw device tick
pub type LevelCallback = Arc<dyn Fn(f32) + Send + Sync>;
/// Callback receiving device errors after acquisition
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Poll interval for the device thread's stop flag
const DEVICE_POLL: Duration = Duration::from_millis(50);

/// Accumulates device-rate samples and converts them to fixed-interval
/// PCM16 chunks at the target rate.
///
/// Pure buffering logic, kept separate from device ownership so chunking
/// behavior is testable without audio hardware.
pub struct ChunkAssembler {
    device_rate: u32,
    target_rate: u32,
    pending: Vec<f32>,
}

impl ChunkAssembler {
    /// Create an assembler converting `device_rate` input to
    /// `target_rate` chunks
    #[must_use]
    pub const fn new(device_rate: u32, target_rate: u32) -> Self {
        Self {
            device_rate,
            target_rate,
            pending: Vec::new(),
        }
    }

    /// Append one device tick's samples
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Number of pending device-rate samples
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain the pending buffer into one chunk: resample to the target
    /// rate, encode PCM16. Returns `None` when nothing accumulated.
    pub fn flush(&mut self, timestamp_ms: u64) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }

        let raw = std::mem::take(&mut self.pending);
        let resampled = resample(&raw, self.device_rate, self.target_rate);
        let data = pcm16_to_bytes(&float_to_pcm16(&resampled));

        Some(AudioChunk { data, timestamp_ms })
    }
}

/// Captures audio from the default input device and emits fixed-interval
/// chunks through a callback.
///
/// Mute drops device ticks without stopping the device. No automatic
/// retry on failure; retry policy belongs to the caller.
///
/// Echo cancellation and noise suppression cannot be requested
/// per-stream through cpal; any such processing comes from the platform
/// capture path.
pub struct AudioCaptureEngine {
    target_rate: u32,
    flush_interval: Duration,
    muted: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    assembler: Arc<Mutex<Option<ChunkAssembler>>>,
    device_thread: Option<std::thread::JoinHandle<()>>,
    flush_task: Option<tokio::task::JoinHandle<()>>,
}

impl AudioCaptureEngine {
    /// Create an idle engine targeting the given output sample rate
    #[must_use]
    pub fn new(target_rate: u32, flush_interval_ms: u64) -> Self {
        Self {
            target_rate,
            flush_interval: Duration::from_millis(flush_interval_ms),
            muted: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            assembler: Arc::new(Mutex::new(None)),
            device_thread: None,
            flush_task: None,
        }
    }

    /// Acquire the default input device and begin periodic flushing.
    ///
    /// Suspends until the device is acquired. The level callback fires per
    /// raw device tick, independent of flush cadence.
    ///
    /// Calling `start` while capture is already running is a no-op that
    /// keeps the original callbacks; [`Self::stop`] first to swap them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the device cannot be acquired; the
    /// engine is fully torn down before returning.
    pub async fn start(
        &mut self,
        on_chunk: ChunkCallback,
        on_level: LevelCallback,
        on_error: ErrorCallback,
    ) -> Result<()> {
        if self.device_thread.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<u32>>();
        let stop = Arc::clone(&self.stop);
        let muted = Arc::clone(&self.muted);
        let assembler = Arc::clone(&self.assembler);
        let tick_level = Arc::clone(&on_level);
        let tick_error = Arc::clone(&on_error);

        // cpal streams are !Send, so the stream lives on a dedicated
        // thread for the duration of the capture.
        let handle = std::thread::spawn(move || {
            let stream = match build_input_stream(&assembler, &muted, &tick_level, &tick_error) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(DEVICE_POLL);
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        });

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                on_error(Error::Audio(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let e = Error::Audio("capture thread exited during startup".to_string());
                let _ = handle.join();
                on_error(Error::Audio(e.to_string()));
                return Err(e);
            }
        };

        if let Ok(mut guard) = self.assembler.lock() {
            *guard = Some(ChunkAssembler::new(device_rate, self.target_rate));
        }
        self.device_thread = Some(handle);

        tracing::debug!(
            device_rate,
            target_rate = self.target_rate,
            interval_ms = self.flush_interval.as_millis(),
            "audio capture started"
        );

        // Periodic flush on a wall-clock interval
        let assembler = Arc::clone(&self.assembler);
        let interval = self.flush_interval;
        let started = Instant::now();
        self.flush_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let chunk = assembler.lock().ok().and_then(|mut guard| {
                    guard.as_mut().and_then(|a| {
                        let ts = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                        a.flush(ts)
                    })
                });
                if let Some(chunk) = chunk {
                    on_chunk(chunk);
                }
            }
        }));

        Ok(())
    }

    /// Mute or unmute without stopping the device
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        tracing::debug!(muted, "capture mute changed");
    }

    /// Check whether capture is muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Check whether the device is currently held
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.device_thread.is_some()
    }

    /// Release the device, flush timer, and pending buffer.
    ///
    /// Safe to call at any time, including mid-flush; idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.device_thread.take() {
            let _ = handle.join();
        }
        if let Ok(mut guard) = self.assembler.lock() {
            *guard = None;
        }
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default input device and start its stream.
///
/// Returns the live stream and the device's native sample rate.
fn build_input_stream(
    assembler: &Arc<Mutex<Option<ChunkAssembler>>>,
    muted: &Arc<AtomicBool>,
    on_level: &LevelCallback,
    on_error: &ErrorCallback,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels());
    let config = supported.config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "input device acquired"
    );

    let assembler = Arc::clone(assembler);
    let muted = Arc::clone(muted);
    let on_level = Arc::clone(on_level);
    let err_cb = Arc::clone(on_error);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Muted ticks are dropped entirely
                if muted.load(Ordering::SeqCst) {
                    return;
                }

                // Downmix to mono by taking the first channel of each frame
                let mono: Vec<f32> = if channels > 1 {
                    data.iter().step_by(channels).copied().collect()
                } else {
                    data.to_vec()
                };

                on_level(rms_level(&mono));

                if let Ok(mut guard) = assembler.lock() {
                    if let Some(a) = guard.as_mut() {
                        a.push(&mono);
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                err_cb(Error::Audio(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, device_rate))
}
