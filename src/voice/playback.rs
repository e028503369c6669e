//! Audio playback to speakers
//!
//! Gapless FIFO playback of decoded PCM chunks, with immediate clear for
//! barge-in interruption.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{AudioFormat, pcm16_bytes_to_float};
use crate::{Error, Result};

/// Notification fired when playback starts from idle or drains to idle
pub type PlaybackCallback = Arc<dyn Fn() + Send + Sync>;

/// Poll interval for the device thread's stop flag
const DEVICE_POLL: Duration = Duration::from_millis(50);

/// Tracks the gapless scheduling clock.
///
/// `next_play_time` is monotonically non-decreasing and never behind the
/// current clock; each entry starts exactly where the previous one ends,
/// so scheduled audio has no gap and no overlap.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_play_time: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler with the clock at zero
    #[must_use]
    pub const fn new() -> Self {
        Self { next_play_time: 0.0 }
    }

    /// Schedule an entry of `duration` seconds at time `now`.
    ///
    /// Returns the entry's start time. The first entry after idle starts
    /// at `now`; later entries start where the previous one ends.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        if self.next_play_time < now {
            self.next_play_time = now;
        }
        let start = self.next_play_time;
        self.next_play_time += duration;
        start
    }

    /// Reset the clock, as on interruption or teardown
    pub const fn reset(&mut self) {
        self.next_play_time = 0.0;
    }

    /// The time at which the next entry would begin
    #[must_use]
    pub const fn next_play_time(&self) -> f64 {
        self.next_play_time
    }
}

/// Queue state shared with the output device callback
struct PlaybackQueue {
    entries: VecDeque<Vec<f32>>,
    /// Read position within the head entry
    pos: usize,
}

struct Shared {
    queue: Mutex<PlaybackQueue>,
    scheduler: Mutex<PlaybackScheduler>,
    active: AtomicBool,
    on_start: Mutex<Option<PlaybackCallback>>,
    on_end: Mutex<Option<PlaybackCallback>>,
}

/// Plays decoded PCM chunks back-to-back on the default output device.
///
/// `enqueue` accepts raw PCM16 bytes in the engine's output format;
/// entries play in arrival order with no gap or overlap. `clear` empties
/// everything immediately for barge-in or teardown.
pub struct AudioPlaybackEngine {
    format: AudioFormat,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    device_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    started: Instant,
}

impl AudioPlaybackEngine {
    /// Create an engine for the given output format.
    ///
    /// The queue and scheduling clock work without a device; call
    /// [`Self::start_device`] to begin audible output.
    #[must_use]
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            shared: Arc::new(Shared {
                queue: Mutex::new(PlaybackQueue {
                    entries: VecDeque::new(),
                    pos: 0,
                }),
                scheduler: Mutex::new(PlaybackScheduler::new()),
                active: AtomicBool::new(false),
                on_start: Mutex::new(None),
                on_end: Mutex::new(None),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            device_thread: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Set the callback fired when playback starts from idle
    pub fn set_on_playback_start(&self, callback: PlaybackCallback) {
        if let Ok(mut guard) = self.shared.on_start.lock() {
            *guard = Some(callback);
        }
    }

    /// Set the callback fired when the queue drains to idle
    pub fn set_on_playback_end(&self, callback: PlaybackCallback) {
        if let Ok(mut guard) = self.shared.on_end.lock() {
            *guard = Some(callback);
        }
    }

    /// Acquire the default output device and begin draining the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if no suitable output device is available.
    pub fn start_device(&self) -> Result<()> {
        let mut thread_slot = self
            .device_thread
            .lock()
            .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;
        if thread_slot.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let sample_rate = self.format.sample_rate;

        // cpal streams are !Send; the stream lives on its own thread.
        let handle = std::thread::spawn(move || {
            let stream = match build_output_stream(&shared, sample_rate) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
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
            tracing::debug!("audio playback stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *thread_slot = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("playback thread exited during startup".to_string()))
            }
        }
    }

    /// Decode a PCM16 chunk and append it to the playback queue.
    ///
    /// Starts playback immediately when idle; later entries are scheduled
    /// contiguously after the in-flight one.
    pub fn enqueue(&self, pcm: &[u8]) {
        if pcm.len() < 2 {
            return;
        }

        let samples = pcm16_bytes_to_float(pcm);
        #[allow(clippy::cast_precision_loss)]
        let duration = samples.len() as f64 / f64::from(self.format.sample_rate);
        let now = self.started.elapsed().as_secs_f64();

        let start = self
            .shared
            .scheduler
            .lock()
            .map(|mut s| s.schedule(now, duration))
            .unwrap_or(now);

        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.entries.push_back(samples);
        }

        tracing::trace!(start, duration, "playback entry scheduled");

        if !self.shared.active.swap(true, Ordering::SeqCst) {
            if let Some(cb) = self.shared.on_start.lock().ok().and_then(|g| g.clone()) {
                cb();
            }
        }
    }

    /// Stop any in-flight entry, empty the queue, and reset the clock.
    ///
    /// Idempotent; safe to call while nothing is playing. Used for
    /// barge-in and session teardown.
    pub fn clear(&self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.entries.clear();
            queue.pos = 0;
        }
        if let Ok(mut scheduler) = self.shared.scheduler.lock() {
            scheduler.reset();
        }
        let was_active = self.shared.active.swap(false, Ordering::SeqCst);
        if was_active {
            tracing::debug!("playback cleared");
        }
    }

    /// Whether entries are queued or an entry is in flight
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// The scheduling clock's next start time, in seconds
    #[must_use]
    pub fn next_play_time(&self) -> f64 {
        self.shared
            .scheduler
            .lock()
            .map(|s| s.next_play_time())
            .unwrap_or(0.0)
    }

    /// Release the device and drop all queued audio
    pub fn stop(&self) {
        self.clear();
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.device_thread.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioPlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default output device at the engine's sample rate.
///
/// Prefers a mono config, falling back to stereo with the mono signal
/// duplicated across channels.
fn build_output_stream(shared: &Arc<Shared>, sample_rate: u32) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= cpal::SampleRate(sample_rate)
                && c.max_sample_rate() >= cpal::SampleRate(sample_rate)
        })
        .or_else(|| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= cpal::SampleRate(sample_rate)
                    && c.max_sample_rate() >= cpal::SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported.with_sample_rate(cpal::SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "output device acquired"
    );

    let shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut drained = false;
                if let Ok(mut queue) = shared.queue.lock() {
                    for frame in data.chunks_mut(channels) {
                        let sample = next_sample(&mut queue);
                        for out in frame.iter_mut() {
                            *out = sample.unwrap_or(0.0);
                        }
                        if sample.is_none() {
                            drained = true;
                        }
                    }
                }
                if drained && shared.active.swap(false, Ordering::SeqCst) {
                    if let Some(cb) = shared.on_end.lock().ok().and_then(|g| g.clone()) {
                        cb();
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Pull the next sample from the queue, advancing across entry
/// boundaries so consecutive entries play back-to-back.
fn next_sample(queue: &mut PlaybackQueue) -> Option<f32> {
    loop {
        let head = queue.entries.front()?;
        if queue.pos < head.len() {
            let sample = head[queue.pos];
            queue.pos += 1;
            return Some(sample);
        }
        queue.entries.pop_front();
        queue.pos = 0;
    }
}
