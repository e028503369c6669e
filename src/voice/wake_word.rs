//! Wake word listening
//!
//! Watches finalized utterances from a continuously-restarting local
//! recognizer for a trigger phrase, independently of the remote session.
//! Energy-based segmentation decides when an utterance is finalized.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture::AudioCaptureEngine;
use crate::audio::{pcm16_bytes_to_float, rms_level};
use crate::{Error, Result};

/// Minimum RMS energy to consider a tick speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum accumulated speech before a segment counts (samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Trailing silence that finalizes an utterance (samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Callback invoked with the full recognized utterance on trigger match
pub type TriggerCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Listener lifecycle: `Stopped -> Listening <-> Paused -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Torn down; no recognizer running
    Stopped,
    /// Watching finalized utterances for the trigger phrase
    Listening,
    /// Recognizer kept alive but matches suppressed, e.g. while the
    /// remote session handles the triggering utterance
    Paused,
}

/// Watches for a trigger phrase in finalized utterances.
///
/// Audio segmentation and phrase matching are local; the recognizer
/// producing utterance text is external and feeds [`Self::on_utterance`].
pub struct WakeWordListener {
    trigger_phrase: String,
    state: ListenerState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    on_trigger: Option<TriggerCallback>,
}

impl WakeWordListener {
    /// Create a listener for the given trigger phrase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WakeWord`] if the phrase is empty.
    pub fn new(trigger_phrase: &str) -> Result<Self> {
        let normalized = trigger_phrase.to_lowercase().trim().to_string();
        if normalized.is_empty() {
            return Err(Error::WakeWord("trigger phrase is empty".to_string()));
        }

        tracing::debug!(trigger = %normalized, "wake word listener created");

        Ok(Self {
            trigger_phrase: normalized,
            state: ListenerState::Stopped,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            on_trigger: None,
        })
    }

    /// Set the callback fired when the trigger phrase is heard
    pub fn set_on_trigger(&mut self, callback: TriggerCallback) {
        self.on_trigger = Some(callback);
    }

    /// Begin listening; no-op when already listening
    pub fn start(&mut self) {
        if self.state == ListenerState::Stopped {
            self.state = ListenerState::Listening;
            self.speech_buffer.clear();
            self.silence_counter = 0;
        }
    }

    /// Suppress matching without discarding the recognizer
    pub fn pause(&mut self) {
        if self.state == ListenerState::Listening {
            self.state = ListenerState::Paused;
        }
    }

    /// Resume matching after a pause
    pub fn resume(&mut self) {
        if self.state == ListenerState::Paused {
            self.state = ListenerState::Listening;
            self.speech_buffer.clear();
            self.silence_counter = 0;
        }
    }

    /// Fully tear down; the listener must be restarted to match again
    pub fn stop(&mut self) {
        self.state = ListenerState::Stopped;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Feed raw samples; returns true when a speech segment finalized.
    ///
    /// A segment finalizes after enough speech followed by sustained
    /// silence; the caller then runs recognition on
    /// [`Self::take_speech_buffer`] and reports text via
    /// [`Self::on_utterance`].
    pub fn process(&mut self, samples: &[f32]) -> bool {
        if self.state != ListenerState::Listening {
            return false;
        }

        let is_speech = rms_level(samples) > ENERGY_THRESHOLD;

        if self.speech_buffer.is_empty() && !is_speech {
            return false;
        }

        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        if self.silence_counter > SILENCE_SAMPLES {
            if self.speech_buffer.len() > MIN_SPEECH_SAMPLES {
                tracing::debug!(samples = self.speech_buffer.len(), "speech segment finalized");
                return true;
            }
            // Too short to be an utterance; restart accumulation
            self.speech_buffer.clear();
            self.silence_counter = 0;
        }

        false
    }

    /// Take the accumulated speech samples, clearing the buffer
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        self.silence_counter = 0;
        std::mem::take(&mut self.speech_buffer)
    }

    /// Check a finalized utterance for the trigger phrase.
    ///
    /// Case-insensitive substring match. On match the listener pauses
    /// itself to avoid re-triggering while the utterance is handled, and
    /// the trigger callback receives the full utterance.
    pub fn on_utterance(&mut self, utterance: &str) -> bool {
        if self.state != ListenerState::Listening {
            return false;
        }

        if !utterance.to_lowercase().contains(&self.trigger_phrase) {
            return false;
        }

        tracing::info!(utterance, "trigger phrase detected");
        self.state = ListenerState::Paused;
        if let Some(cb) = &self.on_trigger {
            cb(utterance.to_string());
        }
        true
    }

    /// Report a recognizer error.
    ///
    /// "No signal" conditions are a normal idle state in continuous
    /// listening and are swallowed; anything else is surfaced to the
    /// caller, which decides whether to restart.
    pub fn on_recognizer_error(&self, error: &Error) -> Option<String> {
        let message = error.to_string();
        if is_no_signal(&message) {
            tracing::trace!("recognizer idle (no speech)");
            return None;
        }
        tracing::warn!(error = %message, "recognizer error");
        Some(message)
    }

    /// Current listener state
    #[must_use]
    pub const fn state(&self) -> ListenerState {
        self.state
    }

    /// The normalized trigger phrase
    #[must_use]
    pub fn trigger_phrase(&self) -> &str {
        &self.trigger_phrase
    }
}

/// Converts finalized speech segments to utterance text.
///
/// The implementation is caller-supplied; this crate ships no
/// recognizer of its own.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize one finalized speech segment.
    ///
    /// # Errors
    ///
    /// "No speech"/"no signal" errors are a normal idle condition in
    /// continuous listening; the engine swallows them and keeps
    /// listening. Other errors are logged and listening continues.
    async fn recognize(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Capture flush cadence for the wake word microphone path
const ENGINE_FLUSH_MS: u64 = 100;

/// Drives the full wake word loop: microphone capture, energy
/// segmentation, recognition, and phrase matching.
///
/// Runs continuously. A finalized segment without the trigger phrase
/// leaves the listener armed for the next one; on a match the listener
/// pauses itself and [`Self::resume`] re-arms it. Independent of any
/// remote session.
pub struct WakeWordEngine {
    listener: Arc<Mutex<WakeWordListener>>,
    recognizer: Arc<dyn SpeechRecognizer>,
    sample_rate: u32,
    capture: Option<AudioCaptureEngine>,
    pump_task: Option<tokio::task::JoinHandle<()>>,
}

impl WakeWordEngine {
    /// Create an engine around a listener and a recognizer
    #[must_use]
    pub fn new(
        listener: WakeWordListener,
        recognizer: Arc<dyn SpeechRecognizer>,
        sample_rate: u32,
    ) -> Self {
        Self {
            listener: Arc::new(Mutex::new(listener)),
            recognizer,
            sample_rate,
            capture: None,
            pump_task: None,
        }
    }

    /// Set the callback fired when the trigger phrase is heard
    pub fn set_on_trigger(&self, callback: TriggerCallback) {
        lock_listener(&self.listener).set_on_trigger(callback);
    }

    /// Acquire the microphone and run the recognition loop until
    /// [`Self::stop`]. No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the capture device cannot be acquired.
    pub async fn start(&mut self) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        lock_listener(&self.listener).start();

        let (samples_tx, mut samples_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let mut capture = AudioCaptureEngine::new(self.sample_rate, ENGINE_FLUSH_MS);
        capture
            .start(
                Arc::new(move |chunk| {
                    let _ = samples_tx.send(pcm16_bytes_to_float(&chunk.data));
                }),
                Arc::new(|_| {}),
                Arc::new(|e| tracing::warn!(error = %e, "wake word capture error")),
            )
            .await?;

        let listener = Arc::clone(&self.listener);
        let recognizer = Arc::clone(&self.recognizer);
        let sample_rate = self.sample_rate;
        self.pump_task = Some(tokio::spawn(async move {
            while let Some(samples) = samples_rx.recv().await {
                recognize_segment(&listener, &recognizer, &samples, sample_rate).await;
            }
        }));

        self.capture = Some(capture);
        tracing::debug!(sample_rate, "wake word engine started");
        Ok(())
    }

    /// Feed samples directly, bypassing the capture device.
    ///
    /// Runs the same segment cycle as the live microphone path.
    pub async fn feed(&self, samples: &[f32]) {
        recognize_segment(&self.listener, &self.recognizer, samples, self.sample_rate).await;
    }

    /// Suppress matching without releasing the microphone
    pub fn pause(&self) {
        lock_listener(&self.listener).pause();
    }

    /// Re-arm matching after a pause or a handled trigger
    pub fn resume(&self) {
        lock_listener(&self.listener).resume();
    }

    /// Release the microphone and tear the loop down
    pub fn stop(&mut self) {
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        lock_listener(&self.listener).stop();
    }

    /// Current listener state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        lock_listener(&self.listener).state()
    }
}

impl Drop for WakeWordEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One cycle of the loop: segment, recognize when finalized, match
async fn recognize_segment(
    listener: &Arc<Mutex<WakeWordListener>>,
    recognizer: &Arc<dyn SpeechRecognizer>,
    samples: &[f32],
    sample_rate: u32,
) {
    let segment = {
        let mut guard = lock_listener(listener);
        if !guard.process(samples) {
            return;
        }
        guard.take_speech_buffer()
    };

    match recognizer.recognize(&segment, sample_rate).await {
        Ok(text) => {
            lock_listener(listener).on_utterance(&text);
        }
        Err(e) => {
            lock_listener(listener).on_recognizer_error(&e);
        }
    }
}

fn lock_listener(listener: &Arc<Mutex<WakeWordListener>>) -> MutexGuard<'_, WakeWordListener> {
    listener.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recognizer errors that just mean silence on the line
fn is_no_signal(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("no speech") || m.contains("no signal") || m.contains("no-speech")
}
