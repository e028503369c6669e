//! Device-owning audio engines and wake word listening
//!
//! Capture and playback each own one device exclusively; the wake word
//! listener runs independently of the remote session.

mod capture;
mod playback;
mod wake_word;

pub use capture::{AudioCaptureEngine, ChunkAssembler, ChunkCallback, ErrorCallback, LevelCallback};
pub use playback::{AudioPlaybackEngine, PlaybackCallback, PlaybackScheduler};
pub use wake_word::{
    ListenerState, SpeechRecognizer, TriggerCallback, WakeWordEngine, WakeWordListener,
};
