//! Configuration for voice sessions

/// Default Live API WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model identity for live sessions
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Session-level options: model identity, generation options, and
/// transcription streams
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// API key appended to the connect URL
    pub api_key: String,

    /// Model identity (e.g. `models/gemini-2.0-flash-live-001`)
    pub model: String,

    /// Voice name for synthesized output
    pub voice: String,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Request input (user speech) transcription from the remote side
    pub enable_input_transcription: bool,

    /// Request output (model speech) transcription from the remote side
    pub enable_output_transcription: bool,

    /// WebSocket endpoint; overridable for testing against a local server
    pub endpoint: String,
}

impl SessionOptions {
    /// Create options with defaults for everything but the API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            voice: "Aoede".to_string(),
            system_prompt: None,
            enable_input_transcription: true,
            enable_output_transcription: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Load options from `CADENCE_*` environment variables.
    ///
    /// Reads `CADENCE_API_KEY` (required), `CADENCE_MODEL`,
    /// `CADENCE_VOICE`, and `CADENCE_ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Api`] if the API key is missing.
    pub fn from_env() -> crate::Result<Self> {
        let api_key = std::env::var("CADENCE_API_KEY")
            .map_err(|_| crate::Error::Api("CADENCE_API_KEY not set".to_string()))?;

        let mut options = Self::new(api_key);
        if let Ok(model) = std::env::var("CADENCE_MODEL") {
            options.model = model;
        }
        if let Ok(voice) = std::env::var("CADENCE_VOICE") {
            options.voice = voice;
        }
        if let Ok(endpoint) = std::env::var("CADENCE_ENDPOINT") {
            options.endpoint = endpoint;
        }
        Ok(options)
    }
}

/// Audio pipeline tuning.
///
/// The barge-in threshold and the transcript repeat guard are heuristics
/// with no principled derivation; both are configurable rather than fixed.
#[derive(Debug, Clone, Copy)]
pub struct AudioOptions {
    /// Sample rate sent to the remote model (input leg)
    pub input_sample_rate: u32,

    /// Sample rate of synthesized audio from the remote model (output leg)
    pub output_sample_rate: u32,

    /// Wall-clock interval between capture flushes, in milliseconds
    pub flush_interval_ms: u64,

    /// RMS level above which local input interrupts remote playback
    pub barge_in_threshold: f32,

    /// Minimum length of a trailing identical-character run stripped from
    /// output transcript deltas
    pub repeat_guard_len: usize,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            flush_interval_ms: 100,
            barge_in_threshold: 0.05,
            repeat_guard_len: 6,
        }
    }
}
