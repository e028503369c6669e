//! Cadence - real-time voice session client for multimodal AI models
//!
//! This library implements the real-time voice subsystem of a
//! conversational assistant:
//! - Audio capture with fixed-interval chunking and mute
//! - Gapless low-latency playback with barge-in interruption
//! - A framed message protocol over one persistent connection
//! - Tool-call dispatch with per-call response correlation
//! - Wake word listening independent of the remote session
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Application                        │
//! │   observer callbacks  │  tools  │  session control   │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │             VoiceSessionOrchestrator                  │
//! │   state machine  │  tool dispatch  │  barge-in       │
//! └──────┬─────────────────┬──────────────────┬──────────┘
//!        │                 │                  │
//! ┌──────▼──────┐  ┌───────▼────────┐  ┌──────▼─────────┐
//! │   Capture   │  │ ProtocolClient │  │    Playback    │
//! │ mic chunks  │  │  wire frames   │  │ gapless queue  │
//! └─────────────┘  └───────┬────────┘  └────────────────┘
//!                          │
//!                 ┌────────▼────────┐
//!                 │  Remote model   │
//!                 └─────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod voice;

pub use config::{AudioOptions, SessionOptions};
pub use error::{Error, Result};
pub use protocol::{
    ConversationTurn, FunctionCall, FunctionDeclaration, FunctionResponse, Role, SessionEvent,
    SessionProtocolClient, TranscriptKind,
};
pub use session::{
    ConnectionState, EndSessionTool, SessionObserver, Tool, ToolContext, ToolRegistry,
    VoiceSessionOrchestrator,
};
pub use voice::{
    AudioCaptureEngine, AudioPlaybackEngine, SpeechRecognizer, WakeWordEngine, WakeWordListener,
};
