//! Error types for the Cadence voice client

use thiserror::Error;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice session subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// Transport could not open, or closed before setup acknowledgment.
    /// Fatal to the current session; never retried internally.
    #[error("connection error: {0}")]
    Connection(String),

    /// Audio device acquisition or playback failure
    #[error("audio error: {0}")]
    Audio(String),

    /// Misconfiguration or an operation attempted in the wrong
    /// connection state; rejected synchronously
    #[error("api error: {0}")]
    Api(String),

    /// Tool execution failure. Captured per-call into the corresponding
    /// function response; never propagated past the orchestrator.
    #[error("tool error: {0}")]
    Tool(String),

    /// Wake word listener error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
