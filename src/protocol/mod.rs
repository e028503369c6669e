//! Wire protocol for the persistent session connection

mod client;
pub mod frames;

pub use client::{SessionEvent, SessionProtocolClient, TranscriptKind};
pub use frames::{
    ConversationTurn, FunctionCall, FunctionDeclaration, FunctionResponse, FunctionResult, Role,
    strip_trailing_repeats,
};
