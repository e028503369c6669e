//! Session orchestration and the tool-execution boundary

mod orchestrator;
mod tools;

pub use orchestrator::{ConnectionState, SessionObserver, VoiceSessionOrchestrator};
pub use tools::{EndSessionTool, Tool, ToolContext, ToolRegistry};
