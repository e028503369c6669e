//! Tool registry and dispatch
//!
//! A tool is any value implementing [`Tool`]; calendar, task, and memory
//! logic live behind this boundary as opaque collaborators. The registry
//! validates name uniqueness at registration, not at call time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::join_all;

use crate::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse};
use crate::{Error, Result};

/// A named side-effecting operation callable by the remote model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a session
    fn name(&self) -> &str;

    /// Human-readable description sent in the tool declaration
    fn description(&self) -> &str;

    /// JSON-schema-like parameter description, if any
    fn parameters(&self) -> Option<serde_json::Value> {
        None
    }

    /// Execute with the given arguments.
    ///
    /// # Errors
    ///
    /// Any error is captured into the call's response; it never
    /// propagates past the dispatcher.
    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<String>;
}

/// Side-effecting actions a tool may take against the owning session
#[derive(Debug, Default)]
pub struct ToolContext {
    end_requested: AtomicBool,
}

impl ToolContext {
    /// Create a fresh context for one session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the orchestrator to end the session after this batch
    pub fn request_session_end(&self) {
        self.end_requested.store(true, Ordering::SeqCst);
    }

    /// Whether any tool has requested session end
    #[must_use]
    pub fn session_end_requested(&self) -> bool {
        self.end_requested.load(Ordering::SeqCst)
    }
}

/// Ordered, name-unique tool collection.
///
/// Lookup returns the first match, so earlier registrations (system
/// tools) take precedence over later ones (caller tools).
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if a tool with the same name is already
    /// registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if self.find(tool.name()).is_some() {
            return Err(Error::Tool(format!(
                "duplicate tool name: {}",
                tool.name()
            )));
        }
        tracing::debug!(tool = tool.name(), "tool registered");
        self.tools.push(tool);
        Ok(())
    }

    /// First tool with the given name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for the setup frame, in registration order
    #[must_use]
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute a batch of calls, yielding exactly one response per call.
    ///
    /// Independent calls run concurrently; each response is
    /// self-identifying by id, so intra-batch order carries no meaning.
    /// Execution errors and unknown names are captured into the
    /// response's `error` field and never block sibling calls.
    pub async fn dispatch(
        &self,
        calls: Vec<FunctionCall>,
        ctx: &ToolContext,
    ) -> Vec<FunctionResponse> {
        join_all(calls.iter().map(|call| self.dispatch_one(call, ctx))).await
    }

    async fn dispatch_one(&self, call: &FunctionCall, ctx: &ToolContext) -> FunctionResponse {
        let Some(tool) = self.find(&call.name) else {
            tracing::warn!(tool = %call.name, id = %call.id, "tool not found");
            return FunctionResponse::err(call, format!("tool not found: {}", call.name));
        };

        tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
        match tool.execute(call.args.clone(), ctx).await {
            Ok(result) => FunctionResponse::ok(call, result),
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "tool failed");
                FunctionResponse::err(call, e.to_string())
            }
        }
    }
}

/// System tool letting the model end the voice session
pub struct EndSessionTool;

#[async_trait]
impl Tool for EndSessionTool {
    fn name(&self) -> &str {
        "end_session"
    }

    fn description(&self) -> &str {
        "End the current voice session when the user says goodbye or asks to stop"
    }

    fn parameters(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {}
        }))
    }

    async fn execute(&self, _args: serde_json::Value, ctx: &ToolContext) -> Result<String> {
        ctx.request_session_end();
        Ok("session will end".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input"
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<String> {
            Ok(args["message"].as_str().unwrap_or_default().to_string())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<String> {
            Err(Error::Tool("deliberate failure".to_string()))
        }
    }

    fn call(id: &str, name: &str) -> FunctionCall {
        FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args: serde_json::json!({"message": "hi"}),
        }
    }

    #[test]
    fn registration_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        assert!(registry.register(Arc::new(EchoTool)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn declarations_follow_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EndSessionTool)).unwrap();
        registry.register(Arc::new(EchoTool)).unwrap();

        let declarations = registry.declarations();
        assert_eq!(declarations[0].name, "end_session");
        assert_eq!(declarations[1].name, "echo");
        assert!(declarations[0].parameters.is_some());
    }

    #[tokio::test]
    async fn batch_yields_one_response_per_call() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry.register(Arc::new(FailingTool)).unwrap();

        let ctx = ToolContext::new();
        let calls = vec![call("c1", "echo"), call("c2", "broken"), call("c3", "ghost")];
        let responses = registry.dispatch(calls, &ctx).await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].id, "c1");
        assert_eq!(responses[0].response.result, "hi");
        assert!(responses[0].response.error.is_none());

        assert_eq!(responses[1].id, "c2");
        assert_eq!(responses[1].response.result, "");
        assert!(
            responses[1]
                .response
                .error
                .as_deref()
                .unwrap()
                .contains("deliberate failure")
        );

        assert_eq!(responses[2].id, "c3");
        assert_eq!(
            responses[2].response.error.as_deref(),
            Some("tool not found: ghost")
        );
    }

    #[test]
    fn end_session_tool_flags_context() {
        let ctx = ToolContext::new();
        assert!(!ctx.session_end_requested());

        let tool = EndSessionTool;
        tokio_test::block_on(tool.execute(serde_json::Value::Null, &ctx)).unwrap();
        assert!(ctx.session_end_requested());
    }
}
