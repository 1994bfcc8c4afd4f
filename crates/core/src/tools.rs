//! Tool invocation contract.
//!
//! Tool bodies (booking creation, availability lookup, ...) live
//! outside this workspace; sessions only depend on this trait. The
//! session manager awaits the executor and feeds the structured result
//! back into the live conversation.

use async_trait::async_trait;
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// A tool call requested by the model mid-conversation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

/// Default executor used until a real integration is wired in. It
/// answers every call with a structured "not available" result so the
/// round trip stays exercised end to end.
pub struct UnimplementedToolExecutor;

#[async_trait]
impl ToolExecutor for UnimplementedToolExecutor {
    async fn execute(&self, name: &str, _args: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "status": "unavailable",
            "message": format!("The tool '{name}' is not available on this workspace."),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unimplemented_executor_returns_structured_result() {
        let executor = UnimplementedToolExecutor;
        let result = executor
            .execute("create_booking", json!({"date": "2026-09-01"}))
            .await
            .unwrap();
        assert_eq!(result["status"], "unavailable");
        assert!(result["message"].as_str().unwrap().contains("create_booking"));
    }
}
