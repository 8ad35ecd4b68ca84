//! MCP client over stdio child processes, backed by `rmcp`.
//!
//! Replies are inspected through their serialized JSON form (`content`,
//! `isError`, `structuredContent`) so the decoding stays independent of the
//! exact `rmcp` model types.

use super::{Connector, JsonObject, OperationSchema, ToolClient};
use crate::config::GroupLocator;
use crate::error::RemoteError;
use async_trait::async_trait;
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Launches one MCP server process per connection.
#[derive(Debug, Clone)]
pub struct McpConnector {
    python: String,
}

impl McpConnector {
    /// `python` is the interpreter used for `.py` locators without an explicit command.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn command_for(&self, locator: &GroupLocator) -> Command {
        let path = &locator.local_path;
        let program = match locator.command.as_deref() {
            Some(program) => Some(program.to_string()),
            None => match path.extension().and_then(|e| e.to_str()) {
                Some("py") => Some(self.python.clone()),
                Some("js") | Some("mjs") => Some("node".to_string()),
                _ => None,
            },
        };

        let mut cmd = match program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.args(&locator.args).arg(path);
                cmd
            }
            None => {
                let mut cmd = Command::new(path);
                cmd.args(&locator.args);
                cmd
            }
        };
        cmd.stderr(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

impl Default for McpConnector {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PYTHON)
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(&self, locator: &GroupLocator) -> Result<Box<dyn ToolClient>, RemoteError> {
        debug!(path = %locator.local_path.display(), "Spawning MCP server");
        let transport = TokioChildProcess::new(self.command_for(locator))
            .map_err(|e| RemoteError::Connect(format!("{}: {}", locator.local_path.display(), e)))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| RemoteError::Connect(format!("{}: {}", locator.local_path.display(), e)))?;
        Ok(Box::new(McpToolClient { service }))
    }
}

/// A live MCP session with one server process.
pub struct McpToolClient {
    service: RunningService<RoleClient, ()>,
}

#[async_trait]
impl ToolClient for McpToolClient {
    async fn list_operations(&mut self) -> Result<Vec<OperationSchema>, RemoteError> {
        let tools = self.service.list_all_tools().await.map_err(service_error)?;
        tools
            .iter()
            .map(|tool| {
                let value =
                    serde_json::to_value(tool).map_err(|e| RemoteError::Unexpected(e.to_string()))?;
                operation_from_tool(&value)
            })
            .collect()
    }

    async fn call(&mut self, name: &str, arguments: JsonObject) -> Result<String, RemoteError> {
        let params = serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .map_err(|e| RemoteError::Unexpected(format!("cannot build request: {e}")))?;
        let result = self.service.call_tool(params).await.map_err(service_error)?;
        let reply =
            serde_json::to_value(&result).map_err(|e| RemoteError::Unexpected(e.to_string()))?;
        decode_reply(&reply)
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        self.service
            .cancel()
            .await
            .map(|_| ())
            .map_err(|e| RemoteError::Unexpected(format!("close failed: {e}")))
    }
}

fn service_error(e: ServiceError) -> RemoteError {
    match e {
        ServiceError::McpError(data) => RemoteError::Rejected(data.message.to_string()),
        other => RemoteError::Unexpected(other.to_string()),
    }
}

fn operation_from_tool(tool: &Value) -> Result<OperationSchema, RemoteError> {
    let name = tool
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::Unexpected("tool without a name".into()))?;
    Ok(OperationSchema {
        name: name.to_string(),
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        input_schema: tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
    })
}

/// First text content of a `tools/call` reply; an `isError` reply is a rejection.
fn decode_reply(reply: &Value) -> Result<String, RemoteError> {
    let text = reply
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .find_map(|item| item.get("text").and_then(Value::as_str))
        })
        .map(str::to_string)
        .or_else(|| {
            reply
                .get("structuredContent")
                .filter(|v| !v.is_null())
                .map(Value::to_string)
        });

    let is_error = reply
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match (is_error, text) {
        (true, text) => Err(RemoteError::Rejected(
            text.unwrap_or_else(|| "tool reported an error".to_string()),
        )),
        (false, Some(text)) => Ok(text),
        (false, None) => Err(RemoteError::Unexpected("reply carried no content".into())),
    }
}
