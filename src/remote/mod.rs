//! Remote tool protocol seam.
//!
//! The manager depends on exactly four capabilities of a tool server:
//! connect to a locator, list its operations, invoke an operation, and close
//! the connection. [`Connector`] and [`ToolClient`] capture those; [`mcp`]
//! implements them over MCP stdio child processes.

pub mod mcp;

use crate::config::GroupLocator;
use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use mcp::McpConnector;

/// JSON object passed as operation arguments.
pub type JsonObject = Map<String, Value>;

/// Name, description and argument schema of one remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A connected tool server.
///
/// Implementations are driven only from the bridge worker, one call at a time.
#[async_trait]
pub trait ToolClient: Send {
    async fn list_operations(&mut self) -> Result<Vec<OperationSchema>, RemoteError>;

    /// Invoke `name` and return the first text payload of the reply.
    async fn call(&mut self, name: &str, arguments: JsonObject) -> Result<String, RemoteError>;

    async fn close(self: Box<Self>) -> Result<(), RemoteError>;
}

/// Opens connections to tool servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, locator: &GroupLocator) -> Result<Box<dyn ToolClient>, RemoteError>;
}
