//! Tool invocation against sessions.

use crate::bridge::Bridge;
use crate::call_log::CallLog;
use crate::catalog::{strip_routing_prefix, OperationCatalog};
use crate::error::ManagerError;
use crate::remote::JsonObject;
use crate::scenario::{LoadOutcome, ScenarioLoader, LOAD_SCENARIO};
use crate::session::SessionRegistry;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Operation arguments as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Structured(JsonObject),
    /// Serialized JSON object; parsed before dispatch.
    Text(String),
}

impl ToolArguments {
    pub fn into_object(self) -> Result<JsonObject, ManagerError> {
        match self {
            Self::Structured(map) => Ok(map),
            Self::Text(text) if text.trim().is_empty() => Ok(JsonObject::new()),
            Self::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(ManagerError::MalformedArguments(format!(
                    "expected a JSON object, got {other}"
                ))),
                Err(e) => Err(ManagerError::MalformedArguments(e.to_string())),
            },
        }
    }
}

impl From<JsonObject> for ToolArguments {
    fn from(map: JsonObject) -> Self {
        Self::Structured(map)
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(map),
            Value::Null => Self::Structured(JsonObject::new()),
            Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<&str> for ToolArguments {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ToolArguments {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Remote reply text plus a best-effort JSON reading of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResult {
    /// The payload exactly as the server returned it.
    pub raw: String,
    /// `raw` parsed as JSON, or `raw` as a JSON string if it does not parse.
    pub value: Value,
}

impl NormalizedResult {
    pub fn from_text(raw: String) -> Self {
        let value = serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
        Self { raw, value }
    }

    fn from_outcome(outcome: &LoadOutcome) -> Self {
        Self {
            raw: outcome.to_string(),
            value: serde_json::to_value(outcome).unwrap_or(Value::Null),
        }
    }
}

/// Routes operation calls to sessions through the bridge.
pub struct ToolInvoker {
    registry: Arc<SessionRegistry>,
    catalog: Arc<OperationCatalog>,
    loader: Arc<ScenarioLoader>,
    bridge: Bridge,
    call_log: Arc<CallLog>,
    timeout: Option<Duration>,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<SessionRegistry>,
        catalog: Arc<OperationCatalog>,
        loader: Arc<ScenarioLoader>,
        bridge: Bridge,
        call_log: Arc<CallLog>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            catalog,
            loader,
            bridge,
            call_log,
            timeout,
        }
    }

    /// Run `operation_name` against `session_id`.
    ///
    /// `operation_name` may carry a `<group>-` routing prefix. Any operation
    /// whose name contains `load_scenario` is handed to the scenario loader so
    /// it keeps its load-once semantics.
    pub fn invoke(
        &self,
        session_id: &str,
        operation_name: &str,
        arguments: impl Into<ToolArguments>,
    ) -> Result<NormalizedResult, ManagerError> {
        let arguments = arguments.into().into_object()?;
        let operation = strip_routing_prefix(operation_name).to_string();

        if is_load_operation(&operation) {
            let (state, extra) = split_scenario_arguments(arguments);
            let outcome = self.loader.load_with(session_id, state, extra, false)?;
            return Ok(NormalizedResult::from_outcome(&outcome));
        }

        let (handle, ready) = self.registry.get_or_create(session_id)?;
        if !ready {
            if self.catalog.is_stateless(&handle.key().group) {
                self.registry.mark_ready(session_id);
            } else {
                debug!(session_id = %session_id, tool = %operation, "Calling a session with no scenario loaded");
            }
        }

        let call_log = self.call_log.clone();
        let logged_name = operation.clone();
        let result = self.bridge.submit(
            async move {
                let mut client = handle.lock_client().await;
                let logged_args = Value::Object(arguments.clone());
                let text = client.call(&operation, arguments).await?;
                call_log.record_tool(handle.id(), &operation, logged_args, &text);
                Ok(text)
            },
            self.timeout,
        );

        match &result {
            Ok(text) => debug!(session_id = %session_id, tool = %logged_name, result = %text, "Tool executed"),
            Err(ManagerError::RejectedBeforeExecution(e)) => {
                warn!(session_id = %session_id, tool = %logged_name, error = %e, "Tool rejected before execution")
            }
            Err(e) => warn!(session_id = %session_id, tool = %logged_name, error = %e, "Tool raised an unexpected error"),
        }
        result.map(NormalizedResult::from_text)
    }
}

fn is_load_operation(operation: &str) -> bool {
    operation.contains(LOAD_SCENARIO)
}

/// `{"scenario": {...}, ...rest}` loads the inner object and forwards the
/// rest; any other shape is the scenario itself.
fn split_scenario_arguments(mut arguments: JsonObject) -> (Value, JsonObject) {
    match arguments.remove("scenario") {
        Some(scenario @ Value::Object(_)) => (scenario, arguments),
        Some(other) => {
            arguments.insert("scenario".to_string(), other);
            (Value::Object(arguments), JsonObject::new())
        }
        None => (Value::Object(arguments), JsonObject::new()),
    }
}
