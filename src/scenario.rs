//! Scenario loading with optional verification.
//!
//! A scenario is applied once per session through the server's
//! `load_scenario` operation. With verification, the server is asked to
//! `save_scenario` straight afterwards and the echo must equal what was loaded
//! before the session counts as ready.

use crate::bridge::Bridge;
use crate::call_log::CallLog;
use crate::error::{ManagerError, RemoteError};
use crate::remote::JsonObject;
use crate::session::{SessionHandle, SessionRegistry};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LOAD_SCENARIO: &str = "load_scenario";
pub const SAVE_SCENARIO: &str = "save_scenario";

/// Result of a [`ScenarioLoader::load`] call that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The scenario was applied and the session is now ready.
    Loaded { message: String, verified: bool },
    /// The session was already ready; nothing was sent.
    AlreadyInitialized,
    /// The scenario was empty; nothing was sent and the session stays unready.
    EmptyScenario,
    /// The load call succeeded but the saved state differs from what was
    /// loaded (or could not be read back). The session stays unready.
    VerificationMismatch { expected: Value, saved: Value },
}

impl LoadOutcome {
    /// Whether the session is ready after this outcome.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Loaded { .. } | Self::AlreadyInitialized)
    }
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded { message, .. } => write!(f, "{message}"),
            Self::AlreadyInitialized => {
                write!(f, "This client is already initialized. Skipping...")
            }
            Self::EmptyScenario => write!(f, "No scenario provided. Skipping..."),
            Self::VerificationMismatch { .. } => write!(
                f,
                "Load scenario failed. The loaded scenario mismatch with saved scenario."
            ),
        }
    }
}

/// Applies initial state to sessions.
pub struct ScenarioLoader {
    registry: Arc<SessionRegistry>,
    bridge: Bridge,
    call_log: Arc<CallLog>,
    timeout: Option<Duration>,
}

impl ScenarioLoader {
    pub fn new(
        registry: Arc<SessionRegistry>,
        bridge: Bridge,
        call_log: Arc<CallLog>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            bridge,
            call_log,
            timeout,
        }
    }

    /// Load `initial_state` into `session_id`, creating the session if needed.
    pub fn load(
        &self,
        session_id: &str,
        initial_state: Value,
        verify: bool,
    ) -> Result<LoadOutcome, ManagerError> {
        self.load_with(session_id, initial_state, JsonObject::new(), verify)
    }

    /// Like [`load`](Self::load), passing `extra` arguments (e.g.
    /// `long_context`) to the remote load operation alongside the scenario.
    pub fn load_with(
        &self,
        session_id: &str,
        initial_state: Value,
        extra: JsonObject,
        verify: bool,
    ) -> Result<LoadOutcome, ManagerError> {
        let (handle, ready) = self.registry.get_or_create(session_id)?;
        if ready {
            info!(session_id = %session_id, "Session already initialized, skipping load");
            return Ok(LoadOutcome::AlreadyInitialized);
        }
        if is_empty_scenario(&initial_state) {
            debug!(session_id = %session_id, "Empty scenario, skipping load");
            return Ok(LoadOutcome::EmptyScenario);
        }

        let outcome = self.bridge.submit(
            apply_scenario(handle, initial_state, extra, verify, self.call_log.clone()),
            self.timeout,
        );
        match &outcome {
            Ok(LoadOutcome::Loaded { verified, .. }) => {
                info!(session_id = %session_id, verified, "Scenario loaded")
            }
            Ok(LoadOutcome::VerificationMismatch { .. }) => {
                warn!(session_id = %session_id, "Loaded scenario does not match saved scenario")
            }
            Ok(_) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "Scenario load failed"),
        }
        outcome
    }
}

fn is_empty_scenario(state: &Value) -> bool {
    match state {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Runs on the bridge worker with the session's client held for the whole
/// sequence, so concurrent loaders of one session send at most one load.
async fn apply_scenario(
    handle: SessionHandle,
    state: Value,
    mut arguments: JsonObject,
    verify: bool,
    call_log: Arc<CallLog>,
) -> Result<LoadOutcome, ManagerError> {
    let mut client = handle.lock_client().await;
    if handle.is_ready() {
        return Ok(LoadOutcome::AlreadyInitialized);
    }

    arguments.insert("scenario".to_string(), state.clone());
    let logged_args = Value::Object(arguments.clone());
    let message = client
        .call(LOAD_SCENARIO, arguments)
        .await
        .map_err(|e| match e {
            closed @ RemoteError::Closed(_) => closed.into(),
            other => ManagerError::LoadFailed(other.to_string()),
        })?;
    call_log.record_tool(handle.id(), LOAD_SCENARIO, logged_args, &message);

    if !verify {
        handle.mark_ready();
        return Ok(LoadOutcome::Loaded {
            message,
            verified: false,
        });
    }

    let saved = match client.call(SAVE_SCENARIO, JsonObject::new()).await {
        Ok(text) => text,
        Err(e) => {
            debug!(session_id = %handle.id(), error = %e, "save_scenario failed during verification");
            return Ok(LoadOutcome::VerificationMismatch {
                expected: state,
                saved: Value::Null,
            });
        }
    };
    call_log.record_tool(handle.id(), SAVE_SCENARIO, Value::Object(JsonObject::new()), &saved);

    match serde_json::from_str::<Value>(&saved) {
        Ok(echo) if echo == state => {
            handle.mark_ready();
            Ok(LoadOutcome::Loaded {
                message,
                verified: true,
            })
        }
        Ok(echo) => Ok(LoadOutcome::VerificationMismatch {
            expected: state,
            saved: echo,
        }),
        Err(_) => Ok(LoadOutcome::VerificationMismatch {
            expected: state,
            saved: Value::String(saved),
        }),
    }
}
