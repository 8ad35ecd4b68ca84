//! The caller-facing service object.
//!
//! A [`ToolManager`] owns one bridge worker and everything that runs on it.
//! Its methods are synchronous and may be called from any number of threads
//! at once.

use crate::bridge::Bridge;
use crate::call_log::{CallLog, DEFAULT_LOG_PATH};
use crate::catalog::OperationCatalog;
use crate::config::{ManagerOptions, ServerConfig};
use crate::error::ManagerError;
use crate::invoker::{NormalizedResult, ToolArguments, ToolInvoker};
use crate::remote::{Connector, JsonObject, McpConnector};
use crate::scenario::{LoadOutcome, ScenarioLoader, SAVE_SCENARIO};
use crate::session::{CloseReport, SessionRegistry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of [`ToolManager::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    pub close: CloseReport,
    /// `false` if the bridge worker was still running at the deadline.
    pub worker_terminated: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.close.is_clean() && self.worker_terminated
    }
}

pub struct ToolManager {
    bridge: Bridge,
    catalog: Arc<OperationCatalog>,
    registry: Arc<SessionRegistry>,
    loader: Arc<ScenarioLoader>,
    invoker: ToolInvoker,
    call_log: Arc<CallLog>,
    options: ManagerOptions,
}

impl ToolManager {
    /// Start a manager serving `config` over MCP stdio child processes.
    pub fn start(config: &ServerConfig, options: ManagerOptions) -> Result<Self, ManagerError> {
        let connector = Arc::new(McpConnector::new(options.python.clone()));
        Self::with_connector(config, connector, options)
    }

    /// Start a manager with a custom [`Connector`], discovering every group's
    /// operations before returning.
    pub fn with_connector(
        config: &ServerConfig,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let bridge = Bridge::start()?;

        let discovery = {
            let config = config.clone();
            let connector = connector.clone();
            bridge.submit(
                async move { OperationCatalog::discover(&config, connector.as_ref()).await },
                options.call_timeout,
            )
        };
        let catalog = match discovery {
            Ok(catalog) => catalog,
            Err(e) => {
                bridge.shutdown(options.shutdown_timeout);
                return Err(e);
            }
        };
        Ok(Self::assemble(bridge, catalog, connector, options))
    }

    /// Start a manager over a prebuilt catalog, skipping discovery.
    pub fn with_catalog(
        catalog: OperationCatalog,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        let bridge = Bridge::start()?;
        Ok(Self::assemble(bridge, catalog, connector, options))
    }

    fn assemble(
        bridge: Bridge,
        catalog: OperationCatalog,
        connector: Arc<dyn Connector>,
        options: ManagerOptions,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let call_log = Arc::new(CallLog::new());
        let registry = Arc::new(SessionRegistry::new(
            catalog.clone(),
            connector,
            bridge.clone(),
            options.call_timeout,
        ));
        let loader = Arc::new(ScenarioLoader::new(
            registry.clone(),
            bridge.clone(),
            call_log.clone(),
            options.call_timeout,
        ));
        let invoker = ToolInvoker::new(
            registry.clone(),
            catalog.clone(),
            loader.clone(),
            bridge.clone(),
            call_log.clone(),
            options.call_timeout,
        );
        info!(groups = catalog.len(), "Tool manager ready");
        Self {
            bridge,
            catalog,
            registry,
            loader,
            invoker,
            call_log,
            options,
        }
    }

    /// Run one operation on a session, creating the session on first use.
    pub fn invoke(
        &self,
        session_id: &str,
        operation_name: &str,
        arguments: impl Into<ToolArguments>,
    ) -> Result<NormalizedResult, ManagerError> {
        self.invoker.invoke(session_id, operation_name, arguments)
    }

    /// Load a scenario into a session once. See [`ScenarioLoader::load`].
    pub fn load(
        &self,
        session_id: &str,
        initial_state: Value,
        verify: bool,
    ) -> Result<LoadOutcome, ManagerError> {
        self.loader.load(session_id, initial_state, verify)
    }

    pub fn close(&self, session_id: &str) -> Result<bool, ManagerError> {
        self.registry.close(session_id)
    }

    /// Close every session and clear the call log.
    pub fn close_all(&self) -> CloseReport {
        let report = self.registry.close_all();
        self.call_log.clear();
        report
    }

    /// Close everything, then stop the bridge worker within `deadline`.
    pub fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let close = self.close_all();
        let worker_terminated = self.bridge.shutdown(deadline);
        if !worker_terminated {
            warn!("Shutdown finished with the bridge worker still running");
        }
        ShutdownReport {
            close,
            worker_terminated,
        }
    }

    pub fn record_chat(&self, session_id: &str, user: &str, assistant: &str) {
        self.call_log.record_chat(session_id, user, assistant);
    }

    /// Flush the call log to `path`, or to `log/log.jsonl` when `None`.
    pub fn dump_log(&self, path: Option<&Path>) -> Result<usize, ManagerError> {
        self.call_log
            .flush(path.unwrap_or_else(|| Path::new(DEFAULT_LOG_PATH)))
    }

    /// Saved state of every live session, keyed by session id. A session whose
    /// save fails maps to `null`.
    pub fn save_all_scenarios(&self) -> BTreeMap<String, Value> {
        self.registry
            .session_ids()
            .into_iter()
            .map(|id| {
                let saved = match self.invoker.invoke(&id, SAVE_SCENARIO, JsonObject::new()) {
                    Ok(result) => result.value,
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "Failed to save scenario");
                        Value::Null
                    }
                };
                (id, saved)
            })
            .collect()
    }

    /// Function-calling schemas for every discovered operation.
    pub fn tool_schemas(&self) -> Vec<Value> {
        self.catalog.tool_schemas()
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn call_log(&self) -> &CallLog {
        &self.call_log
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }
}

impl Drop for ToolManager {
    fn drop(&mut self) {
        if self.bridge.is_running() {
            self.bridge.shutdown(self.options.shutdown_timeout);
        }
    }
}
