//! Server configuration and manager options.
//!
//! The configuration file maps each tool group to the location its MCP server
//! is served from:
//!
//! ```json
//! { "mcpServers": { "file_system": { "local_path": "tools/file_system.py" } } }
//! ```

use crate::error::ManagerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for a single bridged call (2 minutes).
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;
/// Default deadline for the bridge worker to stop during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
/// Interpreter used to launch `.py` locators unless overridden.
pub const DEFAULT_PYTHON: &str = "python3";

/// Where a group's tool server is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLocator {
    pub local_path: PathBuf,
    /// Explicit launcher; inferred from the file extension when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl GroupLocator {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            command: None,
            args: Vec::new(),
        }
    }
}

/// Parsed `mcpServers` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, GroupLocator>,
}

impl ServerConfig {
    /// Read and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ManagerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| ManagerError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, ManagerError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ManagerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks on every group entry.
    ///
    /// Group names may not contain `-`, which separates the group from the
    /// instance in session ids and from the operation in routed tool names.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.mcp_servers.is_empty() {
            return Err(ManagerError::InvalidConfig(
                "mcpServers must define at least one group".into(),
            ));
        }
        for (group, locator) in &self.mcp_servers {
            if group.trim().is_empty() {
                return Err(ManagerError::InvalidConfig("empty group name".into()));
            }
            if group.contains('-') {
                return Err(ManagerError::InvalidConfig(format!(
                    "group name '{group}' must not contain '-'"
                )));
            }
            if locator.local_path.as_os_str().is_empty() {
                return Err(ManagerError::InvalidConfig(format!(
                    "group '{group}' has an empty local_path"
                )));
            }
        }
        Ok(())
    }
}

/// Runtime knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Deadline for each bridged call; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub python: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            python: DEFAULT_PYTHON.to_string(),
        }
    }
}
