//! Session manager for stateful MCP tool servers
//!
//! This library keeps a pool of named, stateful tool-server connections and
//! lets synchronous callers on any thread invoke their operations. Each
//! connection is a *session*, addressed as `<group>-<instance>`, where the
//! group selects a configured tool server.
//!
//! # Architecture
//!
//! Remote clients are async and must all be driven from one place. The
//! architecture is:
//!
//! - **Bridge worker**: a dedicated thread running a current-thread tokio
//!   runtime (`bridge::Bridge`). Every remote-client operation runs here.
//!   Callers block on a reply channel, with an optional deadline.
//!
//! - **SessionRegistry**: the one owner of every session slot. A slot holds a
//!   lazily connected client behind a FIFO async lock, so calls on one session
//!   never overlap while different sessions interleave freely.
//!
//! - **ScenarioLoader**: applies a session's initial state exactly once, and
//!   can verify it by reading the state back with `save_scenario`.
//!
//! - **ToolInvoker**: routes `<group>-<operation>` names to sessions and
//!   classifies remote failures.
//!
//! - **ToolManager**: the service object tying these together.
//!
//! # Example
//!
//! ```ignore
//! use toolpool::{ManagerOptions, ServerConfig, ToolManager};
//!
//! let config = ServerConfig::from_file("mcp_servers.json".as_ref())?;
//! let manager = ToolManager::start(&config, ManagerOptions::default())?;
//! manager.load("file_system-1", serde_json::json!({"files": ["a.txt"]}), true)?;
//! let listing = manager.invoke("file_system-1", "file_system-ls", "{}")?;
//! manager.shutdown(std::time::Duration::from_secs(5));
//! ```

use std::path::PathBuf;

pub mod bridge;
pub mod call_log;
pub mod catalog;
pub mod config;
pub mod error;
pub mod invoker;
pub mod manager;
pub mod remote;
pub mod scenario;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::Bridge;
pub use call_log::{CallLog, LogEntry};
pub use catalog::OperationCatalog;
pub use config::{GroupLocator, ManagerOptions, ServerConfig};
pub use error::{ManagerError, RemoteError};
pub use invoker::{NormalizedResult, ToolArguments};
pub use manager::{ShutdownReport, ToolManager};
pub use remote::{Connector, McpConnector, ToolClient};
pub use scenario::LoadOutcome;
pub use session::{CloseReport, SessionInfo, SessionKey};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}
