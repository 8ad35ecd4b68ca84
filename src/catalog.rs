//! Operation catalog: which groups exist, where they are served from, and
//! which operations each one exposes.
//!
//! Built once at startup by connecting to every configured locator and listing
//! its operations; read-only afterwards. Operations are addressed externally by
//! their routed name, `<group>-<operation>`.

use crate::config::{GroupLocator, ServerConfig};
use crate::error::ManagerError;
use crate::remote::{Connector, OperationSchema};
use crate::scenario::LOAD_SCENARIO;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Separator between group and operation (and between group and instance).
pub const ROUTE_SEPARATOR: char = '-';

/// One configured group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupEntry {
    pub locator: GroupLocator,
    pub operations: Vec<OperationSchema>,
}

/// Read-only map from group name to its locator and operations.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    groups: BTreeMap<String, GroupEntry>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with locators only, for callers that skip operation discovery.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut catalog = Self::new();
        for (group, locator) in &config.mcp_servers {
            catalog.insert(group.clone(), locator.clone(), Vec::new());
        }
        catalog
    }

    /// Connect to every configured group and record the operations it exposes.
    ///
    /// Must run inside the bridge context. A group that cannot be queried
    /// fails the whole build.
    pub async fn discover(
        config: &ServerConfig,
        connector: &dyn Connector,
    ) -> Result<Self, ManagerError> {
        let mut catalog = Self::new();
        for (group, locator) in &config.mcp_servers {
            debug!(group = %group, path = %locator.local_path.display(), "Querying tool group");
            let mut client = connector.connect(locator).await.map_err(|e| {
                ManagerError::UnexpectedFailure(format!("group '{group}': {e}"))
            })?;
            let listed = client.list_operations().await;
            if let Err(e) = client.close().await {
                warn!(group = %group, error = %e, "Failed to close discovery client");
            }
            let operations = listed.map_err(|e| {
                ManagerError::UnexpectedFailure(format!("group '{group}': {e}"))
            })?;
            info!(group = %group, operations = operations.len(), "Discovered tool group");
            catalog.insert(group.clone(), locator.clone(), operations);
        }
        Ok(catalog)
    }

    pub fn insert(
        &mut self,
        group: impl Into<String>,
        locator: GroupLocator,
        operations: Vec<OperationSchema>,
    ) {
        self.groups.insert(
            group.into(),
            GroupEntry {
                locator,
                operations,
            },
        );
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn locator(&self, group: &str) -> Option<&GroupLocator> {
        self.groups.get(group).map(|g| &g.locator)
    }

    pub fn operations(&self, group: &str) -> Option<&[OperationSchema]> {
        self.groups.get(group).map(|g| g.operations.as_slice())
    }

    /// A group with known operations, none of which loads a scenario. Its
    /// sessions need no initial state and are ready on first use.
    pub fn is_stateless(&self, group: &str) -> bool {
        self.operations(group).is_some_and(|ops| {
            !ops.is_empty() && !ops.iter().any(|op| op.name.contains(LOAD_SCENARIO))
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Function-calling schemas for every operation, named `<group>-<operation>`.
    pub fn tool_schemas(&self) -> Vec<Value> {
        self.groups
            .iter()
            .flat_map(|(group, entry)| {
                entry
                    .operations
                    .iter()
                    .map(move |op| function_schema(group, op))
            })
            .collect()
    }

    /// Schema for a single routed operation name.
    pub fn tool_schema(&self, routed: &str) -> Option<Value> {
        let (group, op_name) = routed.split_once(ROUTE_SEPARATOR)?;
        self.operations(group)?
            .iter()
            .find(|op| op.name == op_name)
            .map(|op| function_schema(group, op))
    }

    /// Routed name for a bare operation name; the first group (by name) that
    /// exposes it wins.
    pub fn qualify(&self, operation: &str) -> Option<String> {
        self.groups.iter().find_map(|(group, entry)| {
            entry
                .operations
                .iter()
                .any(|op| op.name == operation)
                .then(|| routed_name(group, operation))
        })
    }
}

pub fn routed_name(group: &str, operation: &str) -> String {
    format!("{group}{ROUTE_SEPARATOR}{operation}")
}

/// Drop the `<group>-` routing prefix, if any.
pub fn strip_routing_prefix(name: &str) -> &str {
    name.split_once(ROUTE_SEPARATOR)
        .map_or(name, |(_, operation)| operation)
}

fn function_schema(group: &str, op: &OperationSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": routed_name(group, &op.name),
            "description": op.description,
            "parameters": op.input_schema,
        }
    })
}
