//! In-memory tool servers for exercising the manager without child processes.
//!
//! A [`MockConnector`] maps locator paths to [`MockToolServer`] templates. Each
//! connection gets its own copy of the server's state, so two sessions of the
//! same group never see each other's scenario. All connections of one
//! connector share a [`MockStats`] counter set.
//!
//! # Example
//!
//! ```ignore
//! use toolpool::testing::{MockConnector, MockToolServer};
//!
//! let connector = MockConnector::new()
//!     .with_server("calc.py", MockToolServer::calculator())
//!     .with_server("fs.py", MockToolServer::new().with_scenario_support());
//! let stats = connector.stats();
//! ```

use crate::config::GroupLocator;
use crate::error::RemoteError;
use crate::remote::{Connector, JsonObject, OperationSchema, ToolClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation body: gets the connection's mutable state and the call arguments.
pub type MockHandler =
    Arc<dyn Fn(&mut Value, &JsonObject) -> Result<String, RemoteError> + Send + Sync>;

/// Transform applied to the state before `save_scenario` echoes it.
pub type SaveTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Template for a fake tool server.
#[derive(Clone, Default)]
pub struct MockToolServer {
    operations: BTreeMap<String, (OperationSchema, MockHandler)>,
    fail_close: bool,
    call_delay: Option<Duration>,
}

impl MockToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation<F>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(&mut Value, &JsonObject) -> Result<String, RemoteError> + Send + Sync + 'static,
    {
        let schema = OperationSchema {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        };
        self.operations
            .insert(name.to_string(), (schema, Arc::new(handler)));
        self
    }

    /// `load_scenario` stores `arguments.scenario`; `save_scenario` echoes it.
    pub fn with_scenario_support(self) -> Self {
        self.with_scenario_echo(Arc::new(|state| state))
    }

    /// Like [`with_scenario_support`](Self::with_scenario_support), but the
    /// echoed state passes through `transform` first.
    pub fn with_scenario_echo(self, transform: SaveTransform) -> Self {
        self.with_operation("load_scenario", "Load a scenario", |state, args| {
            match args.get("scenario") {
                Some(scenario) => {
                    *state = scenario.clone();
                    Ok("Successfully loaded from scenario.".to_string())
                }
                None => Err(RemoteError::Rejected(
                    "missing required argument 'scenario'".into(),
                )),
            }
        })
        .with_operation("save_scenario", "Save the current scenario", move |state, _| {
            Ok(transform(state.clone()).to_string())
        })
    }

    /// A stateless server with a numeric `add` operation.
    pub fn calculator() -> Self {
        Self::new().with_operation("add", "Add two numbers", |_, args| {
            let ints = (
                args.get("a").and_then(Value::as_i64),
                args.get("b").and_then(Value::as_i64),
            );
            if let (Some(a), Some(b)) = ints {
                return Ok(json!(a + b).to_string());
            }
            let a = args.get("a").and_then(Value::as_f64);
            let b = args.get("b").and_then(Value::as_f64);
            match (a, b) {
                (Some(a), Some(b)) => Ok(json!(a + b).to_string()),
                _ => Err(RemoteError::Rejected(
                    "arguments 'a' and 'b' must be numbers".into(),
                )),
            }
        })
    }

    /// Every `close` on this server fails.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Each call sleeps (cooperatively) before answering.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct StatsInner {
    connects: usize,
    closes: usize,
    calls: HashMap<String, usize>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Counters shared by every connection of a [`MockConnector`].
#[derive(Clone, Default)]
pub struct MockStats {
    inner: Arc<Mutex<StatsInner>>,
}

impl MockStats {
    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Calls of `operation` across all connections.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }
}

/// [`Connector`] serving [`MockToolServer`]s by locator path.
#[derive(Clone, Default)]
pub struct MockConnector {
    servers: HashMap<PathBuf, MockToolServer>,
    stats: MockStats,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, path: impl Into<PathBuf>, server: MockToolServer) -> Self {
        self.servers.insert(path.into(), server);
        self
    }

    pub fn stats(&self) -> MockStats {
        self.stats.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, locator: &GroupLocator) -> Result<Box<dyn ToolClient>, RemoteError> {
        let server = self.servers.get(&locator.local_path).cloned().ok_or_else(|| {
            RemoteError::Connect(format!(
                "no mock server at {}",
                locator.local_path.display()
            ))
        })?;
        self.stats.lock().connects += 1;
        Ok(Box::new(MockToolClient {
            server,
            state: Value::Null,
            stats: self.stats.clone(),
        }))
    }
}

struct MockToolClient {
    server: MockToolServer,
    state: Value,
    stats: MockStats,
}

#[async_trait]
impl ToolClient for MockToolClient {
    async fn list_operations(&mut self) -> Result<Vec<OperationSchema>, RemoteError> {
        Ok(self
            .server
            .operations
            .values()
            .map(|(schema, _)| schema.clone())
            .collect())
    }

    async fn call(&mut self, name: &str, arguments: JsonObject) -> Result<String, RemoteError> {
        {
            let mut stats = self.stats.lock();
            *stats.calls.entry(name.to_string()).or_insert(0) += 1;
            stats.in_flight += 1;
            stats.max_in_flight = stats.max_in_flight.max(stats.in_flight);
        }
        if let Some(delay) = self.server.call_delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.server.operations.get(name) {
            Some((_, handler)) => handler(&mut self.state, &arguments),
            None => Err(RemoteError::Rejected(format!("Unknown tool: {name}"))),
        };
        self.stats.lock().in_flight -= 1;
        result
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        self.stats.lock().closes += 1;
        if self.server.fail_close {
            Err(RemoteError::Unexpected("server refused to shut down".into()))
        } else {
            Ok(())
        }
    }
}
