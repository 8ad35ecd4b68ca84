//! Session key, session slot and session info types.

use crate::catalog::ROUTE_SEPARATOR;
use crate::config::GroupLocator;
use crate::error::RemoteError;
use crate::remote::{Connector, JsonObject, ToolClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Composite key parsed from a session id of the form `<group>-<instance>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub group: String,
    pub instance: String,
}

impl SessionKey {
    /// Split at the first separator; an id without one has an empty instance.
    pub fn parse(session_id: &str) -> Self {
        match session_id.split_once(ROUTE_SEPARATOR) {
            Some((group, instance)) => Self {
                group: group.to_string(),
                instance: instance.to_string(),
            },
            None => Self {
                group: session_id.to_string(),
                instance: String::new(),
            },
        }
    }

    /// The id with its group prefix removed, used to correlate one actor's
    /// sessions across groups.
    pub fn descoped(&self) -> &str {
        if self.instance.is_empty() {
            &self.group
        } else {
            &self.instance
        }
    }
}

/// Snapshot of a session (serializable for reports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub group: String,
    pub instance: String,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

/// Shared handle to a registered session.
///
/// The remote client inside is only reachable from crate code running on the
/// bridge worker, through [`SessionHandle::lock_client`].
pub type SessionHandle = Arc<SessionSlot>;

/// One registry entry: a lazily connected client plus its readiness flag.
pub struct SessionSlot {
    id: String,
    key: SessionKey,
    locator: GroupLocator,
    connector: Arc<dyn Connector>,
    client: Mutex<Option<Box<dyn ToolClient>>>,
    ready: AtomicBool,
    /// Set by `release` under the client lock; a closed slot never reconnects.
    closed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl SessionSlot {
    pub(crate) fn new(
        id: &str,
        key: SessionKey,
        locator: GroupLocator,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            id: id.to_string(),
            key,
            locator,
            connector,
            client: Mutex::new(None),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            group: self.key.group.clone(),
            instance: self.key.instance.clone(),
            ready: self.is_ready(),
            created_at: self.created_at,
        }
    }

    /// Take exclusive use of the client. The lock is FIFO, so operations on
    /// one session run one at a time in the order they were submitted.
    pub(crate) async fn lock_client(&self) -> ClientGuard<'_> {
        ClientGuard {
            slot: self,
            client: self.client.lock().await,
        }
    }

    /// Close the underlying client, if it was ever connected.
    ///
    /// Work that takes the client lock after this point fails with
    /// [`RemoteError::Closed`] instead of connecting a client nobody owns.
    pub(crate) async fn release(&self) -> Result<(), RemoteError> {
        let client = {
            let mut guard = self.client.lock().await;
            self.closed.store(true, Ordering::Release);
            guard.take()
        };
        match client {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}

/// Exclusive access to a session's client for the duration of one unit of work.
pub(crate) struct ClientGuard<'a> {
    slot: &'a SessionSlot,
    client: MutexGuard<'a, Option<Box<dyn ToolClient>>>,
}

impl ClientGuard<'_> {
    /// Invoke `operation`, connecting first if this session has no client yet.
    /// Fails without connecting once the session has been released.
    pub(crate) async fn call(
        &mut self,
        operation: &str,
        arguments: JsonObject,
    ) -> Result<String, RemoteError> {
        if self.slot.is_closed() {
            return Err(RemoteError::Closed(self.slot.id.clone()));
        }
        if self.client.is_none() {
            debug!(session_id = %self.slot.id, "Connecting session client");
            let client = self.slot.connector.connect(&self.slot.locator).await?;
            *self.client = Some(client);
        }
        match self.client.as_mut() {
            Some(client) => client.call(operation, arguments).await,
            None => Err(RemoteError::Unexpected("client unavailable".into())),
        }
    }
}
