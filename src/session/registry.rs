//! Session registry: the single owner of every live session slot.

use super::types::{SessionHandle, SessionInfo, SessionKey, SessionSlot};
use crate::bridge::Bridge;
use crate::catalog::OperationCatalog;
use crate::error::ManagerError;
use crate::remote::Connector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a batch close. Failed releases are listed, but their sessions
/// are removed from the registry all the same.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: Vec<String>,
    pub failures: Vec<ManagerError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Statistics about registered sessions.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub ready_sessions: usize,
}

/// Map of session id to session slot.
///
/// The map lock is held only for single map operations and never across a
/// bridged call.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    catalog: Arc<OperationCatalog>,
    connector: Arc<dyn Connector>,
    bridge: Bridge,
    close_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(
        catalog: Arc<OperationCatalog>,
        connector: Arc<dyn Connector>,
        bridge: Bridge,
        close_timeout: Option<Duration>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            catalog,
            connector,
            bridge,
            close_timeout,
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the session for `session_id`, creating an unready one if absent.
    ///
    /// Lookup and insertion happen under one lock, so concurrent first
    /// references to the same id all observe the same slot.
    pub fn get_or_create(&self, session_id: &str) -> Result<(SessionHandle, bool), ManagerError> {
        let mut sessions = self.lock_sessions();
        if let Some(handle) = sessions.get(session_id) {
            return Ok((handle.clone(), handle.is_ready()));
        }

        let key = SessionKey::parse(session_id);
        let locator = self
            .catalog
            .locator(&key.group)
            .ok_or_else(|| ManagerError::UnknownGroup(key.group.clone()))?
            .clone();
        let handle: SessionHandle = Arc::new(SessionSlot::new(
            session_id,
            key,
            locator,
            self.connector.clone(),
        ));
        sessions.insert(session_id.to_string(), handle.clone());
        info!(session_id = %session_id, "Session created");
        Ok((handle, false))
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.lock_sessions().get(session_id).cloned()
    }

    /// Mark a session ready. Unknown ids are ignored.
    pub fn mark_ready(&self, session_id: &str) {
        match self.lock_sessions().get(session_id) {
            Some(handle) => handle.mark_ready(),
            None => debug!(session_id = %session_id, "mark_ready on unknown session ignored"),
        }
    }

    /// Remove a session and release its client.
    ///
    /// Returns `Ok(false)` if there was no such session. A release failure is
    /// reported as `CloseFailure`; the session stays removed either way.
    pub fn close(&self, session_id: &str) -> Result<bool, ManagerError> {
        let Some(handle) = self.lock_sessions().remove(session_id) else {
            return Ok(false);
        };
        info!(session_id = %session_id, "Closing session");
        let result = self
            .bridge
            .spawn(release(handle))
            .and_then(|pending| pending.wait(self.close_timeout))
            .map_err(|e| close_failure(session_id, e));
        if let Err(e) = &result {
            warn!(session_id = %session_id, error = %e, "Failed to release session client");
        }
        result.map(|()| true)
    }

    /// Close every current session. Releases run concurrently on the bridge;
    /// a failure never stops the others.
    pub fn close_all(&self) -> CloseReport {
        let mut drained: Vec<(String, SessionHandle)> = self.lock_sessions().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let pending: Vec<_> = drained
            .into_iter()
            .map(|(id, handle)| {
                let ticket = self.bridge.spawn(release(handle));
                (id, ticket)
            })
            .collect();

        let mut report = CloseReport::default();
        for (id, ticket) in pending {
            match ticket.and_then(|t| t.wait(self.close_timeout)) {
                Ok(()) => report.closed.push(id),
                Err(e) => {
                    let failure = close_failure(&id, e);
                    warn!(session_id = %id, error = %failure, "Failed to close session");
                    report.failures.push(failure);
                }
            }
        }
        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "Closed all sessions"
        );
        report
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock_sessions().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    /// Ids of all live sessions, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).map(|h| h.info())
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions = self.lock_sessions();
        RegistryStats {
            total_sessions: sessions.len(),
            ready_sessions: sessions.values().filter(|h| h.is_ready()).count(),
        }
    }
}

async fn release(handle: SessionHandle) -> Result<(), ManagerError> {
    handle.release().await.map_err(|e| ManagerError::CloseFailure {
        session_id: handle.id().to_string(),
        reason: e.to_string(),
    })
}

fn close_failure(session_id: &str, e: ManagerError) -> ManagerError {
    match e {
        ManagerError::CloseFailure { .. } => e,
        other => ManagerError::CloseFailure {
            session_id: session_id.to_string(),
            reason: other.to_string(),
        },
    }
}
