//! Production session manager.
//!
//! Active sessions live in a `DashMap`. When a client disconnects its session
//! moves to [`SessionStorage`] instead of being shut down, so the same client
//! can reconnect and pick up where it left off.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lumen_core::SessionId;
use metrics::{counter, gauge};
use tracing::{debug, info, instrument, warn};

use super::{
    ConnectOptions, SessionInfo, SessionManager, SessionManagerDeps, SessionManagerFactory,
    SessionStorage,
};
use crate::engine::ScriptData;
use crate::errors::RuntimeError;
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_CLOSED_TOTAL, SESSIONS_CONNECTED_TOTAL};
use crate::session::{AppSession, SessionClient, SessionServices};

/// Session manager with disconnect/resume support.
pub struct ClientSessionManager {
    active: DashMap<String, SessionInfo>,
    storage: Arc<dyn SessionStorage>,
    services: SessionServices,
}

impl ClientSessionManager {
    /// Create a manager with no sessions.
    pub fn new(deps: SessionManagerDeps) -> Self {
        Self {
            active: DashMap::new(),
            storage: deps.session_storage,
            services: deps.services,
        }
    }

    /// Factory for [`RuntimeConfig`](crate::RuntimeConfig).
    pub fn factory() -> SessionManagerFactory {
        Box::new(|deps: SessionManagerDeps| {
            Arc::new(Self::new(deps)) as Arc<dyn SessionManager>
        })
    }

    /// Storage holding disconnected sessions.
    pub fn session_storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(SESSIONS_ACTIVE).set(self.active.len() as f64);
    }

    /// Reattach `client` to a session waiting in storage. Hands the client
    /// back if there is nothing to resume.
    ///
    /// The active-map entry is held while storage is consulted, so a resume
    /// cannot interleave with a disconnect or a connect of the same ID.
    fn try_resume(
        &self,
        existing: &SessionId,
        client: Arc<dyn SessionClient>,
    ) -> Result<SessionId, Arc<dyn SessionClient>> {
        match self.active.entry(existing.to_string()) {
            Entry::Occupied(_) => {
                warn!(session_id = %existing, "session already connected, starting a new one");
                Err(client)
            }
            Entry::Vacant(slot) => {
                let Some(session) = self.storage.delete(existing.as_str()) else {
                    debug!(session_id = %existing, "no session to resume");
                    return Err(client);
                };
                if session.is_shutdown() {
                    return Err(client);
                }
                let _ = slot.insert(SessionInfo::new(client, session));
                info!(session_id = %existing, "session resumed from storage");
                Ok(existing.clone())
            }
        }
    }
}

impl SessionManager for ClientSessionManager {
    #[instrument(skip_all, fields(script = %script_data.main_script_path))]
    fn connect_session(
        &self,
        client: Arc<dyn SessionClient>,
        script_data: ScriptData,
        options: ConnectOptions,
    ) -> Result<SessionId, RuntimeError> {
        let ConnectOptions {
            user_info,
            existing_session_id,
            session_id_override,
        } = options;

        let client = match existing_session_id {
            Some(existing) => match self.try_resume(&existing, client) {
                Ok(session_id) => {
                    self.record_active();
                    return Ok(session_id);
                }
                Err(client) => client,
            },
            None => client,
        };

        let session_id = session_id_override.unwrap_or_default();
        match self.active.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(RuntimeError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(_) if self.storage.get(session_id.as_str()).is_some() => {
                Err(RuntimeError::DuplicateSession(session_id.to_string()))
            }
            Entry::Vacant(slot) => {
                let session = AppSession::new(
                    session_id.clone(),
                    script_data,
                    user_info,
                    self.services.clone(),
                );
                let _ = slot.insert(SessionInfo::new(client, session));
                counter!(SESSIONS_CONNECTED_TOTAL).increment(1);
                self.record_active();
                info!(session_id = %session_id, "session connected");
                Ok(session_id)
            }
        }
    }

    #[instrument(skip(self))]
    fn close_session(&self, session_id: &str) {
        let mut closed = false;
        if let Some((_, info)) = self.active.remove(session_id) {
            info.session.shutdown();
            closed = true;
        }
        if let Some(session) = self.storage.delete(session_id) {
            session.shutdown();
            closed = true;
        }
        if closed {
            counter!(SESSIONS_CLOSED_TOTAL).increment(1);
            self.record_active();
            info!(session_id, "session closed");
        }
    }

    #[instrument(skip(self, client))]
    fn close_session_if_client(&self, session_id: &str, client: &Arc<dyn SessionClient>) -> bool {
        let Some((_, info)) = self
            .active
            .remove_if(session_id, |_, info| info.is_paired_with(client))
        else {
            debug!(session_id, "session no longer paired with this client");
            return false;
        };
        info.session.shutdown();
        counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        self.record_active();
        info!(session_id, "session closed");
        true
    }

    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.active.get(session_id).map(|info| info.value().clone())
    }

    fn list_sessions(&self) -> Vec<SessionInfo> {
        self.active.iter().map(|info| info.value().clone()).collect()
    }

    #[instrument(skip(self))]
    fn disconnect_session(&self, session_id: &str) {
        // Storage is filled before the active entry is released.
        let Entry::Occupied(entry) = self.active.entry(session_id.to_owned()) else {
            return;
        };
        let session = Arc::clone(&entry.get().session);
        let kept = !session.is_shutdown();
        if kept {
            self.storage.save(session);
        }
        let _ = entry.remove();
        self.record_active();
        if kept {
            info!(session_id, "session disconnected, kept for resumption");
        }
    }

    fn num_sessions(&self) -> usize {
        self.active.len()
    }

    fn is_active_session(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }
}
