//! Session registry contract.
//!
//! A [`SessionManager`] owns the map from session ID to [`SessionInfo`]. The
//! runtime only talks to it through this trait, so the production
//! [`ClientSessionManager`] and test doubles are interchangeable.

pub mod client_session_manager;
pub mod storage;

use std::sync::Arc;

use lumen_core::SessionId;

pub use client_session_manager::ClientSessionManager;
pub use storage::{MemorySessionStorage, SessionStorage};

use crate::engine::{ScriptData, UserInfo};
use crate::errors::RuntimeError;
use crate::session::{AppSession, SessionClient, SessionServices};

/// A client paired with its session. Immutable once built.
#[derive(Clone)]
pub struct SessionInfo {
    /// Where the session's messages go.
    pub client: Arc<dyn SessionClient>,
    /// The session.
    pub session: Arc<AppSession>,
}

impl SessionInfo {
    /// Pair `client` with `session`.
    pub fn new(client: Arc<dyn SessionClient>, session: Arc<AppSession>) -> Self {
        Self { client, session }
    }

    /// ID of the session.
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Whether this pairing holds exactly `client`.
    pub fn is_paired_with(&self, client: &Arc<dyn SessionClient>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.client), Arc::as_ptr(client))
    }
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Optional inputs to [`SessionManager::connect_session`].
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    /// Attributes of the connecting user.
    pub user_info: UserInfo,
    /// Session the client was previously attached to. If it is waiting in
    /// session storage the client is reattached to it; an ID that is still
    /// active elsewhere is not taken over.
    pub existing_session_id: Option<SessionId>,
    /// ID to give a newly created session instead of a generated one.
    pub session_id_override: Option<SessionId>,
}

impl ConnectOptions {
    /// Set the user info.
    #[must_use]
    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    /// Ask to resume `session_id`.
    #[must_use]
    pub fn with_existing_session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.existing_session_id = Some(session_id.into());
        self
    }

    /// Force the ID of a newly created session.
    #[must_use]
    pub fn with_session_id_override(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id_override = Some(session_id.into());
        self
    }
}

/// Owns the registry of active sessions.
pub trait SessionManager: Send + Sync {
    /// Attach `client` to a session and return its ID.
    ///
    /// Fails with [`RuntimeError::DuplicateSession`] when a new session would
    /// reuse an ID that is already registered; nothing is mutated then.
    fn connect_session(
        &self,
        client: Arc<dyn SessionClient>,
        script_data: ScriptData,
        options: ConnectOptions,
    ) -> Result<SessionId, RuntimeError>;

    /// Remove a session and shut it down. Unknown IDs are ignored.
    fn close_session(&self, session_id: &str);

    /// Look up an active session.
    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo>;

    /// Snapshot of every active session.
    fn list_sessions(&self) -> Vec<SessionInfo>;

    /// Close `session_id` only while it is still paired with `client`.
    ///
    /// Returns whether the session was closed. A session that has since been
    /// resumed by another client is left alone.
    fn close_session_if_client(&self, session_id: &str, client: &Arc<dyn SessionClient>) -> bool {
        match self.get_session_info(session_id) {
            Some(info) if info.is_paired_with(client) => {
                self.close_session(session_id);
                true
            }
            _ => false,
        }
    }

    /// The client went away. Managers that support resumption keep the
    /// session around; the default closes it.
    fn disconnect_session(&self, session_id: &str) {
        self.close_session(session_id);
    }

    /// Number of active sessions.
    fn num_sessions(&self) -> usize {
        self.list_sessions().len()
    }

    /// Whether `session_id` is active.
    fn is_active_session(&self, session_id: &str) -> bool {
        self.get_session_info(session_id).is_some()
    }
}

/// What a session manager is built from.
pub struct SessionManagerDeps {
    /// Where disconnected sessions wait for resumption.
    pub session_storage: Arc<dyn SessionStorage>,
    /// Collaborators handed to every session.
    pub services: SessionServices,
}

/// Builds the runtime's session manager once the runtime has assembled its
/// collaborators.
pub type SessionManagerFactory =
    Box<dyn FnOnce(SessionManagerDeps) -> Arc<dyn SessionManager> + Send>;
