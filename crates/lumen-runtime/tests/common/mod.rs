//! Shared fixtures for runtime integration tests.

#![allow(dead_code, unreachable_pub)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use lumen_core::{ForwardMsg, SessionId};
use lumen_runtime::collaborators::{
    LocalComponentRegistry, MemoryCacheStorageManager, MemoryMediaFileStorage,
    MemoryUploadedFileManager,
};
use lumen_runtime::{
    AppSession, ClientDisconnected, ConnectOptions, DispatchConfig, IdleScriptEngine,
    MemorySessionStorage, RuntimeConfig, RuntimeError, ScriptData, ScriptEngine,
    ScriptRunRequest, SessionClient, SessionInfo, SessionManager, SessionManagerDeps,
    SessionServices,
};
use parking_lot::Mutex;

/// Session manager with no resumption support, backed by a plain map.
///
/// Keeps runtime tests independent of [`lumen_runtime::ClientSessionManager`].
pub struct MockSessionManager {
    services: SessionServices,
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl MockSessionManager {
    pub fn new(deps: SessionManagerDeps) -> Self {
        Self {
            services: deps.services,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl SessionManager for MockSessionManager {
    fn connect_session(
        &self,
        client: Arc<dyn SessionClient>,
        script_data: ScriptData,
        options: ConnectOptions,
    ) -> Result<SessionId, RuntimeError> {
        let id = options.session_id_override.unwrap_or_default();
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(id.as_str()) {
            return Err(RuntimeError::DuplicateSession(id.to_string()));
        }
        let session = AppSession::new(
            id.clone(),
            script_data,
            options.user_info,
            self.services.clone(),
        );
        let _ = sessions.insert(id.to_string(), SessionInfo::new(client, session));
        Ok(id)
    }

    fn close_session(&self, session_id: &str) {
        let removed = self.sessions.lock().remove(session_id);
        if let Some(info) = removed {
            info.session.shutdown();
        }
    }

    fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().values().cloned().collect()
    }
}

/// Client that records every delivered message.
#[derive(Default)]
pub struct RecordingClient {
    received: Mutex<Vec<ForwardMsg>>,
    disconnected: Mutex<bool>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<ForwardMsg> {
        self.received.lock().clone()
    }

    /// Make every later write fail.
    pub fn disconnect(&self) {
        *self.disconnected.lock() = true;
    }
}

impl SessionClient for RecordingClient {
    fn write_forward_msg(&self, msg: ForwardMsg) -> Result<(), ClientDisconnected> {
        if *self.disconnected.lock() {
            return Err(ClientDisconnected);
        }
        self.received.lock().push(msg);
        Ok(())
    }
}

/// Engine that replays `msgs` on every run.
pub struct ScriptedEngine {
    pub msgs: Vec<ForwardMsg>,
}

impl ScriptEngine for ScriptedEngine {
    fn run(&self, _request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg> {
        let msgs = self.msgs.clone();
        Box::pin(async_stream::stream! {
            for msg in msgs {
                yield msg;
            }
        })
    }
}

/// In-memory runtime config using [`MockSessionManager`].
pub fn mock_config() -> RuntimeConfig {
    config_with(
        Box::new(|deps: SessionManagerDeps| {
            Arc::new(MockSessionManager::new(deps)) as Arc<dyn SessionManager>
        }),
        Arc::new(IdleScriptEngine),
    )
}

pub fn config_with(
    session_manager_factory: lumen_runtime::SessionManagerFactory,
    script_engine: Arc<dyn ScriptEngine>,
) -> RuntimeConfig {
    RuntimeConfig {
        script_path: "mock/script/path.py".into(),
        command_line: None,
        component_registry: Arc::new(LocalComponentRegistry::new()),
        media_file_storage: Arc::new(MemoryMediaFileStorage::new("/mock/media")),
        uploaded_file_manager: Arc::new(MemoryUploadedFileManager::new("/mock/upload")),
        session_manager_factory,
        session_storage: Arc::new(MemorySessionStorage::new(Duration::from_secs(60), 16)),
        cache_storage_manager: Arc::new(MemoryCacheStorageManager::new()),
        script_engine,
        is_hello: false,
        dispatch: DispatchConfig::default(),
    }
}

/// Deps for building a session manager directly.
pub fn manager_deps() -> SessionManagerDeps {
    SessionManagerDeps {
        session_storage: Arc::new(MemorySessionStorage::new(Duration::from_secs(60), 16)),
        services: SessionServices::in_memory(Arc::new(IdleScriptEngine)),
    }
}

/// Sleep long enough for the dispatch loop to complete a pass.
pub async fn tick_runtime_loop() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Poll until `cond` holds, failing after about a second.
pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
