//! Top-level orchestrator.
//!
//! The [`Runtime`] owns the session manager and runs the dispatch loop: on
//! each pass it drains every active session's queue to that session's
//! client, then pauses for `base_delay + per_session_delay × sessions` and
//! waits for a producer to signal new data.
//!
//! ```text
//! Initial ──start()──▶ Running ──stop()──▶ Stopping ──loop exit──▶ Stopped
//! ```

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use lumen_core::{BackMsg, ForwardMsg, SessionId};
use lumen_settings::RuntimeSettings;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{
    CacheStorageManager, ComponentRegistry, LocalComponentRegistry, MediaFileStorage,
    MemoryCacheStorageManager, MemoryMediaFileStorage, MemoryUploadedFileManager,
    UploadedFileManager,
};
use crate::engine::{ScriptData, ScriptEngine};
use crate::errors::RuntimeError;
use crate::metrics::{
    CLIENT_DISCONNECTS_TOTAL, DISPATCH_PASS_DURATION_SECONDS, FORWARD_MSGS_DISPATCHED_TOTAL,
};
use crate::session::{SessionClient, SessionServices};
use crate::session_manager::{
    ClientSessionManager, ConnectOptions, MemorySessionStorage, SessionInfo, SessionManager,
    SessionManagerDeps, SessionManagerFactory, SessionStorage,
};

/// The process-wide runtime, if one has been constructed and is still alive.
static INSTANCE: RwLock<Option<Weak<Runtime>>> = RwLock::new(None);

/// Lifecycle state. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeState {
    /// Constructed, loop not started.
    Initial,
    /// Dispatch loop running.
    Running,
    /// `stop()` called; loop finishing its pass.
    Stopping,
    /// Loop exited. Terminal.
    Stopped,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Pause between dispatch passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Fixed part of the pause.
    pub base_delay: Duration,
    /// Added once per active session.
    pub per_session_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            per_session_delay: Duration::from_millis(1),
        }
    }
}

impl DispatchConfig {
    /// Delays taken from runtime settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.dispatch_base_delay_ms),
            per_session_delay: Duration::from_millis(settings.dispatch_per_session_delay_ms),
        }
    }

    /// Pause after a pass over `session_count` sessions.
    pub fn interval(&self, session_count: usize) -> Duration {
        let n = u32::try_from(session_count).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_add(self.per_session_delay.saturating_mul(n))
    }
}

/// Everything a [`Runtime`] is built from.
pub struct RuntimeConfig {
    /// Main script every session runs.
    pub script_path: String,
    /// Command line the server was launched with.
    pub command_line: Option<String>,
    /// Extension component metadata.
    pub component_registry: Arc<dyn ComponentRegistry>,
    /// Media produced by scripts.
    pub media_file_storage: Arc<dyn MediaFileStorage>,
    /// Files uploaded by clients.
    pub uploaded_file_manager: Arc<dyn UploadedFileManager>,
    /// Builds the session manager.
    pub session_manager_factory: SessionManagerFactory,
    /// Where disconnected sessions wait for resumption.
    pub session_storage: Arc<dyn SessionStorage>,
    /// Cached function results.
    pub cache_storage_manager: Arc<dyn CacheStorageManager>,
    /// Runs scripts.
    pub script_engine: Arc<dyn ScriptEngine>,
    /// Whether the built-in hello script is being served.
    pub is_hello: bool,
    /// Dispatch loop pacing.
    pub dispatch: DispatchConfig,
}

impl RuntimeConfig {
    /// In-memory collaborators and a [`ClientSessionManager`].
    pub fn in_memory(script_path: impl Into<String>, script_engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            script_path: script_path.into(),
            command_line: None,
            component_registry: Arc::new(LocalComponentRegistry::new()),
            media_file_storage: Arc::new(MemoryMediaFileStorage::new("/_lumen/media")),
            uploaded_file_manager: Arc::new(MemoryUploadedFileManager::new("/_lumen/upload")),
            session_manager_factory: ClientSessionManager::factory(),
            session_storage: Arc::new(MemorySessionStorage::default()),
            cache_storage_manager: Arc::new(MemoryCacheStorageManager::new()),
            script_engine,
            is_hello: false,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("script_path", &self.script_path)
            .field("command_line", &self.command_line)
            .field("is_hello", &self.is_hello)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

/// Session orchestrator and dispatch loop.
pub struct Runtime {
    state: Mutex<RuntimeState>,
    script_data: ScriptData,
    services: SessionServices,
    session_storage: Arc<dyn SessionStorage>,
    session_mgr: Arc<dyn SessionManager>,
    dispatch: DispatchConfig,
    must_stop: CancellationToken,
    stopped: CancellationToken,
}

impl Runtime {
    /// Build a runtime in [`RuntimeState::Initial`] and install it as the
    /// process-wide instance, replacing any previous one.
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let RuntimeConfig {
            script_path,
            command_line,
            component_registry,
            media_file_storage,
            uploaded_file_manager,
            session_manager_factory,
            session_storage,
            cache_storage_manager,
            script_engine,
            is_hello,
            dispatch,
        } = config;

        let services = SessionServices {
            script_engine,
            uploaded_file_manager,
            cache_storage_manager,
            media_file_storage,
            component_registry,
            message_enqueued: Arc::new(Notify::new()),
        };
        let session_mgr = session_manager_factory(SessionManagerDeps {
            session_storage: Arc::clone(&session_storage),
            services: services.clone(),
        });

        let runtime = Arc::new(Self {
            state: Mutex::new(RuntimeState::Initial),
            script_data: ScriptData {
                main_script_path: script_path,
                command_line: command_line.unwrap_or_default(),
                is_hello,
            },
            services,
            session_storage,
            session_mgr,
            dispatch,
            must_stop: CancellationToken::new(),
            stopped: CancellationToken::new(),
        });

        let mut slot = INSTANCE.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|prev| prev.strong_count() > 0) {
            warn!("replacing existing runtime instance");
        }
        *slot = Some(Arc::downgrade(&runtime));
        drop(slot);

        info!(script = %runtime.script_data.main_script_path, "runtime created");
        runtime
    }

    /// The process-wide runtime, if one exists.
    pub fn instance() -> Option<Arc<Self>> {
        INSTANCE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Whether a process-wide runtime exists.
    pub fn exists() -> bool {
        Self::instance().is_some()
    }

    /// Forget the process-wide runtime.
    pub fn clear_instance() {
        *INSTANCE.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    /// Start the dispatch loop.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyStarted`] unless the runtime is in
    /// [`RuntimeState::Initial`].
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock();
            if *state != RuntimeState::Initial {
                return Err(RuntimeError::AlreadyStarted(*state));
            }
            *state = RuntimeState::Running;
        }

        let _handle = tokio::spawn(dispatch_loop(
            Arc::downgrade(self),
            self.must_stop.clone(),
            self.stopped.clone(),
            Arc::clone(&self.services.message_enqueued),
            self.dispatch,
        ));
        info!("runtime started");
        Ok(())
    }

    /// Ask the dispatch loop to exit after its current pass. Only acts on a
    /// running runtime.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != RuntimeState::Running {
                debug!(state = %*state, "stop ignored");
                return;
            }
            *state = RuntimeState::Stopping;
        }
        info!("runtime stopping");
        self.must_stop.cancel();
    }

    /// Resolves once the runtime reaches [`RuntimeState::Stopped`].
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Whether a client may connect now, with a short reason.
    pub fn is_ready_for_client_connection(&self) -> (bool, &'static str) {
        match self.state() {
            RuntimeState::Running => (true, "ok"),
            RuntimeState::Initial | RuntimeState::Stopping | RuntimeState::Stopped => {
                (false, "unavailable")
            }
        }
    }

    /// Create (or resume) a session for `client`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Stopped`] once stopping, or whatever the session
    /// manager rejects the connection with.
    #[instrument(skip_all)]
    pub fn connect_session(
        &self,
        client: Arc<dyn SessionClient>,
        options: ConnectOptions,
    ) -> Result<SessionId, RuntimeError> {
        if matches!(self.state(), RuntimeState::Stopping | RuntimeState::Stopped) {
            return Err(RuntimeError::Stopped);
        }
        let session_id =
            self.session_mgr
                .connect_session(client, self.script_data.clone(), options)?;
        self.services.message_enqueued.notify_one();
        Ok(session_id)
    }

    /// The client went away; the manager decides whether the session is
    /// kept for resumption.
    pub fn disconnect_session(&self, session_id: &str) {
        self.session_mgr.disconnect_session(session_id);
    }

    /// Close and shut down a session. Unknown IDs are ignored.
    pub fn close_session(&self, session_id: &str) {
        self.session_mgr.close_session(session_id);
    }

    /// Look up an active session.
    pub fn get_active_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.session_mgr.get_session_info(session_id)
    }

    /// Same as [`Runtime::get_active_session_info`].
    pub fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get_active_session_info(session_id)
    }

    /// Snapshot of every active session.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.session_mgr.list_sessions()
    }

    /// Number of active sessions.
    pub fn num_sessions(&self) -> usize {
        self.session_mgr.num_sessions()
    }

    /// Whether `session_id` is active.
    pub fn is_active_session(&self, session_id: &str) -> bool {
        self.session_mgr.is_active_session(session_id)
    }

    /// Route a client request to its session.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::SessionNotFound`] if the session is not active.
    pub fn handle_back_msg(&self, session_id: &str, msg: BackMsg) -> Result<(), RuntimeError> {
        let info = self
            .get_active_session_info(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_owned()))?;
        info.session.handle_back_msg(msg);
        Ok(())
    }

    /// Queue a message for an active session. Returns `false` if the session
    /// is unknown or shut down.
    pub fn enqueue_forward_msg(&self, session_id: &str, msg: ForwardMsg) -> bool {
        self.get_active_session_info(session_id)
            .is_some_and(|info| info.session.enqueue_forward_msg(msg))
    }

    /// Script sessions run.
    pub fn script_data(&self) -> &ScriptData {
        &self.script_data
    }

    /// Whether the built-in hello script is being served.
    pub fn is_hello(&self) -> bool {
        self.script_data.is_hello
    }

    /// Dispatch loop pacing.
    pub fn dispatch_config(&self) -> DispatchConfig {
        self.dispatch
    }

    /// The session manager.
    pub fn session_manager(&self) -> &Arc<dyn SessionManager> {
        &self.session_mgr
    }

    /// Media storage.
    pub fn media_file_storage(&self) -> &Arc<dyn MediaFileStorage> {
        &self.services.media_file_storage
    }

    /// Uploaded file storage.
    pub fn uploaded_file_manager(&self) -> &Arc<dyn UploadedFileManager> {
        &self.services.uploaded_file_manager
    }

    /// Cache storage manager.
    pub fn cache_storage_manager(&self) -> &Arc<dyn CacheStorageManager> {
        &self.services.cache_storage_manager
    }

    /// Component registry.
    pub fn component_registry(&self) -> &Arc<dyn ComponentRegistry> {
        &self.services.component_registry
    }

    /// Drain every active session's queue to its client. Returns the number
    /// of sessions visited.
    async fn dispatch_pass(&self) -> usize {
        let started = Instant::now();
        let sessions = self.session_mgr.list_sessions();

        for info in &sessions {
            let msgs = info.session.flush_forward_queue();
            if msgs.is_empty() {
                continue;
            }
            let mut delivered = 0u64;
            for msg in msgs {
                if let Err(err) = info.client.write_forward_msg(msg) {
                    let err = RuntimeError::from(err);
                    warn!(
                        session_id = %info.session_id(),
                        error = %err,
                        recoverable = err.is_recoverable(),
                        "client write failed"
                    );
                    counter!(CLIENT_DISCONNECTS_TOTAL, "category" => err.category()).increment(1);
                    let closed = self
                        .session_mgr
                        .close_session_if_client(info.session_id().as_str(), &info.client);
                    if !closed {
                        debug!(session_id = %info.session_id(), "session re-paired, left open");
                    }
                    break;
                }
                delivered += 1;
            }
            counter!(FORWARD_MSGS_DISPATCHED_TOTAL).increment(delivered);
            tokio::task::yield_now().await;
        }

        histogram!(DISPATCH_PASS_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        sessions.len()
    }

    fn close_all_sessions(&self) {
        let active = self.session_mgr.list_sessions();
        let stored = self.session_storage.list();
        for info in &active {
            self.session_mgr.close_session(info.session_id().as_str());
        }
        for session in &stored {
            self.session_mgr.close_session(session.id().as_str());
        }
        info!(active = active.len(), stored = stored.len(), "sessions closed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.must_stop.cancel();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("script_data", &self.script_data)
            .finish_non_exhaustive()
    }
}

async fn dispatch_loop(
    runtime: Weak<Runtime>,
    must_stop: CancellationToken,
    stopped: CancellationToken,
    need_send_data: Arc<Notify>,
    dispatch: DispatchConfig,
) {
    debug!("dispatch loop started");
    loop {
        let Some(rt) = runtime.upgrade() else { break };
        let session_count = rt.dispatch_pass().await;
        drop(rt);

        tokio::select! {
            biased;
            () = must_stop.cancelled() => break,
            () = tokio::time::sleep(dispatch.interval(session_count)) => {}
        }
        tokio::select! {
            biased;
            () = must_stop.cancelled() => break,
            () = need_send_data.notified() => {}
        }
    }

    if let Some(rt) = runtime.upgrade() {
        rt.close_all_sessions();
        *rt.state.lock() = RuntimeState::Stopped;
    }
    info!("runtime stopped");
    stopped.cancel();
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::engine::IdleScriptEngine;
    use crate::session::{ClientDisconnected, MockSessionClient};

    // Tests touching the process-wide instance run one at a time.
    static INSTANCE_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn config() -> RuntimeConfig {
        RuntimeConfig::in_memory("mock/script/path.py", Arc::new(IdleScriptEngine))
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn dispatch_interval_grows_with_sessions() {
        let d = DispatchConfig::default();
        assert_eq!(d.interval(0), Duration::from_millis(10));
        assert_eq!(d.interval(5), Duration::from_millis(15));
    }

    #[test]
    fn dispatch_from_settings() {
        let settings = RuntimeSettings {
            dispatch_base_delay_ms: 20,
            dispatch_per_session_delay_ms: 2,
            ..RuntimeSettings::default()
        };
        let d = DispatchConfig::from_settings(&settings);
        assert_eq!(d.interval(3), Duration::from_millis(26));
    }

    #[test]
    fn dispatch_interval_saturates() {
        let d = DispatchConfig {
            base_delay: Duration::MAX,
            per_session_delay: Duration::from_secs(1),
        };
        assert_eq!(d.interval(usize::MAX), Duration::MAX);
    }

    #[test]
    fn state_display() {
        assert_eq!(RuntimeState::Initial.to_string(), "initial");
        assert_eq!(RuntimeState::Stopping.to_string(), "stopping");
    }

    #[tokio::test]
    async fn new_replaces_instance() {
        let _guard = INSTANCE_LOCK.lock().await;
        let first = Runtime::new(config());
        assert!(Arc::ptr_eq(&Runtime::instance().unwrap(), &first));

        let second = Runtime::new(config());
        assert!(Arc::ptr_eq(&Runtime::instance().unwrap(), &second));

        drop(second);
        assert!(!Runtime::exists());
        Runtime::clear_instance();
        drop(first);
    }

    #[tokio::test]
    async fn lifecycle() {
        let _guard = INSTANCE_LOCK.lock().await;
        let rt = Runtime::new(config());
        assert_eq!(rt.state(), RuntimeState::Initial);
        assert_eq!(rt.is_ready_for_client_connection(), (false, "unavailable"));

        rt.start().await.unwrap();
        assert_eq!(rt.state(), RuntimeState::Running);
        assert_eq!(rt.is_ready_for_client_connection(), (true, "ok"));
        assert_matches!(
            rt.start().await,
            Err(RuntimeError::AlreadyStarted(RuntimeState::Running))
        );

        rt.stop();
        rt.stopped().await;
        assert_eq!(rt.state(), RuntimeState::Stopped);
        rt.stop();
        assert_eq!(rt.state(), RuntimeState::Stopped);
        Runtime::clear_instance();
    }

    #[tokio::test]
    async fn client_write_failure_closes_session() {
        let _guard = INSTANCE_LOCK.lock().await;
        let rt = Runtime::new(config());
        rt.start().await.unwrap();

        let mut client = MockSessionClient::new();
        let _ = client
            .expect_write_forward_msg()
            .times(1)
            .returning(|_| Err(ClientDisconnected));
        let id = rt
            .connect_session(Arc::new(client), ConnectOptions::default())
            .unwrap();
        let session = Arc::clone(&rt.get_session_info(id.as_str()).unwrap().session);

        assert!(rt.enqueue_forward_msg(id.as_str(), ForwardMsg::delta(vec![0], json!(1))));
        assert!(rt.enqueue_forward_msg(id.as_str(), ForwardMsg::delta(vec![1], json!(2))));
        wait_for(|| !rt.is_active_session(id.as_str())).await;
        assert!(session.is_shutdown());

        rt.stop();
        rt.stopped().await;
        Runtime::clear_instance();
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_follows_dispatch_interval() {
        let _guard = INSTANCE_LOCK.lock().await;
        let rt = Runtime::new(config());
        rt.start().await.unwrap();
        // Let the loop finish its first (empty) pass and start pausing.
        tokio::task::yield_now().await;

        let (client, mut rx) = crate::session::ChannelSessionClient::new();
        let id = rt
            .connect_session(Arc::new(client), ConnectOptions::default())
            .unwrap();
        assert!(rt.get_active_session_info(id.as_str()).is_some());
        assert!(rt.enqueue_forward_msg(id.as_str(), ForwardMsg::delta(vec![0], json!("a"))));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(rt.dispatch_config().interval(1) * 2).await;
        assert_eq!(rx.try_recv().unwrap(), ForwardMsg::delta(vec![0], json!("a")));

        rt.stop();
        rt.stopped().await;
        Runtime::clear_instance();
    }

    #[tokio::test]
    async fn back_msg_to_unknown_session() {
        let _guard = INSTANCE_LOCK.lock().await;
        let rt = Runtime::new(config());
        assert_matches!(
            rt.handle_back_msg("nope", BackMsg::StopScript),
            Err(RuntimeError::SessionNotFound(_))
        );
        assert!(!rt.enqueue_forward_msg("nope", ForwardMsg::delta(vec![], json!(null))));
        Runtime::clear_instance();
    }

    #[tokio::test]
    async fn dropping_runtime_releases_loop() {
        let _guard = INSTANCE_LOCK.lock().await;
        let rt = Runtime::new(config());
        rt.start().await.unwrap();
        let stopped = rt.stopped.clone();
        drop(rt);
        tokio::time::timeout(Duration::from_secs(1), stopped.cancelled())
            .await
            .unwrap();
        Runtime::clear_instance();
    }
}
