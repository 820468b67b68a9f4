//! One client's execution lifecycle.
//!
//! An [`AppSession`] owns a fixed [`SessionId`], the collaborators its runs
//! use, and the outbound [`ForwardMsgQueue`]. Each script run is a tokio task
//! that pulls the engine's message stream and appends to the queue; the
//! runtime's dispatch loop drains it.
//!
//! Lock order: `current_run` before `state` before the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::stream::BoxStream;
use lumen_core::{BackMsg, ForwardMsg, ScriptFinishedStatus, ScriptRunId, SessionId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{RerunData, ScriptData, ScriptRunRequest, UserInfo};
use crate::metrics::SCRIPT_RUNS_TOTAL;
use crate::session::SessionServices;
use crate::session::queue::ForwardMsgQueue;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppSessionState {
    /// No script run in flight.
    AppNotRunning,
    /// A script run is in flight.
    AppIsRunning,
    /// [`AppSession::shutdown`] was called. Terminal.
    ShutdownRequested,
}

impl std::fmt::Display for AppSessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AppNotRunning => "app_not_running",
            Self::AppIsRunning => "app_is_running",
            Self::ShutdownRequested => "shutdown_requested",
        };
        f.write_str(s)
    }
}

/// The in-flight run.
struct ScriptRun {
    run_id: ScriptRunId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScriptRun {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// A client's execution session.
pub struct AppSession {
    id: SessionId,
    self_ref: Weak<AppSession>,
    script_data: ScriptData,
    user_info: UserInfo,
    services: SessionServices,
    queue: ForwardMsgQueue,
    state: Mutex<AppSessionState>,
    current_run: Mutex<Option<ScriptRun>>,
    script_run_count: AtomicU64,
}

impl AppSession {
    /// Create a session and start its first run.
    ///
    /// The run is spawned on the ambient tokio runtime. Without one the
    /// session is still created but stays [`AppSessionState::AppNotRunning`].
    pub fn new(
        id: SessionId,
        script_data: ScriptData,
        user_info: UserInfo,
        services: SessionServices,
    ) -> Arc<Self> {
        let session = Arc::new_cyclic(|self_ref| Self {
            id,
            self_ref: self_ref.clone(),
            script_data,
            user_info,
            services,
            queue: ForwardMsgQueue::new(),
            state: Mutex::new(AppSessionState::AppNotRunning),
            current_run: Mutex::new(None),
            script_run_count: AtomicU64::new(0),
        });
        let _ = session.request_rerun(RerunData::default());
        session
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Script this session runs.
    pub fn script_data(&self) -> &ScriptData {
        &self.script_data
    }

    /// Attributes of the connected user.
    pub fn user_info(&self) -> &UserInfo {
        &self.user_info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AppSessionState {
        *self.state.lock()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.state() == AppSessionState::ShutdownRequested
    }

    /// Number of runs started so far.
    pub fn script_run_count(&self) -> u64 {
        self.script_run_count.load(Ordering::Relaxed)
    }

    /// Identifier of the in-flight run, if any.
    pub fn current_script_run_id(&self) -> Option<ScriptRunId> {
        self.current_run.lock().as_ref().map(|r| r.run_id.clone())
    }

    /// Number of messages waiting for dispatch.
    pub fn pending_msg_count(&self) -> usize {
        self.queue.len()
    }

    /// Append a message to the outbound queue and wake the dispatch loop.
    ///
    /// Returns `false` once the session has been shut down.
    pub fn enqueue_forward_msg(&self, msg: ForwardMsg) -> bool {
        if !self.queue.enqueue(msg) {
            return false;
        }
        self.services.message_enqueued.notify_one();
        true
    }

    /// Take every queued message in enqueue order.
    pub fn flush_forward_queue(&self) -> Vec<ForwardMsg> {
        self.queue.flush()
    }

    /// Stop the current run (if any) and start a new one.
    ///
    /// Returns `false` if the session is shut down or no tokio runtime is
    /// available to run the script on.
    #[instrument(skip(self, rerun), fields(session_id = %self.id))]
    pub fn request_rerun(&self, rerun: RerunData) -> bool {
        let mut current = self.current_run.lock();
        if self.is_shutdown() {
            debug!("rerun ignored after shutdown");
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; script run not started");
            return false;
        };

        if let Some(previous) = current.take() {
            debug!(run_id = %previous.run_id, "superseding script run");
            previous.stop();
            let _ = self.enqueue_forward_msg(ForwardMsg::ScriptFinished {
                status: ScriptFinishedStatus::StoppedEarly,
            });
        }

        let run_id = ScriptRunId::new();
        let request = ScriptRunRequest {
            session_id: self.id.clone(),
            script_run_id: run_id.clone(),
            script_data: self.script_data.clone(),
            rerun,
            user_info: self.user_info.clone(),
            cache: Arc::clone(&self.services.cache_storage_manager),
            uploaded_files: Arc::clone(&self.services.uploaded_file_manager),
            components: Arc::clone(&self.services.component_registry),
            media: Arc::clone(&self.services.media_file_storage),
        };
        let stream = self.services.script_engine.run(request);
        let cancel = CancellationToken::new();
        let task = handle.spawn(drive_script_run(
            self.self_ref.clone(),
            run_id.clone(),
            stream,
            cancel.clone(),
        ));

        *self.state.lock() = AppSessionState::AppIsRunning;
        let count = self.script_run_count.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(SCRIPT_RUNS_TOTAL).increment(1);
        info!(run_id = %run_id, count, "script run started");
        *current = Some(ScriptRun {
            run_id,
            cancel,
            task,
        });
        true
    }

    /// Stop the in-flight run, if any.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn request_script_stop(&self) {
        let mut current = self.current_run.lock();
        if let Some(run) = current.take() {
            info!(run_id = %run.run_id, "script run stopped");
            run.stop();
            let _ = self.enqueue_forward_msg(ForwardMsg::ScriptFinished {
                status: ScriptFinishedStatus::StoppedEarly,
            });
        }
        let mut state = self.state.lock();
        if *state == AppSessionState::AppIsRunning {
            *state = AppSessionState::AppNotRunning;
        }
    }

    /// Act on a client request.
    pub fn handle_back_msg(&self, msg: BackMsg) {
        match msg {
            BackMsg::RerunScript {
                query_string,
                widget_states,
            } => {
                let _ = self.request_rerun(RerunData {
                    query_string,
                    widget_states,
                });
            }
            BackMsg::StopScript => self.request_script_stop(),
            BackMsg::ClearCache => {
                debug!(session_id = %self.id, "clear cache requested");
                self.services.cache_storage_manager.clear_all();
            }
        }
    }

    /// Stop execution, release the session's uploaded files, and stop
    /// accepting messages. Idempotent.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn shutdown(&self) {
        let mut current = self.current_run.lock();
        {
            let mut state = self.state.lock();
            if *state == AppSessionState::ShutdownRequested {
                return;
            }
            *state = AppSessionState::ShutdownRequested;
        }
        if let Some(run) = current.take() {
            run.stop();
        }
        drop(current);

        self.queue.close();
        self.services
            .uploaded_file_manager
            .remove_session_files(self.id.as_str());
        info!("session shut down");
    }

    /// Enqueue a message produced by run `run_id`, dropping it if that run
    /// has been superseded or stopped.
    fn enqueue_run_msg(&self, run_id: &ScriptRunId, msg: ForwardMsg) -> bool {
        let current = self.current_run.lock();
        match current.as_ref() {
            Some(run) if run.run_id == *run_id => self.enqueue_forward_msg(msg),
            _ => false,
        }
    }

    /// Called by the run task when the engine stream ends.
    fn finish_run(&self, run_id: &ScriptRunId) {
        let mut current = self.current_run.lock();
        if current.as_ref().is_some_and(|r| r.run_id == *run_id) {
            *current = None;
            let mut state = self.state.lock();
            if *state == AppSessionState::AppIsRunning {
                *state = AppSessionState::AppNotRunning;
            }
            debug!(session_id = %self.id, run_id = %run_id, "script run finished");
        }
    }
}

impl Drop for AppSession {
    fn drop(&mut self) {
        if let Some(run) = self.current_run.get_mut().take() {
            run.stop();
        }
    }
}

impl std::fmt::Debug for AppSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

async fn drive_script_run(
    session: Weak<AppSession>,
    run_id: ScriptRunId,
    mut stream: BoxStream<'static, ForwardMsg>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        let Some(msg) = next else { break };
        let Some(session) = session.upgrade() else {
            return;
        };
        if !session.enqueue_run_msg(&run_id, msg) {
            return;
        }
    }
    if let Some(session) = session.upgrade() {
        session.finish_run(&run_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::collaborators::{UploadedFileManager, UploadedFileRec};
    use crate::engine::ScriptEngine;

    /// Engine that yields `count` deltas, then stays pending forever.
    struct HangingEngine {
        count: u32,
    }

    impl ScriptEngine for HangingEngine {
        fn run(&self, _request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg> {
            let msgs: Vec<_> = (0..self.count)
                .map(|i| ForwardMsg::delta(vec![i], json!(i)))
                .collect();
            Box::pin(stream::iter(msgs).chain(stream::pending()))
        }
    }

    /// Engine that yields a fixed message list and ends.
    struct FiniteEngine {
        msgs: Vec<ForwardMsg>,
    }

    impl ScriptEngine for FiniteEngine {
        fn run(&self, _request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg> {
            Box::pin(stream::iter(self.msgs.clone()))
        }
    }

    fn session_with(engine: Arc<dyn ScriptEngine>) -> Arc<AppSession> {
        AppSession::new(
            SessionId::new(),
            ScriptData::new("app.py"),
            UserInfo::new(),
            SessionServices::in_memory(engine),
        )
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

    #[tokio::test]
    async fn first_run_starts_on_construction() {
        let session = session_with(Arc::new(HangingEngine { count: 2 }));
        assert_eq!(session.script_run_count(), 1);
        assert_eq!(session.state(), AppSessionState::AppIsRunning);
        wait_for(|| session.pending_msg_count() == 2).await;
        assert_eq!(
            session.flush_forward_queue(),
            vec![
                ForwardMsg::delta(vec![0], json!(0)),
                ForwardMsg::delta(vec![1], json!(1)),
            ]
        );
    }

    #[tokio::test]
    async fn finished_run_returns_to_not_running() {
        let msgs = vec![ForwardMsg::ScriptFinished {
            status: ScriptFinishedStatus::Success,
        }];
        let session = session_with(Arc::new(FiniteEngine { msgs: msgs.clone() }));
        wait_for(|| session.state() == AppSessionState::AppNotRunning).await;
        assert!(session.current_script_run_id().is_none());
        assert_eq!(session.flush_forward_queue(), msgs);
    }

    #[test]
    fn without_tokio_runtime_nothing_runs() {
        let session = session_with(Arc::new(HangingEngine { count: 1 }));
        assert_eq!(session.script_run_count(), 0);
        assert_eq!(session.state(), AppSessionState::AppNotRunning);
        assert!(session.enqueue_forward_msg(ForwardMsg::delta(vec![], json!(1))));
    }

    #[tokio::test]
    async fn rerun_replaces_run_and_reports_stopped_early() {
        let session = session_with(Arc::new(HangingEngine { count: 1 }));
        wait_for(|| session.pending_msg_count() == 1).await;
        let first = session.current_script_run_id().unwrap();

        assert!(session.request_rerun(RerunData::default()));
        let second = session.current_script_run_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(session.script_run_count(), 2);

        wait_for(|| session.pending_msg_count() == 3).await;
        let msgs = session.flush_forward_queue();
        assert_matches!(
            msgs[1],
            ForwardMsg::ScriptFinished {
                status: ScriptFinishedStatus::StoppedEarly
            }
        );
        assert_eq!(msgs[2], ForwardMsg::delta(vec![0], json!(0)));
    }

    #[tokio::test]
    async fn stop_script() {
        let session = session_with(Arc::new(HangingEngine { count: 0 }));
        session.handle_back_msg(BackMsg::StopScript);
        assert_eq!(session.state(), AppSessionState::AppNotRunning);
        assert!(session.current_script_run_id().is_none());
        assert_eq!(
            session.flush_forward_queue(),
            vec![ForwardMsg::ScriptFinished {
                status: ScriptFinishedStatus::StoppedEarly
            }]
        );

        // Stopping an idle session does nothing
        session.request_script_stop();
        assert!(session.flush_forward_queue().is_empty());
    }

    #[tokio::test]
    async fn rerun_back_msg() {
        let session = session_with(Arc::new(HangingEngine { count: 0 }));
        session.handle_back_msg(BackMsg::RerunScript {
            query_string: "a=1".into(),
            widget_states: json!({}),
        });
        assert_eq!(session.script_run_count(), 2);
    }

    #[tokio::test]
    async fn clear_cache_back_msg() {
        use crate::collaborators::CacheStorageContext;

        let services = SessionServices::in_memory(Arc::new(HangingEngine { count: 0 }));
        let storage = services
            .cache_storage_manager
            .create(&CacheStorageContext::new("f"));
        storage.set("k", vec![1]);
        let session = AppSession::new(
            SessionId::new(),
            ScriptData::new("app.py"),
            UserInfo::new(),
            services,
        );
        session.handle_back_msg(BackMsg::ClearCache);
        assert!(storage.get("k").is_none());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_queue() {
        let services = SessionServices::in_memory(Arc::new(HangingEngine { count: 0 }));
        let uploads = Arc::clone(&services.uploaded_file_manager);
        let session = AppSession::new(
            SessionId::new(),
            ScriptData::new("app.py"),
            UserInfo::new(),
            services,
        );
        uploads.add_file(
            session.id().as_str(),
            UploadedFileRec {
                file_id: "f1".into(),
                name: "a.txt".into(),
                mimetype: "text/plain".into(),
                data: Arc::new(vec![]),
            },
        );
        assert!(session.enqueue_forward_msg(ForwardMsg::delta(vec![], json!(1))));

        session.shutdown();
        session.shutdown();

        assert!(session.is_shutdown());
        assert!(session.current_script_run_id().is_none());
        assert!(session.flush_forward_queue().is_empty());
        assert!(!session.enqueue_forward_msg(ForwardMsg::delta(vec![], json!(2))));
        assert!(uploads.get_files(session.id().as_str(), &["f1"]).is_empty());
        assert!(!session.request_rerun(RerunData::default()));
        session.request_script_stop();
        assert_eq!(session.state(), AppSessionState::ShutdownRequested);
    }

    #[tokio::test]
    async fn enqueue_wakes_waiter() {
        let services = SessionServices::in_memory(Arc::new(HangingEngine { count: 0 }));
        let notify = Arc::clone(&services.message_enqueued);
        let session = AppSession::new(
            SessionId::new(),
            ScriptData::new("app.py"),
            UserInfo::new(),
            services,
        );
        assert!(session.enqueue_forward_msg(ForwardMsg::delta(vec![], json!(1))));
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }

    #[test]
    fn state_display() {
        assert_eq!(AppSessionState::AppIsRunning.to_string(), "app_is_running");
        assert_eq!(
            AppSessionState::ShutdownRequested.to_string(),
            "shutdown_requested"
        );
    }
}
