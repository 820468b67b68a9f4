//! Script execution interface.
//!
//! The engine turns a [`ScriptRunRequest`] into a stream of [`ForwardMsg`]s.
//! A session drives that stream on its own task and enqueues each message.
//! Restarting a run means dropping the current stream and calling
//! [`ScriptEngine::run`] again; stopping means dropping it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use lumen_core::{ForwardMsg, ScriptRunId, SessionId};
use serde_json::Value;

use crate::collaborators::{
    CacheStorageManager, ComponentRegistry, MediaFileStorage, UploadedFileManager,
};

/// Per-user attributes attached to a session at connect time.
pub type UserInfo = HashMap<String, Option<String>>;

/// What a session executes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptData {
    /// Path of the main script.
    pub main_script_path: String,
    /// Command line the server was launched with.
    pub command_line: String,
    /// Whether this is the built-in hello script.
    pub is_hello: bool,
}

impl ScriptData {
    /// Script data for `main_script_path` with an empty command line.
    pub fn new(main_script_path: impl Into<String>) -> Self {
        Self {
            main_script_path: main_script_path.into(),
            ..Self::default()
        }
    }
}

/// Inputs to one rerun.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RerunData {
    /// Query string of the requesting page.
    pub query_string: String,
    /// Widget values for the run (`Null` when none).
    pub widget_states: Value,
}

/// Everything the engine receives for one run.
#[derive(Clone)]
pub struct ScriptRunRequest {
    /// Owning session.
    pub session_id: SessionId,
    /// Fresh identifier of this run.
    pub script_run_id: ScriptRunId,
    /// Script to execute.
    pub script_data: ScriptData,
    /// Rerun inputs.
    pub rerun: RerunData,
    /// Attributes of the connected user.
    pub user_info: UserInfo,
    /// Cache storages for cached functions.
    pub cache: Arc<dyn CacheStorageManager>,
    /// Files uploaded into this session.
    pub uploaded_files: Arc<dyn UploadedFileManager>,
    /// Registered extension components.
    pub components: Arc<dyn ComponentRegistry>,
    /// Storage for produced media.
    pub media: Arc<dyn MediaFileStorage>,
}

impl std::fmt::Debug for ScriptRunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunRequest")
            .field("session_id", &self.session_id)
            .field("script_run_id", &self.script_run_id)
            .field("script_data", &self.script_data)
            .field("rerun", &self.rerun)
            .finish_non_exhaustive()
    }
}

/// Executes scripts.
pub trait ScriptEngine: Send + Sync {
    /// Start a run. The returned stream yields the run's messages in order
    /// and ends when the run is over. Failures are reported in-band as
    /// `Exception` and `ScriptFinished` messages.
    fn run(&self, request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg>;
}

/// Engine whose runs produce nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleScriptEngine;

impl ScriptEngine for IdleScriptEngine {
    fn run(&self, _request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg> {
        Box::pin(stream::empty())
    }
}
