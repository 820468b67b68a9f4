//! Protocol message types exchanged with clients.
//!
//! Two directions:
//!
//! - **[`ForwardMsg`]**: server → client. Produced by a session's script run,
//!   buffered on the session, delivered in enqueue order by the dispatch loop.
//! - **[`BackMsg`]**: client → server. Routed to one session (rerun, stop,
//!   clear cache).
//!
//! Both derive serde so a transport can pick its own encoding; nothing in this
//! workspace encodes wire bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ScriptRunId, SessionId};

/// How a script run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFinishedStatus {
    /// The script ran to completion.
    Success,
    /// The run was stopped or superseded by a rerun.
    StoppedEarly,
    /// The script raised an error (details were sent as an `Exception`).
    Error,
}

/// A unit of protocol data destined for a single session's client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwardMsg {
    /// A new script run is starting.
    NewSession {
        /// Session the run belongs to.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// Identifier of the run.
        #[serde(rename = "scriptRunId")]
        script_run_id: ScriptRunId,
        /// Script being executed.
        #[serde(rename = "mainScriptPath")]
        main_script_path: String,
    },

    /// Whether a script is currently running.
    SessionStatusChanged {
        /// `true` while a run is in flight.
        #[serde(rename = "scriptIsRunning")]
        script_is_running: bool,
    },

    /// An incremental UI update at a position in the element tree.
    Delta {
        /// Position of the element.
        path: Vec<u32>,
        /// Opaque element payload.
        body: Value,
    },

    /// The script raised an error.
    Exception {
        /// Error message.
        message: String,
        /// Formatted stack frames, outermost first.
        #[serde(rename = "stackTrace", default, skip_serializing_if = "Vec::is_empty")]
        stack_trace: Vec<String>,
    },

    /// A script run ended.
    ScriptFinished {
        /// How it ended.
        status: ScriptFinishedStatus,
    },
}

impl ForwardMsg {
    /// Wire type tag of this message.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::NewSession { .. } => "new_session",
            Self::SessionStatusChanged { .. } => "session_status_changed",
            Self::Delta { .. } => "delta",
            Self::Exception { .. } => "exception",
            Self::ScriptFinished { .. } => "script_finished",
        }
    }

    /// Convenience constructor for a delta at `path`.
    pub fn delta(path: Vec<u32>, body: Value) -> Self {
        Self::Delta { path, body }
    }
}

/// A request sent by a client to its session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackMsg {
    /// Re-execute the script.
    RerunScript {
        /// Query string of the page that requested the rerun.
        #[serde(rename = "queryString", default)]
        query_string: String,
        /// Widget values to apply to the new run.
        #[serde(rename = "widgetStates", default)]
        widget_states: Value,
    },
    /// Stop the in-flight run.
    StopScript,
    /// Drop all cached results.
    ClearCache,
}
