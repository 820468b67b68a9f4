//! # lumen-runtime
//!
//! Session orchestration for an interactive application server.
//!
//! - **[`Runtime`]**: lifecycle (`start`/`stop`/`stopped`) and the dispatch
//!   loop that drains session queues to clients
//! - **[`SessionManager`]**: registry contract; [`ClientSessionManager`] is
//!   the production implementation with disconnect/resume support
//! - **[`AppSession`]**: one client's script runs and outbound queue
//! - **Collaborators**: script engine, uploads, media, cache, and component
//!   registry behind narrow traits with in-memory implementations
//!
//! ## Crate Position
//!
//! Depends on `lumen-core` and `lumen-settings`. Depended on by `lumen-app`.

#![deny(unsafe_code)]

pub mod collaborators;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod session_manager;

pub use engine::{
    IdleScriptEngine, RerunData, ScriptData, ScriptEngine, ScriptRunRequest, UserInfo,
};
pub use errors::RuntimeError;
pub use runtime::{DispatchConfig, Runtime, RuntimeConfig, RuntimeState};
pub use session::{
    AppSession, AppSessionState, ChannelSessionClient, ClientDisconnected, SessionClient,
    SessionServices,
};
pub use session_manager::{
    ClientSessionManager, ConnectOptions, MemorySessionStorage, SessionInfo, SessionManager,
    SessionManagerDeps, SessionManagerFactory, SessionStorage,
};
