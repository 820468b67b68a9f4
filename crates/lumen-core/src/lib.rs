//! # lumen-core
//!
//! Foundation types shared by every lumen crate:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::ScriptRunId`] as newtypes
//! - **Protocol messages**: [`messages::ForwardMsg`] (server → client) and
//!   [`messages::BackMsg`] (client → server)
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other lumen crates.

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod messages;

pub use ids::{ScriptRunId, SessionId};
pub use messages::{BackMsg, ForwardMsg, ScriptFinishedStatus};
