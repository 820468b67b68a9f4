//! Metric name constants.
//!
//! Recorded through the `metrics` facade; with no recorder installed the
//! macros are no-ops.

/// Active (client-attached) sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions connected total (counter).
pub const SESSIONS_CONNECTED_TOTAL: &str = "sessions_connected_total";
/// Sessions closed total (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
/// Forward messages delivered to clients (counter).
pub const FORWARD_MSGS_DISPATCHED_TOTAL: &str = "forward_msgs_dispatched_total";
/// Client write failures that closed a session (counter).
pub const CLIENT_DISCONNECTS_TOTAL: &str = "client_disconnects_total";
/// Script runs started (counter).
pub const SCRIPT_RUNS_TOTAL: &str = "script_runs_total";
/// Dispatch pass duration seconds (histogram).
pub const DISPATCH_PASS_DURATION_SECONDS: &str = "dispatch_pass_duration_seconds";
