//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial; missing fields take the compiled default.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "runtime": { "dispatchBaseDelayMs": 20 },
///   "script": { "mainScriptPath": "app.py" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LumenSettings {
    /// Settings schema version.
    pub version: String,
    /// Dispatch loop and session storage tuning.
    pub runtime: RuntimeSettings,
    /// Script to serve.
    pub script: ScriptSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for LumenSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            runtime: RuntimeSettings::default(),
            script: ScriptSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl LumenSettings {
    /// Correct out-of-range values in place.
    ///
    /// Called automatically during loading. Bad values are corrected with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        let rt = &mut self.runtime;
        if rt.dispatch_base_delay_ms == 0 {
            tracing::warn!("dispatchBaseDelayMs is 0, using 1");
            rt.dispatch_base_delay_ms = 1;
        }
        if rt.dispatch_base_delay_ms > MAX_DISPATCH_DELAY_MS {
            tracing::warn!(
                value = rt.dispatch_base_delay_ms,
                max = MAX_DISPATCH_DELAY_MS,
                "dispatchBaseDelayMs too large, clamped"
            );
            rt.dispatch_base_delay_ms = MAX_DISPATCH_DELAY_MS;
        }
        if rt.dispatch_per_session_delay_ms > MAX_DISPATCH_DELAY_MS {
            tracing::warn!(
                value = rt.dispatch_per_session_delay_ms,
                max = MAX_DISPATCH_DELAY_MS,
                "dispatchPerSessionDelayMs too large, clamped"
            );
            rt.dispatch_per_session_delay_ms = MAX_DISPATCH_DELAY_MS;
        }
        if rt.session_storage_capacity == 0 {
            tracing::warn!("sessionStorageCapacity is 0, using 1");
            rt.session_storage_capacity = 1;
        }
    }
}

/// Upper bound for either dispatch delay component.
pub const MAX_DISPATCH_DELAY_MS: u64 = 10_000;

/// Dispatch loop and session storage tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Fixed part of the pause between dispatch passes.
    pub dispatch_base_delay_ms: u64,
    /// Added to the pause once per connected session.
    pub dispatch_per_session_delay_ms: u64,
    /// How long a disconnected session stays resumable.
    pub session_storage_ttl_secs: u64,
    /// Maximum number of disconnected sessions kept for resumption.
    pub session_storage_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            dispatch_base_delay_ms: 10,
            dispatch_per_session_delay_ms: 1,
            session_storage_ttl_secs: 120,
            session_storage_capacity: 128,
        }
    }
}

/// Script to serve.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptSettings {
    /// Path of the main script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_script_path: Option<String>,
    /// Command line the server was launched with, passed to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` still wins).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = LumenSettings::default();
        assert_eq!(s.runtime.dispatch_base_delay_ms, 10);
        assert_eq!(s.runtime.dispatch_per_session_delay_ms, 1);
        assert_eq!(s.runtime.session_storage_ttl_secs, 120);
        assert_eq!(s.runtime.session_storage_capacity, 128);
        assert_eq!(s.logging.level, "info");
        assert!(s.script.main_script_path.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LumenSettings =
            serde_json::from_str(r#"{"runtime": {"dispatchBaseDelayMs": 25}}"#).unwrap();
        assert_eq!(s.runtime.dispatch_base_delay_ms, 25);
        assert_eq!(s.runtime.dispatch_per_session_delay_ms, 1);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(LumenSettings::default()).unwrap();
        assert!(v["runtime"].get("dispatchBaseDelayMs").is_some());
        assert!(v["runtime"].get("sessionStorageTtlSecs").is_some());
        // None script fields are omitted
        assert!(v["script"].get("mainScriptPath").is_none());
    }

    #[test]
    fn validate_fixes_zero_values() {
        let mut s = LumenSettings::default();
        s.runtime.dispatch_base_delay_ms = 0;
        s.runtime.session_storage_capacity = 0;
        s.validate();
        assert_eq!(s.runtime.dispatch_base_delay_ms, 1);
        assert_eq!(s.runtime.session_storage_capacity, 1);
    }

    #[test]
    fn validate_clamps_large_delays() {
        let mut s = LumenSettings::default();
        s.runtime.dispatch_base_delay_ms = u64::MAX;
        s.runtime.dispatch_per_session_delay_ms = 50_000;
        s.validate();
        assert_eq!(s.runtime.dispatch_base_delay_ms, MAX_DISPATCH_DELAY_MS);
        assert_eq!(s.runtime.dispatch_per_session_delay_ms, MAX_DISPATCH_DELAY_MS);
    }
}
