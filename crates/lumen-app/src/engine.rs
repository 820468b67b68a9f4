//! Line-oriented demo engine.
//!
//! Every non-empty line of the script that is not a `#` comment becomes one
//! `Delta` whose body is the line text. Runs are framed by `NewSession`,
//! status changes, and a final `ScriptFinished`.

use std::path::Path;

use futures::stream::{self, BoxStream};
use lumen_core::{ForwardMsg, ScriptFinishedStatus};
use lumen_runtime::{ScriptEngine, ScriptRunRequest};
use serde_json::json;
use tracing::{debug, warn};

/// Script served by `lumen run --hello`.
pub const HELLO_SCRIPT: &str = "\
# lumen hello
Hello from lumen!
Each line of a script is sent to the client as one element.
Edit a script and rerun to see it change.
";

/// Path reported for the built-in hello script.
pub const HELLO_SCRIPT_PATH: &str = "<hello>";

/// Renders scripts line by line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineScriptEngine;

impl LineScriptEngine {
    fn load_source(request: &ScriptRunRequest) -> std::io::Result<String> {
        if request.script_data.is_hello {
            return Ok(HELLO_SCRIPT.to_string());
        }
        std::fs::read_to_string(Path::new(&request.script_data.main_script_path))
    }
}

/// Turn script source into the run's element messages.
pub fn render_lines(source: &str) -> Vec<ForwardMsg> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .zip(0u32..)
        .map(|(line, index)| ForwardMsg::delta(vec![index], json!({ "text": line })))
        .collect()
}

impl ScriptEngine for LineScriptEngine {
    fn run(&self, request: ScriptRunRequest) -> BoxStream<'static, ForwardMsg> {
        let mut msgs = vec![
            ForwardMsg::NewSession {
                session_id: request.session_id.clone(),
                script_run_id: request.script_run_id.clone(),
                main_script_path: request.script_data.main_script_path.clone(),
            },
            ForwardMsg::SessionStatusChanged {
                script_is_running: true,
            },
        ];

        match Self::load_source(&request) {
            Ok(source) => {
                let elements = render_lines(&source);
                debug!(
                    session_id = %request.session_id,
                    elements = elements.len(),
                    "script rendered"
                );
                msgs.extend(elements);
                msgs.push(ForwardMsg::ScriptFinished {
                    status: ScriptFinishedStatus::Success,
                });
            }
            Err(err) => {
                warn!(
                    session_id = %request.session_id,
                    path = %request.script_data.main_script_path,
                    error = %err,
                    "failed to read script"
                );
                msgs.push(ForwardMsg::Exception {
                    message: format!(
                        "Cannot read {}: {err}",
                        request.script_data.main_script_path
                    ),
                    stack_trace: Vec::new(),
                });
                msgs.push(ForwardMsg::ScriptFinished {
                    status: ScriptFinishedStatus::Error,
                });
            }
        }

        msgs.push(ForwardMsg::SessionStatusChanged {
            script_is_running: false,
        });
        Box::pin(stream::iter(msgs))
    }
}
