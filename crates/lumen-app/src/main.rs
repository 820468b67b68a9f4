//! # lumen
//!
//! Server binary: loads settings, starts the runtime, attaches one session
//! whose messages are printed to stdout as JSON lines, and shuts down
//! cleanly on Ctrl-C.

#![deny(unsafe_code)]

mod engine;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use lumen_core::ForwardMsg;
use lumen_core::logging::{init_json_subscriber, init_subscriber};
use lumen_runtime::{
    ChannelSessionClient, ConnectOptions, DispatchConfig, MemorySessionStorage, Runtime,
    RuntimeConfig,
};
use lumen_settings::{LumenSettings, load_settings, load_settings_from_path};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{HELLO_SCRIPT_PATH, LineScriptEngine};

/// How long to wait for the stdout printer to drain after shutdown.
const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// lumen application server.
#[derive(Parser, Debug)]
#[command(name = "lumen", about = "Serve a script to connected clients")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script to serve (falls back to `script.mainScriptPath` in settings).
    script: Option<PathBuf>,

    /// Serve the built-in hello script.
    #[arg(long)]
    hello: bool,

    /// Settings file (defaults to `~/.lumen/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `lumen_runtime=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

fn load(args: &RunArgs) -> Result<LumenSettings> {
    match &args.settings {
        Some(path) => {
            if !path.exists() {
                bail!("Settings file not found: {}", path.display());
            }
            load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => Ok(load_settings().unwrap_or_default()),
    }
}

/// Script path to serve: `--hello`, then the positional argument, then
/// settings.
fn resolve_script_path(args: &RunArgs, settings: &LumenSettings) -> Result<String> {
    if args.hello {
        return Ok(HELLO_SCRIPT_PATH.to_string());
    }
    if let Some(script) = &args.script {
        return Ok(script.to_string_lossy().into_owned());
    }
    match &settings.script.main_script_path {
        Some(path) => Ok(path.clone()),
        None => bail!("No script given; pass a path or use --hello"),
    }
}

fn build_config(args: &RunArgs, settings: &LumenSettings) -> Result<RuntimeConfig> {
    let script_path = resolve_script_path(args, settings)?;
    let mut config = RuntimeConfig::in_memory(script_path, Arc::new(LineScriptEngine));
    config.command_line = settings
        .script
        .command_line
        .clone()
        .or_else(|| Some(std::env::args().collect::<Vec<_>>().join(" ")));
    config.is_hello = args.hello;
    config.dispatch = DispatchConfig::from_settings(&settings.runtime);
    config.session_storage = Arc::new(MemorySessionStorage::from_settings(&settings.runtime));
    Ok(config)
}

async fn print_messages(mut rx: mpsc::UnboundedReceiver<ForwardMsg>) {
    while let Some(msg) = rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(msg_type = msg.msg_type(), error = %err, "unencodable message"),
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let settings = load(&args)?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    if settings.logging.json {
        init_json_subscriber(&level);
    } else {
        init_subscriber(&level);
    }

    let config = build_config(&args, &settings)?;
    info!(config = ?config, "starting runtime");
    let runtime = Runtime::new(config);
    runtime.start().await.context("Failed to start runtime")?;

    let (client, rx) = ChannelSessionClient::new();
    let printer = tokio::spawn(print_messages(rx));
    let session_id = runtime
        .connect_session(Arc::new(client), ConnectOptions::default())
        .context("Failed to connect session")?;
    info!(session_id = %session_id, "session connected; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    runtime.stop();
    runtime.stopped().await;

    // Closing the session drops the client, which ends the printer.
    if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer)
        .await
        .is_err()
    {
        warn!("stdout printer did not drain in time");
    }
    info!("bye");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}
