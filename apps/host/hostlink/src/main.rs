use hostlink::error::HostlinkError;
use hostlink::executor::LoopbackExecutor;
use hostlink::host_loop::HostLoop;
use hostlink::logger::initialize as LoggerInitialize;
use hostlink::paths::HostPaths;

use agent_core::AgentContext;
use agent_core::config::{AgentConfig, load_dotenv};

use std::io::{BufRead, stdin};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

const QUIT_COMMAND: &str = "quit";

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The logger may not be up yet
            eprintln!("{e}");
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Usage: `hostlink [base-dir]`. Type `quit` to stop.
fn run() -> Result<(), HostlinkError> {
    let base_dir = std::env::args_os().nth(1).map(PathBuf::from);
    let paths = HostPaths::resolve(base_dir.as_deref())?;

    // Initialize logger FIRST
    LoggerInitialize(&paths.log_dir)?;

    info!("Hostlink starting");
    info!("Config directory: {}", paths.config_dir.display());
    info!("Log directory: {}", paths.log_dir.display());

    load_dotenv();

    let mut config = AgentConfig::load(&paths.config_dir)?;
    config.apply_env_overrides()?;

    let tick_interval = Duration::from_millis(config.host.tick_interval_ms);
    let mut context = AgentContext::new(config);
    let local_addr = context.start()?;
    info!("Waiting for a controller on {local_addr}");

    let mut dispatcher = context.dispatcher(LoopbackExecutor::new());
    let host_loop = HostLoop::new(tick_interval);
    watch_stdin(host_loop.stop_handle());

    host_loop.run(&mut dispatcher, context.inbound());

    context.shutdown();
    info!("Hostlink stopped");
    Ok(())
}

/// Sets `stop` when stdin reads `quit`.
///
/// EOF on stdin (e.g. when run as a service) leaves the host running until the
/// process is terminated.
fn watch_stdin(stop: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name(String::from("hostlink-stdin"))
        .spawn(move || {
            for line in stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim() == QUIT_COMMAND => {
                        info!("Stop requested");
                        stop.store(true, Ordering::SeqCst);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Reading stdin failed: {e}");
                        return;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn stdin watcher, stop the process to exit: {e}");
    }
}
