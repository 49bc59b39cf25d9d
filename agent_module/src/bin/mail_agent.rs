use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_module::startup::{run_startup_checks, InstanceLock};
use agent_module::telemetry::init_tracing;
use agent_module::{build_agent, AgentConfig};
use tokio::task;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AgentConfig::from_env()?;
    if let Err(err) = init_tracing(&config.paths.logs_dir, "agent.log") {
        eprintln!("file logging unavailable: {err}");
        tracing_subscriber::fmt().with_target(false).init();
    }

    run_startup_checks(&config)?;
    let _lock = InstanceLock::acquire(&config.paths.lock_path)?;
    for suffix in &config.print_suffixes {
        if !print_task_module::is_supported_suffix(suffix) {
            warn!("{} files are routed to the printer but lpr will reject them", suffix);
        }
    }
    info!("Launching {} in {}", config.agent_name, config.paths.root.display());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let loop_flag = stop_flag.clone();
    let mut worker = task::spawn_blocking(move || -> Result<(), BoxError> {
        let mut agent = build_agent(config)?;
        agent.run_loop(&loop_flag);
        Ok(())
    });

    tokio::select! {
        joined = &mut worker => return finish(joined),
        _ = shutdown_signal() => {
            warn!("Shutdown requested; stopping after the current step.");
            stop_flag.store(true, Ordering::Relaxed);
        }
    }
    finish(worker.await)
}

fn finish(joined: Result<Result<(), BoxError>, task::JoinError>) -> Result<(), BoxError> {
    match joined {
        Ok(Ok(())) => {
            info!("Main loop exited.");
            Ok(())
        }
        Ok(Err(err)) => {
            error!("agent failed: {}", err);
            Err(err)
        }
        Err(err) => {
            error!("agent thread failed: {}", err);
            Err(err.into())
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
