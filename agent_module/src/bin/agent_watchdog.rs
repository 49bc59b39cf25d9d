use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_module::telemetry::init_tracing;
use agent_module::watchdog::{Watchdog, WatchdogConfig};
use tokio::task;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = WatchdogConfig::from_env()?;
    if let Err(err) = init_tracing(&config.logs_dir, "watchdog.log") {
        eprintln!("file logging unavailable: {err}");
        tracing_subscriber::fmt().with_target(false).init();
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let loop_flag = stop_flag.clone();
    let worker = task::spawn_blocking(move || {
        let mut watchdog = Watchdog::new(config);
        watchdog.run(&loop_flag);
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested.");
    stop_flag.store(true, Ordering::Relaxed);
    worker.await?;
    Ok(())
}
