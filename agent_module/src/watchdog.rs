//! Restarts the agent when its heartbeat goes missing or stale.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, ConfigError};
use crate::heartbeat::{read_heartbeat, HeartbeatStatus};

const DEFAULT_MAX_HEARTBEAT_AGE_SECS: u64 = 120;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
const AGENT_BINARY: &str = "mail-agent";

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub heartbeat_path: PathBuf,
    pub logs_dir: PathBuf,
    pub max_heartbeat_age: Duration,
    pub check_interval: Duration,
    pub agent_command: Vec<String>,
}

impl WatchdogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent = AgentConfig::from_env()?;
        let max_age = env_u64("WATCHDOG_MAX_HEARTBEAT_AGE_SECS", DEFAULT_MAX_HEARTBEAT_AGE_SECS);
        let interval = env_u64("WATCHDOG_CHECK_INTERVAL_SECS", DEFAULT_CHECK_INTERVAL_SECS);
        let agent_command = match env::var("WATCHDOG_AGENT_CMD") {
            Ok(raw) if !raw.trim().is_empty() => {
                raw.split_whitespace().map(str::to_string).collect()
            }
            _ => vec![default_agent_binary()
                .to_string_lossy()
                .into_owned()],
        };
        Ok(Self {
            heartbeat_path: agent.paths.heartbeat_path,
            logs_dir: agent.paths.logs_dir,
            max_heartbeat_age: Duration::from_secs(max_age),
            check_interval: Duration::from_secs(interval),
            agent_command,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// `mail-agent` next to the running executable, or on `PATH`.
fn default_agent_binary() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(AGENT_BINARY)))
        .filter(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(AGENT_BINARY))
}

/// Missing heartbeats count as stale.
pub fn is_stale(heartbeat: Option<&HeartbeatStatus>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match heartbeat {
        Some(status) => status.age(now) > max_age,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Restarted,
    RestartFailed,
}

pub struct Watchdog {
    config: WatchdogConfig,
    child: Option<Child>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn check_once(&mut self) -> CheckOutcome {
        let heartbeat = match read_heartbeat(&self.config.heartbeat_path) {
            Ok(heartbeat) => heartbeat,
            Err(err) => {
                error!("Failed to read heartbeat: {}", err);
                None
            }
        };
        if !is_stale(heartbeat.as_ref(), Utc::now(), self.config.max_heartbeat_age) {
            debug!("Heartbeat OK.");
            return CheckOutcome::Healthy;
        }

        warn!("Heartbeat stale or missing. Restarting agent...");
        self.stop_child();
        match self.spawn_agent() {
            Ok(child) => {
                info!("Agent restarted with PID {}", child.id());
                self.child = Some(child);
                CheckOutcome::Restarted
            }
            Err(err) => {
                error!(
                    "failed to start agent {:?}: {}",
                    self.config.agent_command, err
                );
                CheckOutcome::RestartFailed
            }
        }
    }

    pub fn run(&mut self, stop_flag: &AtomicBool) {
        info!(
            "Starting watchdog (max heartbeat age {}s, check every {}s)",
            self.config.max_heartbeat_age.as_secs(),
            self.config.check_interval.as_secs()
        );
        while !stop_flag.load(Ordering::Relaxed) {
            self.check_once();
            let mut waited = Duration::ZERO;
            while waited < self.config.check_interval && !stop_flag.load(Ordering::Relaxed) {
                let slice = Duration::from_secs(1).min(self.config.check_interval - waited);
                thread::sleep(slice);
                waited += slice;
            }
        }
        info!("watchdog stopped");
    }

    /// Terminate the previously spawned agent if it is still running.
    fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!("previous agent already exited: {}", status),
            _ => {
                info!("Terminating old agent process {}...", child.id());
                if let Err(err) = child.kill() {
                    warn!("failed to terminate agent {}: {}", child.id(), err);
                }
                let _ = child.wait();
            }
        }
    }

    fn spawn_agent(&self) -> io::Result<Child> {
        let (program, args) = self.config.agent_command.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "agent command is empty")
        })?;
        Command::new(program).args(args).spawn()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(child) = &self.child {
            info!("leaving agent {} running", child.id());
        }
    }
}
