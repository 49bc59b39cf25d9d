use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::json_store::{read_json_file, write_json_atomic, StoreError};

pub const HEARTBEAT_ALIVE: &str = "alive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub agent_name: String,
    pub state: AgentState,
    pub cycles_completed: u64,
}

impl HeartbeatStatus {
    pub fn alive(agent_name: &str, state: AgentState, cycles_completed: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            status: HEARTBEAT_ALIVE.to_string(),
            agent_name: agent_name.to_string(),
            state,
            cycles_completed,
        }
    }

    /// Time since the heartbeat was written; zero for timestamps in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

pub fn write_heartbeat(path: &Path, status: &HeartbeatStatus) -> Result<(), StoreError> {
    write_json_atomic(path, status)
}

/// `Ok(None)` when no heartbeat has been written yet.
pub fn read_heartbeat(path: &Path) -> Result<Option<HeartbeatStatus>, StoreError> {
    read_json_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn heartbeat_is_overwritten_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("heartbeat").join("agent.status.json");
        assert_eq!(read_heartbeat(&path).unwrap(), None);

        write_heartbeat(&path, &HeartbeatStatus::alive("basic-agent", AgentState::Running, 0)).unwrap();
        write_heartbeat(&path, &HeartbeatStatus::alive("basic-agent", AgentState::Idle, 1)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["status"], "alive");
        assert_eq!(raw["state"], "idle");
        assert_eq!(raw["cycles_completed"], 1);
    }

    #[test]
    fn age_is_measured_from_timestamp() {
        let mut status = HeartbeatStatus::alive("a", AgentState::Idle, 0);
        let now = Utc::now();
        status.timestamp = now - chrono::Duration::seconds(130);
        assert_eq!(status.age(now), Duration::from_secs(130));
        status.timestamp = now + chrono::Duration::seconds(5);
        assert_eq!(status.age(now), Duration::ZERO);
    }
}
