//! Startup checks and the single-instance lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::{AgentConfig, ConfigError};
use crate::json_store::write_json_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticOutcome {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStatus {
    pub timestamp: DateTime<Utc>,
    pub status: DiagnosticOutcome,
    pub summary: String,
}

/// Exclusive advisory lock on `<root>/agent.lock`, released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;
        if file.try_lock_exclusive().is_err() {
            return Err(ConfigError::LockHeld {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Verify the environment before the loop starts. The outcome is written to
/// the diagnostic file either way.
pub fn run_startup_checks(config: &AgentConfig) -> Result<(), ConfigError> {
    let outcome = check_environment(config);
    let status = match &outcome {
        Ok(()) => DiagnosticStatus {
            timestamp: Utc::now(),
            status: DiagnosticOutcome::Ok,
            summary: "all startup checks passed".to_string(),
        },
        Err(err) => DiagnosticStatus {
            timestamp: Utc::now(),
            status: DiagnosticOutcome::Error,
            summary: err.to_string(),
        },
    };
    if let Err(err) = write_json_atomic(&config.paths.diagnostic_path, &status) {
        error!("failed to write diagnostic status: {}", err);
    }
    match &outcome {
        Ok(()) => info!("startup checks passed"),
        Err(err) => error!("startup checks failed: {}", err),
    }
    outcome
}

fn check_environment(config: &AgentConfig) -> Result<(), ConfigError> {
    config.paths.ensure_dirs()?;
    if config.openai_api_key.is_none() {
        return Err(ConfigError::MissingEnv {
            key: "OPENAI_API_KEY",
        });
    }
    let credentials = config.require_credentials_path()?;
    if !credentials.is_file() {
        return Err(ConfigError::MissingFile {
            path: credentials.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_store::read_json_file;
    use tempfile::TempDir;

    #[test]
    fn second_lock_on_same_root_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.lock");
        let first = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(ConfigError::LockHeld { .. })
        ));
        drop(first);
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn checks_record_error_then_ok() {
        let temp = TempDir::new().unwrap();
        let mut config = AgentConfig::with_root(temp.path());
        config.openai_api_key = Some("sk-test".to_string());
        config.credentials_path = Some(temp.path().join("credentials.json"));

        let err = run_startup_checks(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
        let status: DiagnosticStatus = read_json_file(&config.paths.diagnostic_path)
            .unwrap()
            .unwrap();
        assert_eq!(status.status, DiagnosticOutcome::Error);
        for dir in config.paths.directories() {
            assert!(dir.is_dir());
        }

        std::fs::write(temp.path().join("credentials.json"), "{}").unwrap();
        run_startup_checks(&config).unwrap();
        let status: DiagnosticStatus = read_json_file(&config.paths.diagnostic_path)
            .unwrap()
            .unwrap();
        assert_eq!(status.status, DiagnosticOutcome::Ok);
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let temp = TempDir::new().unwrap();
        let config = AgentConfig::with_root(temp.path());
        assert!(matches!(
            run_startup_checks(&config),
            Err(ConfigError::MissingEnv { key: "OPENAI_API_KEY" })
        ));
    }
}
