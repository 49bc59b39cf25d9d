use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use super::constants::{DEFAULT_PRINT_COMMAND, DEFAULT_PRINT_TIMEOUT_SECS};

#[derive(Debug, Clone)]
pub struct PrintParams {
    pub file_path: PathBuf,
    /// Printer name passed with `-P`; the system default printer when unset.
    pub printer: Option<String>,
    pub command: String,
    pub timeout: Duration,
}

impl PrintParams {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            printer: None,
            command: DEFAULT_PRINT_COMMAND.to_string(),
            timeout: Duration::from_secs(DEFAULT_PRINT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintOutput {
    pub file_path: PathBuf,
    pub printer: Option<String>,
    pub command_line: Vec<String>,
    pub output: String,
}
