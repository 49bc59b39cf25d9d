//! Routes analysis results to the print action by file suffix.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use print_task_module::{print_file, PrintParams};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::analyzer::AnalysisResult;
use crate::config::AgentConfig;
use crate::extract::filetype;
use crate::unhandled::{UnhandledEntry, UnhandledLog, UnhandledReason};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// External side effect applied to a routed file.
pub trait DispatchAction {
    fn name(&self) -> &str;

    /// Returns a short description of what was done, for the log.
    fn execute(&self, path: &Path) -> Result<String, BoxError>;
}

impl<A: DispatchAction + ?Sized> DispatchAction for &A {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&self, path: &Path) -> Result<String, BoxError> {
        (**self).execute(path)
    }
}

/// Sends files to the system print queue.
#[derive(Debug, Clone)]
pub struct LprAction {
    pub printer: Option<String>,
    pub command: String,
    pub timeout: Duration,
}

impl LprAction {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            printer: config.printer_name.clone(),
            command: config.print_command.clone(),
            timeout: config.print_timeout,
        }
    }
}

impl DispatchAction for LprAction {
    fn name(&self) -> &str {
        "print"
    }

    fn execute(&self, path: &Path) -> Result<String, BoxError> {
        let mut params = PrintParams::new(path);
        params.printer = self.printer.clone();
        params.command = self.command.clone();
        params.timeout = self.timeout;
        let output = print_file(&params)?;
        Ok(output.command_line.join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub archived: usize,
    pub unrouted: usize,
    pub failed: usize,
}

pub struct Dispatcher<'a, A: DispatchAction + ?Sized> {
    action: &'a A,
    config: &'a AgentConfig,
}

impl<'a, A: DispatchAction + ?Sized> Dispatcher<'a, A> {
    pub fn new(action: &'a A, config: &'a AgentConfig) -> Self {
        Self { action, config }
    }

    pub fn routes(&self, path: &Path) -> bool {
        let suffix = format!(".{}", filetype(path));
        self.config
            .print_suffixes
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&suffix))
    }

    /// Invoke the action once per routed result. Outcomes are logged, not retried.
    pub fn dispatch(
        &self,
        results: &[AnalysisResult],
        unhandled: &mut UnhandledLog,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for result in results {
            let filename = result.filename();
            let entry = |reason: UnhandledReason, detail: String| {
                UnhandledEntry::new(filename.clone(), reason)
                    .with_filetype(filetype(&result.file_path))
                    .with_detail(detail)
                    .with_context(&result.subject, &result.sender)
            };

            if !self.routes(&result.file_path) {
                report.unrouted += 1;
                unhandled.record(entry(
                    UnhandledReason::NoRoute,
                    format!("no action for category `{}`", result.category),
                ));
                continue;
            }

            match self.action.execute(&result.file_path) {
                Ok(summary) => {
                    report.dispatched += 1;
                    info!("{} {}: {}", self.action.name(), filename, summary);
                    match archive_file(&result.file_path, &self.config.paths.archive_dir) {
                        Ok(target) => {
                            report.archived += 1;
                            info!("archived {} -> {}", filename, target.display());
                        }
                        Err(err) => warn!("failed to archive {}: {}", filename, err),
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    error!("{} failed for {}: {}", self.action.name(), filename, err);
                    unhandled.record(entry(UnhandledReason::ActionFailed, err.to_string()));
                }
            }
        }

        if let Err(err) = unhandled.flush() {
            error!("failed to save unhandled list: {}", err);
        }
        report
    }
}

/// Move `path` into `archive_dir`, copying when a rename is not possible.
pub fn archive_file(path: &Path, archive_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(archive_dir)?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let target = archive_dir.join(name);
    if fs::rename(path, &target).is_err() {
        fs::copy(path, &target)?;
        fs::remove_file(path)?;
    }
    Ok(target)
}
