use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use super::constants::{OUTPUT_TAIL_CHARS, PRINTER_FLAG, SUPPORTED_SUFFIXES};
use super::errors::PrintTaskError;
use super::types::{PrintOutput, PrintParams};
use super::utils::{combined_output, run_command_with_timeout, tail_string};

/// Send one file to the printer and wait for the print command to exit.
pub fn print_file(params: &PrintParams) -> Result<PrintOutput, PrintTaskError> {
    let path = params.file_path.as_path();
    if !path.is_file() {
        return Err(PrintTaskError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let suffix = file_suffix(path);
    if !is_supported_suffix(&suffix) {
        return Err(PrintTaskError::UnsupportedFile {
            path: path.to_path_buf(),
            suffix,
        });
    }

    let command_line = build_print_command(params);
    debug!("running print command: {:?}", command_line);

    let mut cmd = Command::new(&command_line[0]);
    cmd.args(&command_line[1..]);
    let output = run_command_with_timeout(cmd, params.timeout, &params.command)?;
    let tail = tail_string(&combined_output(&output), OUTPUT_TAIL_CHARS);

    if !output.status.success() {
        return Err(PrintTaskError::PrintFailed {
            status: output.status.code(),
            output: tail,
        });
    }

    info!(
        "sent {} to printer {}",
        path.display(),
        params.printer.as_deref().unwrap_or("(default)")
    );
    Ok(PrintOutput {
        file_path: path.to_path_buf(),
        printer: params.printer.clone(),
        command_line,
        output: tail,
    })
}

/// The argv used for `params`: `<command> [-P <printer>] <path>`.
pub fn build_print_command(params: &PrintParams) -> Vec<String> {
    let command = normalize_command(&params.command);
    let mut argv = vec![command];
    if let Some(printer) = params
        .printer
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        argv.push(PRINTER_FLAG.to_string());
        argv.push(printer.to_string());
    }
    argv.push(params.file_path.to_string_lossy().into_owned());
    argv
}

pub fn is_supported_suffix(suffix: &str) -> bool {
    let lowered = suffix.to_ascii_lowercase();
    SUPPORTED_SUFFIXES.iter().any(|known| *known == lowered)
}

fn file_suffix(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn normalize_command(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        super::constants::DEFAULT_PRINT_COMMAND.to_string()
    } else {
        trimmed.to_string()
    }
}
