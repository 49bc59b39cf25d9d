use std::io;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::constants::OUTPUT_TAIL_CHARS;
use super::errors::PrintTaskError;

pub(super) fn tail_string(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut start = trimmed.len().saturating_sub(max_len);
    while start < trimmed.len() && !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

pub(super) fn combined_output(output: &Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

pub(super) fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<Output, PrintTaskError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => PrintTaskError::CommandNotFound {
            command: label.to_string(),
        },
        _ => PrintTaskError::Io(err),
    })?;
    let start = Instant::now();

    loop {
        if child.try_wait()?.is_some() {
            return Ok(child.wait_with_output()?);
        }

        if start.elapsed() >= timeout {
            let _ = child.kill();
            let output = child.wait_with_output()?;
            return Err(PrintTaskError::CommandTimeout {
                command: label.to_string(),
                timeout_secs: timeout.as_secs(),
                output: tail_string(&combined_output(&output), OUTPUT_TAIL_CHARS),
            });
        }

        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_string_keeps_the_end() {
        assert_eq!(tail_string("  short  ", 10), "short");
        assert_eq!(tail_string("abcdefghij", 4), "ghij");
    }

    #[test]
    fn tail_string_respects_char_boundaries() {
        let tail = tail_string("ééééé", 3);
        assert_eq!(tail, "é");
    }
}
