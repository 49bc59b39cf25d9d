use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum PrintTaskError {
    Io(io::Error),
    FileNotFound {
        path: PathBuf,
    },
    UnsupportedFile {
        path: PathBuf,
        suffix: String,
    },
    CommandNotFound {
        command: String,
    },
    CommandTimeout {
        command: String,
        timeout_secs: u64,
        output: String,
    },
    PrintFailed {
        status: Option<i32>,
        output: String,
    },
}

impl fmt::Display for PrintTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintTaskError::Io(err) => write!(f, "I/O error: {}", err),
            PrintTaskError::FileNotFound { path } => {
                write!(f, "File not found: {}", path.display())
            }
            PrintTaskError::UnsupportedFile { path, suffix } => write!(
                f,
                "Unsupported file type {:?} for printing: {}",
                suffix,
                path.display()
            ),
            PrintTaskError::CommandNotFound { command } => {
                write!(f, "Print command not found on PATH: {}", command)
            }
            PrintTaskError::CommandTimeout {
                command,
                timeout_secs,
                output,
            } => write!(
                f,
                "{} timed out after {}s. Output tail:\n{}",
                command, timeout_secs, output
            ),
            PrintTaskError::PrintFailed { status, output } => write!(
                f,
                "Print command failed (status: {:?}). Output tail:\n{}",
                status, output
            ),
        }
    }
}

impl std::error::Error for PrintTaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PrintTaskError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PrintTaskError {
    fn from(err: io::Error) -> Self {
        PrintTaskError::Io(err)
    }
}
