mod constants;
mod core;
mod errors;
mod types;
mod utils;

pub use constants::{DEFAULT_PRINT_COMMAND, PRINTER_FLAG, SUPPORTED_SUFFIXES};
pub use core::{build_print_command, is_supported_suffix, print_file};
pub use errors::PrintTaskError;
pub use types::{PrintOutput, PrintParams};
