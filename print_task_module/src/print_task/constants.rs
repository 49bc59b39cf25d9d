pub const DEFAULT_PRINT_COMMAND: &str = "lpr";
pub const PRINTER_FLAG: &str = "-P";
pub const SUPPORTED_SUFFIXES: &[&str] = &[".pdf", ".html"];
pub(super) const DEFAULT_PRINT_TIMEOUT_SECS: u64 = 60;
pub(super) const OUTPUT_TAIL_CHARS: usize = 2000;
