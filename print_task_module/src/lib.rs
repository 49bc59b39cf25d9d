mod print_task;

pub use print_task::*;
