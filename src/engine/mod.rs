//! Engine module: CLI argument schema and the command handler that wires
//! the scanner, hasher pool, and manifest writer together.

pub mod arg_parser;
pub mod cli;
pub mod tools;

pub use arg_parser::Cli;
pub use cli::handle_run;
pub use tools::{print_summary, setup_ctrlc_handler};
