pub mod config;
pub mod logger;

pub use logger::{Colors, level_filter_for, setup_logging};
