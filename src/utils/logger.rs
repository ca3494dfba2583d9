//! Structured logging via `log`/`env_logger`, with a `colored`-driven
//! formatter keyed to severity, plus small semantic color constants used
//! by the CLI's scan/hash summary output.

use colored::{Color, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Maps the config's `log_level` onto `log`'s five levels: `notice` is
/// carried as `info` with an explicit tag, `crit` as `error`.
pub fn level_filter_for(log_level: &str) -> LevelFilter {
    match log_level {
        "debug" => LevelFilter::Debug,
        "info" | "notice" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "err" | "crit" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Initializes the global logger. `level` is the config's (possibly
/// CLI-overridden) effective level; `verbose` is `-v`/`--verbose`, which
/// always wins over the configured level, matching CLI precedent.
pub fn setup_logging(level: LevelFilter, verbose: bool) {
    let effective = if verbose { LevelFilter::Debug } else { level };

    Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), effective)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .init();
}

/// Semantic colors for the CLI's end-of-run scan/hash summary.
pub struct Colors;

impl Colors {
    pub const ADDED: Color = Color::Green;
    pub const REMOVED: Color = Color::Red;
    pub const REHASHED: Color = Color::Yellow;

    pub fn colorize(color: Color, text: &str) -> String {
        text.color(color).to_string()
    }
}
