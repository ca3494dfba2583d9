//! repotap CLI: index published directories into a content-addressed store.

use anyhow::Result;
use clap::Parser;
use repotap::engine::Cli;
use repotap::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
