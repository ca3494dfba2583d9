//! CLI-facing helpers: a Ctrl+C flag checked between top-level phases (not
//! mid-operation), and the end-of-run summary line.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::store::TxnMode;
use crate::store::keys;
use crate::types::Engine;
use crate::utils::Colors;

/// Installs a Ctrl+C handler that only flips a flag; callers check it
/// between phases (scan, then hash, then manifest write) rather than
/// aborting mid-operation, since none of those phases are cancellable once
/// started.
pub fn setup_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let cancel_requested = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;
    Ok(cancel_requested)
}

/// Logs a one-line summary of the current hash-list size, colored the way
/// the teacher's own diff summary was.
pub fn print_summary(engine: &Engine) -> Result<()> {
    let count = engine
        .store
        .transact(TxnMode::ReadOnly, |txn| {
            Ok(txn
                .get(&keys::header_key(keys::HDR_HASH_LIST_COUNT))?
                .map(|v| u64::from_le_bytes(v[..8].try_into().unwrap()))
                .unwrap_or(0))
        })
        .map_err(anyhow::Error::from)?;

    log::info!("{}", Colors::colorize(Colors::ADDED, &format!("{count} hashed files indexed")));
    Ok(())
}
