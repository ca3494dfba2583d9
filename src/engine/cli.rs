//! CLI command handler: loads configuration, builds the engine, and runs
//! one scan + hash + manifest-write cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};

use crate::engine::arg_parser::Cli;
use crate::engine::tools::{print_summary, setup_ctrlc_handler};
use crate::mount::MountTree;
use crate::store::Store;
use crate::types::{Config, Engine};
use crate::utils::config::{INITIAL_MAP_SIZE, PackagePaths};
use crate::utils::{level_filter_for, setup_logging};

fn resolve_store_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.store {
        return Ok(if path.is_absolute() { path.clone() } else { std::env::current_dir()?.join(path) });
    }
    if let Ok(from_env) = std::env::var("STORE") {
        return Ok(PathBuf::from(from_env));
    }
    let app = PackagePaths::get().pkg_name();
    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(app));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".config").join(app));
    }
    anyhow::bail!("could not determine a store directory; pass --store explicitly")
}

fn load_config(store_dir: &Path, cli: &Cli) -> Result<Config> {
    let config_path = store_dir.join(PackagePaths::get().config_filename());
    let mut config: Config = match fs::read_to_string(&config_path) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parse config at {}", config_path.display()))?,
        Err(_) => Config::default(),
    };

    if let Some(threads) = cli.hash_threads {
        config.hash_threads = Some(threads);
    }
    if let Some(size) = cli.piece_size {
        config.blake3_piece_size = size;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    config.validate().map_err(anyhow::Error::from)?;
    Ok(config)
}

fn build_mounts(config: &Config) -> MountTree {
    let mut mounts = MountTree::new();
    for published in &config.published_paths {
        mounts.mount(&published.virtual_path, published.fs.clone());
    }
    mounts
}

/// Runs the default cycle: scan every published path, hash the resulting
/// queue, then write the manifest (unless `--dry-run`). Checks the Ctrl+C
/// flag between phases only; none of the three is cancellable mid-flight.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let store_dir = resolve_store_dir(cli)?;
    fs::create_dir_all(&store_dir).with_context(|| format!("create store directory {}", store_dir.display()))?;

    let config = load_config(&store_dir, cli)?;
    setup_logging(level_filter_for(&config.log_level), cli.verbose);

    let cancel_requested = setup_ctrlc_handler()?;

    let store = Store::open(&store_dir.join(PackagePaths::get().db_dirname()), INITIAL_MAP_SIZE)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("open store at {}", store_dir.display()))?;
    let mounts = build_mounts(&config);
    let engine = Engine::new(store, mounts, config);

    for published in &engine.config.published_paths {
        crate::scanner::scan(&engine, &published.virtual_path).map_err(anyhow::Error::from)?;
    }

    if cancel_requested.load(Ordering::Relaxed) {
        log::warn!("cancellation requested after scan; stopping before hashing");
        return Ok(());
    }

    engine.queue.lock().expect("hash queue mutex poisoned").populate(&engine.store).map_err(anyhow::Error::from)?;

    crate::hasher::run_pool(
        &engine.store,
        &engine.mounts,
        &engine.queue,
        engine.config.effective_hash_threads(),
        engine.config.blake3_piece_size,
    );

    if cli.dry_run {
        log::info!("dry run: skipping manifest write");
        return Ok(());
    }
    if cancel_requested.load(Ordering::Relaxed) {
        log::warn!("cancellation requested after hashing; stopping before manifest write");
        return Ok(());
    }

    let obj_dir = store_dir.join(PackagePaths::get().obj_dirname());
    crate::manifest::write_now(&engine, &obj_dir).map_err(anyhow::Error::from)?;

    print_summary(&engine)
}
