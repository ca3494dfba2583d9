//! Public types: the JSON configuration schema and the process-wide
//! `Engine` handle grouping the store, hash queue, and mount tree.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::mount::MountTree;
use crate::queue::HashQueue;
use crate::store::Store;

/// One `published_paths` entry: a validated virtual path paired with the
/// absolute filesystem path it publishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishedPath {
    #[serde(rename = "virtual")]
    pub virtual_path: String,
    pub fs: PathBuf,
}

/// The JSON configuration object read from `<store>/config`, layered under
/// CLI overrides the way the teacher's own config loading layers
/// `.nefaxer.toml` under explicit CLI flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of hasher threads. `None` means auto: `min(4, cpu_count)`.
    pub hash_threads: Option<usize>,
    /// BLAKE3 piece size in bytes: power of two, >= 1024.
    pub blake3_piece_size: u64,
    /// One of debug/info/notice/warn/err/crit.
    pub log_level: String,
    pub published_paths: Vec<PublishedPath>,
    /// Manifest write-throttle interval in seconds.
    pub manifest_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hash_threads: None,
            blake3_piece_size: 1024 * 1024,
            log_level: "info".to_string(),
            published_paths: Vec::new(),
            manifest_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.blake3_piece_size.is_power_of_two() || self.blake3_piece_size < 1024 {
            return Err(crate::Error::ConfigInvalid(format!(
                "blake3_piece_size must be a power of two >= 1024, got {}",
                self.blake3_piece_size
            )));
        }
        if let Some(n) = self.hash_threads
            && n == 0
        {
            return Err(crate::Error::ConfigInvalid("hash_threads must be >= 1".into()));
        }
        if self.manifest_interval_secs == 0 {
            return Err(crate::Error::ConfigInvalid("manifest_interval_secs must be >= 1".into()));
        }
        const VALID_LEVELS: &[&str] = &["debug", "info", "notice", "warn", "err", "crit"];
        if !VALID_LEVELS.contains(&self.log_level.as_str()) {
            return Err(crate::Error::ConfigInvalid(format!("unrecognized log_level: {}", self.log_level)));
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.published_paths {
            if !p.fs.is_absolute() {
                return Err(crate::Error::ConfigInvalid(format!("published_paths.fs must be absolute: {}", p.fs.display())));
            }
            if !seen.insert(p.virtual_path.clone()) {
                return Err(crate::Error::ConfigInvalid(format!("duplicate published virtual path: {}", p.virtual_path)));
            }
        }
        Ok(())
    }

    pub fn effective_hash_threads(&self) -> usize {
        self.hash_threads.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(4))
    }
}

/// Groups the process-wide state this crate would otherwise need to hold
/// in statics: the store, the mount tree built from configuration, and the
/// hash queue's cache/counters/resume cursor. Threaded explicitly through
/// the scanner, hasher pool, and manifest writer rather than held globally.
pub struct Engine {
    pub store: Store,
    pub mounts: MountTree,
    pub queue: Mutex<HashQueue>,
    pub config: Config,
}

impl Engine {
    pub fn new(store: Store, mounts: MountTree, config: Config) -> Self {
        Engine { store, mounts, queue: Mutex::new(HashQueue::new()), config }
    }
}
