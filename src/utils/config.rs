//! Tuning constants and store-relative path helpers.

use std::sync::OnceLock;

/// Package-derived names, built once from `CARGO_PKG_NAME`.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: &'static str,
    db_dirname: &'static str,
    obj_dirname: &'static str,
    log_filename: &'static str,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| PackagePaths {
            pkg_name: env!("CARGO_PKG_NAME"),
            config_filename: "config",
            db_dirname: "db",
            obj_dirname: "obj",
            log_filename: "log",
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn config_filename(&self) -> &str {
        self.config_filename
    }

    pub fn db_dirname(&self) -> &str {
        self.db_dirname
    }

    pub fn obj_dirname(&self) -> &str {
        self.obj_dirname
    }

    pub fn log_filename(&self) -> &str {
        self.log_filename
    }
}

/// Initial LMDB map size: 32 MiB.
pub const INITIAL_MAP_SIZE: usize = 32 * 1024 * 1024;

/// Default BLAKE3 piece size: 1 MiB. Must stay a power of two, a multiple
/// of the BLAKE3 chunk length, and >= 1024.
pub const DEFAULT_PIECE_SIZE: u64 = 1024 * 1024;

/// Default manifest write-throttle interval in seconds.
pub const DEFAULT_MANIFEST_INTERVAL_SECS: u64 = 300;

/// Bounded hash queue cache capacity.
pub const HASH_QUEUE_CACHE_CAPACITY: usize = 100;

/// Default hasher thread count ceiling when not configured explicitly.
pub const DEFAULT_MAX_HASH_THREADS: usize = 4;
