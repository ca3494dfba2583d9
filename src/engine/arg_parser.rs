//! CLI argument schema.

use clap::Parser;
use std::path::PathBuf;

/// Local content-addressed repository indexer: scans published directory
/// trees, BLAKE3-hashes every file into an embedded store, and writes
/// peer-syncable manifests.
#[derive(Clone, Parser)]
#[command(name = "repotap")]
#[command(about = "Index published directories into a content-addressed store and write sync manifests.")]
pub struct Cli {
    /// Store directory. Default: $STORE, else an XDG/app-data location.
    #[arg(long, short)]
    pub store: Option<PathBuf>,

    /// Number of hasher threads. Default: value from config, or auto.
    #[arg(long)]
    pub hash_threads: Option<usize>,

    /// BLAKE3 piece size in bytes (power of two, >= 1024).
    #[arg(long)]
    pub piece_size: Option<u64>,

    /// One of debug/info/notice/warn/err/crit. Default: value from config.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Verbose output; always overrides the configured log level.
    #[arg(long, short)]
    pub verbose: bool,

    /// Scan and hash but skip the manifest write.
    #[arg(long)]
    pub dry_run: bool,
}
