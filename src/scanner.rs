//! Merge-reconcile scanner: brings the persisted directory tree in line
//! with the live filesystem in one linear pass per directory level.
//!
//! The recursion implied by a directory tree is expressed as an explicit
//! LIFO stack of pending (directory id, virtual path) pairs rather than
//! program-stack recursion, to bound stack depth on deep trees. Each
//! persisted directory's own reconciliation runs in one read-write
//! transaction; `Store::transact` retries it on map-capacity signals.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::Error;
use crate::mount::MountTree;
use crate::path::is_valid_entry_name;
use crate::queue::HashQueue;
use crate::store::cursor::{DirectoryCursor, HashPathCursor};
use crate::store::keys::{self, DirEntry};
use crate::store::{Store, Txn, TxnMode};
use crate::types::Engine;

struct ListedEntry {
    name: Vec<u8>,
    fs_name: OsString,
}

enum ExpectedKind {
    Dir,
    File { lastmod: i64, size: u64 },
}

struct ExpectedItem {
    name: Vec<u8>,
    kind: ExpectedKind,
}

fn join_virtual(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}/{name}") }
}

#[cfg(unix)]
fn mtime_seconds(meta: &fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime()
}

#[cfg(not(unix))]
fn mtime_seconds(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Lists one filesystem directory, skipping symlinks, non-regular/
/// non-directory entries, and names the filter rejects (each skip logged
/// at info level), and separates the result into directory and file name
/// lists.
fn list_directory(fs_path: &Path) -> Result<(Vec<ListedEntry>, Vec<ListedEntry>), Error> {
    let read_dir = fs::read_dir(fs_path).map_err(|e| Error::IoSkippable { path: fs_path.to_path_buf(), reason: e.to_string() })?;

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", fs_path.display());
                continue;
            }
        };
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!("stat failed for {}: {e}", entry.path().display());
                continue;
            }
        };
        if file_type.is_symlink() {
            continue;
        }
        let name = entry.file_name();
        if !is_valid_entry_name(&name) {
            info!("skipping invalid entry name: {name:?}");
            continue;
        }
        let name_bytes = name.to_string_lossy().as_bytes().to_vec();
        if file_type.is_dir() {
            dirs.push(ListedEntry { name: name_bytes, fs_name: name });
        } else if file_type.is_file() {
            files.push(ListedEntry { name: name_bytes, fs_name: name });
        } else {
            info!("skipping non-regular entry: {name:?}");
        }
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((dirs, files))
}

/// Merges directory names (from the filesystem listing and from any
/// virtual-only mount children) and file names (from the filesystem
/// listing alone) into one name-ordered sequence, ties broken in favor of
/// directories, matching the design's join rule.
fn merge_expected(dir_names: BTreeSet<Vec<u8>>, files: Vec<(Vec<u8>, i64, u64)>) -> Vec<ExpectedItem> {
    let mut items: Vec<ExpectedItem> = Vec::with_capacity(dir_names.len() + files.len());
    for name in dir_names {
        items.push(ExpectedItem { name, kind: ExpectedKind::Dir });
    }
    for (name, lastmod, size) in files {
        items.push(ExpectedItem { name, kind: ExpectedKind::File { lastmod, size } });
    }
    items.sort_by(|a, b| {
        a.name.cmp(&b.name).then_with(|| match (&a.kind, &b.kind) {
            (ExpectedKind::Dir, ExpectedKind::File { .. }) => Ordering::Less,
            (ExpectedKind::File { .. }, ExpectedKind::Dir) => Ordering::Greater,
            _ => Ordering::Equal,
        })
    });
    items
}

/// Walks the whole published tree from `root_virtual`, reconciling one
/// persisted directory per transaction, depth-first, via an explicit
/// stack of (directory id, virtual path) frames still to visit.
pub fn scan(engine: &Engine, root_virtual: &str) -> Result<(), Error> {
    let mut stack: Vec<(u64, String)> = vec![(keys::ROOT_DIR_ID, root_virtual.to_string())];

    while let Some((dir_id, virtual_path)) = stack.pop() {
        let children = reconcile_one_directory(engine, dir_id, &virtual_path)?;
        for (name, child_id) in children.into_iter().rev() {
            let child_virtual = join_virtual(&virtual_path, &String::from_utf8_lossy(&name));
            stack.push((child_id, child_virtual));
        }
    }
    Ok(())
}

fn reconcile_one_directory(engine: &Engine, dir_id: u64, virtual_path: &str) -> Result<Vec<(Vec<u8>, u64)>, Error> {
    let fs_path = engine.mounts.virtual_to_fs(virtual_path);
    let mount_node = engine.mounts.subdir(virtual_path);

    let (fs_dirs, fs_files) = match &fs_path {
        Some(p) if p.is_dir() => list_directory(p)?,
        Some(p) if p.exists() => {
            warn!("published path is not a directory: {}", p.display());
            (Vec::new(), Vec::new())
        }
        _ => (Vec::new(), Vec::new()),
    };

    let mut dir_names: BTreeSet<Vec<u8>> = fs_dirs.iter().map(|e| e.name.clone()).collect();
    if let Some(node) = mount_node {
        for child in node.child_names() {
            dir_names.insert(child.as_bytes().to_vec());
        }
    }

    let mut file_items = Vec::new();
    for f in &fs_files {
        if dir_names.contains(&f.name) {
            info!("mount point shadows file entry, skipping file: {:?}", f.fs_name);
            continue;
        }
        let full_path = fs_path.as_ref().expect("file listed implies fs_path present").join(&f.fs_name);
        let meta = match fs::symlink_metadata(&full_path) {
            Ok(m) => m,
            Err(e) => {
                warn!("stat failed for {}: {e}", full_path.display());
                continue;
            }
        };
        file_items.push((f.name.clone(), mtime_seconds(&meta), meta.len()));
    }

    let expected = merge_expected(dir_names, file_items);

    let mut queue = engine.queue.lock().expect("hash queue mutex poisoned");
    engine
        .store
        .transact(TxnMode::ReadWrite, |txn| reconcile_transaction(txn, &mut queue, dir_id, virtual_path, &expected))
}

fn reconcile_transaction(
    txn: &mut Txn,
    queue: &mut HashQueue,
    dir_id: u64,
    dir_virtual_path: &str,
    expected: &[ExpectedItem],
) -> Result<Vec<(Vec<u8>, u64)>, Error> {
    let mut cur = DirectoryCursor::open(txn, dir_id)?;
    let mut ei = 0usize;
    let mut resolved_dirs = Vec::new();

    loop {
        let expected_item = expected.get(ei);
        let ent_name = cur.peek_name().map(|n| n.to_vec());

        match (expected_item, ent_name.as_deref()) {
            (None, None) => break,
            (Some(item), None) => {
                insert_expected(txn, dir_id, item, &mut resolved_dirs)?;
                ei += 1;
            }
            (None, Some(_)) => {
                let (name, value) = cur.step().unwrap();
                delete_cascade(txn, dir_id, dir_virtual_path, &name, DirEntry::decode(&value)?, queue)?;
            }
            (Some(item), Some(ent_bytes)) => match item.name.as_slice().cmp(ent_bytes) {
                Ordering::Less => {
                    insert_expected(txn, dir_id, item, &mut resolved_dirs)?;
                    ei += 1;
                }
                Ordering::Equal => {
                    let (name, value) = cur.step().unwrap();
                    let existing = DirEntry::decode(&value)?;
                    reuse_or_replace(txn, dir_id, dir_virtual_path, &name, item, existing, &mut resolved_dirs, queue)?;
                    ei += 1;
                }
                Ordering::Greater => {
                    let (name, value) = cur.step().unwrap();
                    delete_cascade(txn, dir_id, dir_virtual_path, &name, DirEntry::decode(&value)?, queue)?;
                }
            },
        }
    }
    Ok(resolved_dirs)
}

fn insert_expected(txn: &mut Txn, dir_id: u64, item: &ExpectedItem, resolved_dirs: &mut Vec<(Vec<u8>, u64)>) -> Result<(), Error> {
    match &item.kind {
        ExpectedKind::Dir => {
            let child_id = Store::next_dir_id(txn)?;
            txn.insert_new(&keys::dir_entry_key(dir_id, &item.name), &DirEntry::Subdir { child_id }.encode())?;
            Store::mark_manifest_dirty(txn)?;
            resolved_dirs.push((item.name.clone(), child_id));
        }
        ExpectedKind::File { lastmod, size } => {
            txn.insert_new(&keys::dir_entry_key(dir_id, &item.name), &DirEntry::Unhashed { lastmod: *lastmod, size: *size }.encode())?;
            Store::mark_manifest_dirty(txn)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reuse_or_replace(
    txn: &mut Txn,
    dir_id: u64,
    dir_virtual_path: &str,
    name: &[u8],
    item: &ExpectedItem,
    existing: DirEntry,
    resolved_dirs: &mut Vec<(Vec<u8>, u64)>,
    queue: &mut HashQueue,
) -> Result<(), Error> {
    match (&item.kind, &existing) {
        (ExpectedKind::Dir, DirEntry::Subdir { child_id }) => {
            resolved_dirs.push((name.to_vec(), *child_id));
            Ok(())
        }
        (ExpectedKind::File { lastmod, size }, DirEntry::Unhashed { lastmod: old_lastmod, size: old_size })
            if lastmod <= old_lastmod && size == old_size =>
        {
            let _ = (lastmod, size, old_lastmod, old_size);
            Ok(())
        }
        (ExpectedKind::File { lastmod, size }, DirEntry::Hashed { lastmod: old_lastmod, size: old_size, .. })
            if lastmod <= old_lastmod && size == old_size =>
        {
            let _ = (lastmod, size, old_lastmod, old_size);
            Ok(())
        }
        // Either the kind changed (file <-> dir) or a file's mtime moved
        // forward / its size differs: drop the old entry (cascading as
        // needed) and insert fresh.
        _ => {
            delete_cascade(txn, dir_id, dir_virtual_path, name, existing, queue)?;
            insert_expected(txn, dir_id, item, resolved_dirs)
        }
    }
}

fn delete_cascade(
    txn: &mut Txn,
    dir_id: u64,
    dir_virtual_path: &str,
    name: &[u8],
    entry: DirEntry,
    queue: &mut HashQueue,
) -> Result<(), Error> {
    let entry_virtual_path = join_virtual(dir_virtual_path, &String::from_utf8_lossy(name));

    match entry {
        DirEntry::Subdir { child_id } => {
            let mut cur = DirectoryCursor::open(txn, child_id)?;
            while let Some((child_name, child_value)) = cur.step() {
                delete_cascade(txn, child_id, &entry_virtual_path, &child_name, DirEntry::decode(&child_value)?, queue)?;
            }
        }
        DirEntry::Hashed { b3, .. } => {
            purge_hash_path(txn, &b3, &entry_virtual_path)?;
        }
        DirEntry::Unhashed { .. } => {
            queue.reset();
        }
    }

    txn.delete(&keys::dir_entry_key(dir_id, name))?;
    Store::mark_manifest_dirty(txn)?;
    Ok(())
}

fn purge_hash_path(txn: &mut Txn, b3: &[u8; 32], path: &str) -> Result<(), Error> {
    txn.delete(&keys::hash_path_key(b3, path))?;
    if HashPathCursor::open(txn, b3)?.is_empty() {
        txn.delete(&keys::piece_index_key(b3))?;
        txn.delete(&keys::file_meta_key(b3))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::HashQueue;
    use crate::types::Config;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn build_engine(root_fs: PathBuf) -> (tempfile::TempDir, Engine) {
        let store_dir = tempdir().unwrap();
        let store = Store::open(&store_dir.path().join("db"), 32 * 1024 * 1024).unwrap();
        let mut mounts = MountTree::new();
        mounts.mount("", root_fs);
        let engine = Engine { store, mounts, queue: Mutex::new(HashQueue::new()), config: Config::default() };
        (store_dir, engine)
    }

    #[test]
    fn scan_populates_files_and_subdirs() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a"), b"hello").unwrap();
        std::fs::create_dir(root.path().join("d")).unwrap();
        std::fs::write(root.path().join("d").join("b"), b"").unwrap();

        let (_store_dir, engine) = build_engine(root.path().to_path_buf());
        scan(&engine, "").unwrap();

        engine
            .store
            .transact(TxnMode::ReadOnly, |txn| {
                let root_entries = DirectoryCursor::open(txn, keys::ROOT_DIR_ID)?;
                assert!(!root_entries.is_exhausted());
                let a = DirEntry::decode(&txn.get(&keys::dir_entry_key(0, b"a"))?.unwrap())?;
                assert!(matches!(a, DirEntry::Unhashed { size: 5, .. }));
                let d = DirEntry::decode(&txn.get(&keys::dir_entry_key(0, b"d"))?.unwrap())?;
                let DirEntry::Subdir { child_id } = d else { panic!("expected subdir") };
                let b = DirEntry::decode(&txn.get(&keys::dir_entry_key(child_id, b"b"))?.unwrap())?;
                assert!(matches!(b, DirEntry::Unhashed { size: 0, .. }));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn rescanning_unchanged_tree_is_a_fixed_point() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a"), b"hello").unwrap();

        let (_store_dir, engine) = build_engine(root.path().to_path_buf());
        scan(&engine, "").unwrap();

        let snapshot_before = engine
            .store
            .transact(TxnMode::ReadOnly, |txn| txn.range_prefix(&[keys::NS_DIR_ENTRY]))
            .unwrap();

        scan(&engine, "").unwrap();

        let snapshot_after = engine
            .store
            .transact(TxnMode::ReadOnly, |txn| txn.range_prefix(&[keys::NS_DIR_ENTRY]))
            .unwrap();

        assert_eq!(snapshot_before, snapshot_after);
    }

    #[test]
    fn renamed_file_loses_its_previous_hash() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a"), b"hello").unwrap();

        let (_store_dir, engine) = build_engine(root.path().to_path_buf());
        scan(&engine, "").unwrap();

        engine
            .store
            .transact(TxnMode::ReadWrite, |txn| {
                let raw = txn.get(&keys::dir_entry_key(0, b"a"))?.unwrap();
                let DirEntry::Unhashed { lastmod, size } = DirEntry::decode(&raw)? else { panic!() };
                txn.put(&keys::dir_entry_key(0, b"a"), &DirEntry::Hashed { lastmod, size, b3: [9u8; 32] }.encode())?;
                txn.put(&keys::hash_path_key(&[9u8; 32], "a"), b"a")?;
                Ok(())
            })
            .unwrap();

        std::fs::rename(root.path().join("a"), root.path().join("c")).unwrap();
        scan(&engine, "").unwrap();

        engine
            .store
            .transact(TxnMode::ReadOnly, |txn| {
                assert!(txn.get(&keys::dir_entry_key(0, b"a"))?.is_none());
                let c = DirEntry::decode(&txn.get(&keys::dir_entry_key(0, b"c"))?.unwrap())?;
                assert!(matches!(c, DirEntry::Unhashed { .. }));
                assert!(txn.get(&keys::hash_path_key(&[9u8; 32], "a"))?.is_none());
                Ok(())
            })
            .unwrap();
    }
}
