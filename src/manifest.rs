//! Manifest writer: builds the recursive directory-listing and sorted
//! hash-list artifacts, content-addresses each by its own BLAKE3 root under
//! `obj/`, and updates the header records to match, unlinking whatever
//! artifact they previously pointed at.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use memmap2::Mmap;

use crate::Error;
use crate::codec::{begin_array_indefinite, begin_map_definite, write_break, write_bytes, write_text, write_uint};
use crate::hash;
use crate::store::cursor::{DirectoryCursor, HashCursor};
use crate::store::keys::{self, DirEntry};
use crate::store::{Store, Txn, TxnMode};
use crate::types::Engine;

fn hex(bytes: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in bytes {
        write!(s, "{b:02x}").unwrap();
    }
    s
}

/// Depth-first: subdirectory names, then hashed files, then the
/// subdirectories' own contents in the same order their names were listed.
fn write_directory(txn: &Txn, dir_id: u64, out: &mut Vec<u8>) -> Result<(), Error> {
    let mut cur = DirectoryCursor::open(txn, dir_id)?;
    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    while let Some((name, value)) = cur.step() {
        match DirEntry::decode(&value)? {
            DirEntry::Subdir { child_id } => subdirs.push((name, child_id)),
            DirEntry::Hashed { size, b3, .. } => files.push((name, size, b3)),
            DirEntry::Unhashed { .. } => {}
        }
    }

    begin_array_indefinite(out);

    begin_array_indefinite(out);
    for (name, _) in &subdirs {
        write_text(out, &String::from_utf8_lossy(name));
    }
    write_break(out);

    begin_array_indefinite(out);
    for (name, size, b3) in &files {
        begin_map_definite(out, 3);
        write_uint(out, 0);
        write_text(out, &String::from_utf8_lossy(name));
        write_uint(out, 1);
        write_uint(out, *size);
        write_uint(out, 2);
        write_bytes(out, b3);
    }
    write_break(out);

    begin_array_indefinite(out);
    for (_, child_id) in &subdirs {
        write_directory(txn, child_id, out)?;
    }
    write_break(out);

    write_break(out);
    Ok(())
}

fn build_hash_list(txn: &Txn) -> Result<Option<(Vec<u8>, u64)>, Error> {
    let hashes: Vec<[u8; 32]> = HashCursor::open(txn)?.collect();
    if hashes.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::new();
    begin_array_indefinite(&mut out);
    for h in &hashes {
        write_bytes(&mut out, h);
    }
    write_break(&mut out);
    Ok(Some((out, hashes.len() as u64)))
}

/// Writes `bytes` to a fixed temp name under `obj_dir`, mmaps it back to
/// compute its own BLAKE3 root, and renames it to that root's lowercase hex
/// form. A rename onto an unchanged name is a harmless no-op overwrite,
/// since the bytes are deterministic given the same committed store state.
fn content_address(obj_dir: &Path, tmp_name: &str, bytes: &[u8]) -> Result<[u8; 32], Error> {
    let tmp_path = obj_dir.join(tmp_name);
    fs::write(&tmp_path, bytes).map_err(|e| Error::StoreFatal(format!("write manifest temp file {}: {e}", tmp_path.display())))?;

    let root = if bytes.is_empty() {
        hash::hash(b"")
    } else {
        let file = fs::File::open(&tmp_path).map_err(|e| Error::StoreFatal(format!("reopen manifest temp file: {e}")))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::StoreFatal(format!("mmap manifest temp file: {e}")))?;
        hash::hash(&mmap[..])
    };

    let final_path = obj_dir.join(hex(&root));
    fs::rename(&tmp_path, &final_path).map_err(|e| Error::StoreFatal(format!("rename manifest artifact: {e}")))?;
    Ok(root)
}

fn unlink(obj_dir: &Path, root: [u8; 32]) {
    let _ = fs::remove_file(obj_dir.join(hex(&root)));
}

fn read_root(txn: &Txn, sub_tag: u8) -> Result<Option<[u8; 32]>, Error> {
    match txn.get(&keys::header_key(sub_tag))? {
        Some(v) if v.len() == 32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(&v);
            Ok(Some(out))
        }
        _ => Ok(None),
    }
}

/// Unconditionally rebuilds both artifacts unless the manifest-dirty flag
/// was already clean (atomically cleared at the start of this call), in
/// which case it exits without touching `obj_dir`.
pub fn write_now(engine: &Engine, obj_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(obj_dir).map_err(|e| Error::StoreFatal(format!("create obj dir {}: {e}", obj_dir.display())))?;

    let was_dirty = engine.store.transact(TxnMode::ReadWrite, Store::take_manifest_dirty)?;
    if !was_dirty {
        return Ok(());
    }

    let mut dir_listing = Vec::new();
    let hash_list = engine.store.transact(TxnMode::ReadOnly, |txn| {
        dir_listing.clear();
        write_directory(txn, keys::ROOT_DIR_ID, &mut dir_listing)?;
        build_hash_list(txn)
    })?;

    let new_dir_root = content_address(obj_dir, "dirlisting.tmp", &dir_listing)?;
    let new_hash_list = match &hash_list {
        Some((bytes, count)) => Some((content_address(obj_dir, "hashlist.tmp", bytes)?, *count)),
        None => None,
    };

    let (old_dir_root, old_hash_root) = engine.store.transact(TxnMode::ReadWrite, |txn| {
        let old_dir_root = read_root(txn, keys::HDR_DIR_LISTING_ROOT)?;
        if old_dir_root != Some(new_dir_root) {
            txn.put(&keys::header_key(keys::HDR_DIR_LISTING_ROOT), &new_dir_root)?;
        }

        let old_hash_root = read_root(txn, keys::HDR_HASH_LIST_ROOT)?;
        match new_hash_list {
            Some((new_hash_root, count)) => {
                if old_hash_root != Some(new_hash_root) {
                    txn.put(&keys::header_key(keys::HDR_HASH_LIST_ROOT), &new_hash_root)?;
                    txn.put(&keys::header_key(keys::HDR_HASH_LIST_COUNT), &count.to_le_bytes())?;
                }
            }
            // Every hashed file was removed since the last write: the
            // header must stop pointing at a hash list that no longer
            // describes anything, not just skip updating it.
            None if old_hash_root.is_some() => {
                txn.delete(&keys::header_key(keys::HDR_HASH_LIST_ROOT))?;
                txn.delete(&keys::header_key(keys::HDR_HASH_LIST_COUNT))?;
            }
            None => {}
        }
        Ok((old_dir_root, old_hash_root))
    })?;

    if old_dir_root != Some(new_dir_root)
        && let Some(old) = old_dir_root
    {
        unlink(obj_dir, old);
    }
    match new_hash_list {
        Some((new_hash_root, _)) if old_hash_root != Some(new_hash_root) => {
            if let Some(old) = old_hash_root {
                unlink(obj_dir, old);
            }
        }
        None => {
            if let Some(old) = old_hash_root {
                unlink(obj_dir, old);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Calls `write_now` only if at least `manifest_interval_secs` have elapsed
/// since the last call (or there has been none yet), tracking elapsed time
/// in the caller-owned `last_write` across successive invocations.
pub fn write_if_due(engine: &Engine, obj_dir: &Path, last_write: &mut Option<Instant>) -> Result<(), Error> {
    let interval = Duration::from_secs(engine.config.manifest_interval_secs.max(1));
    let due = last_write.map(|t| t.elapsed() >= interval).unwrap_or(true);
    if !due {
        return Ok(());
    }
    write_now(engine, obj_dir)?;
    *last_write = Some(Instant::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;
    use crate::mount::MountTree;
    use crate::queue::HashQueue;
    use crate::types::Config;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn scratch_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("db"), 32 * 1024 * 1024).unwrap();
        let engine = Engine { store, mounts: MountTree::new(), queue: Mutex::new(HashQueue::new()), config: Config::default() };
        (dir, engine)
    }

    fn put_hashed(engine: &Engine, dir_id: u64, name: &str, size: u64, b3: [u8; 32]) {
        engine
            .store
            .transact(TxnMode::ReadWrite, |txn| {
                txn.put(&keys::dir_entry_key(dir_id, name.as_bytes()), &DirEntry::Hashed { lastmod: 0, size, b3 }.encode())?;
                txn.put(&keys::hash_path_key(&b3, name), name.as_bytes())?;
                Store::mark_manifest_dirty(txn)
            })
            .unwrap();
    }

    #[test]
    fn writes_artifacts_and_registers_header_roots() {
        let (workdir, engine) = scratch_engine();
        put_hashed(&engine, 0, "a", 5, [1u8; 32]);
        put_hashed(&engine, 0, "b", 0, [2u8; 32]);

        let obj_dir = workdir.path().join("obj");
        write_now(&engine, &obj_dir).unwrap();

        engine
            .store
            .transact(TxnMode::ReadOnly, |txn| {
                let dir_root = read_root(txn, keys::HDR_DIR_LISTING_ROOT)?.unwrap();
                let hash_root = read_root(txn, keys::HDR_HASH_LIST_ROOT)?.unwrap();
                assert!(obj_dir.join(hex(&dir_root)).exists());
                assert!(obj_dir.join(hex(&hash_root)).exists());

                let raw = fs::read(obj_dir.join(hex(&hash_root))).unwrap();
                let mut dec = Decoder::new(&raw);
                dec.expect_array_indefinite().unwrap();
                let mut seen = Vec::new();
                while !dec.peek_is_break().unwrap() {
                    seen.push(dec.read_bytes().unwrap().to_vec());
                }
                assert_eq!(seen.len(), 2);
                assert!(seen.is_sorted());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn second_write_with_no_changes_is_a_no_op() {
        let (workdir, engine) = scratch_engine();
        put_hashed(&engine, 0, "a", 5, [1u8; 32]);
        let obj_dir = workdir.path().join("obj");

        write_now(&engine, &obj_dir).unwrap();
        let before: Vec<_> = fs::read_dir(&obj_dir).unwrap().map(|e| e.unwrap().file_name()).collect();

        // Dirty flag is clean now; a second write must skip entirely.
        write_now(&engine, &obj_dir).unwrap();
        let after: Vec<_> = fs::read_dir(&obj_dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn hash_list_disappearing_clears_and_unlinks_the_stale_header_root() {
        let (workdir, engine) = scratch_engine();
        put_hashed(&engine, 0, "a", 5, [1u8; 32]);
        let obj_dir = workdir.path().join("obj");
        write_now(&engine, &obj_dir).unwrap();

        let old_hash_root = engine.store.transact(TxnMode::ReadOnly, |txn| read_root(txn, keys::HDR_HASH_LIST_ROOT)).unwrap().unwrap();
        assert!(obj_dir.join(hex(&old_hash_root)).exists());

        // Remove the only hashed file and its reverse-index entry, then
        // mark the manifest dirty as the scanner's deletion cascade would.
        engine
            .store
            .transact(TxnMode::ReadWrite, |txn| {
                txn.delete(&keys::dir_entry_key(0, b"a"))?;
                txn.delete(&keys::hash_path_key(&[1u8; 32], "a"))?;
                Store::mark_manifest_dirty(txn)
            })
            .unwrap();
        write_now(&engine, &obj_dir).unwrap();

        engine
            .store
            .transact(TxnMode::ReadOnly, |txn| {
                assert!(read_root(txn, keys::HDR_HASH_LIST_ROOT)?.is_none());
                assert!(txn.get(&keys::header_key(keys::HDR_HASH_LIST_COUNT))?.is_none());
                Ok(())
            })
            .unwrap();
        assert!(!obj_dir.join(hex(&old_hash_root)).exists());
    }

    #[test]
    fn stale_artifacts_are_unlinked_after_obj_dir_recreated_elsewhere() {
        let (workdir, engine) = scratch_engine();
        put_hashed(&engine, 0, "a", 5, [1u8; 32]);
        let obj_dir = workdir.path().join("obj");
        write_now(&engine, &obj_dir).unwrap();

        let old_entries: Vec<_> = fs::read_dir(&obj_dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert!(!old_entries.is_empty());

        fs::remove_dir_all(&obj_dir).unwrap();
        put_hashed(&engine, 0, "c", 7, [3u8; 32]);
        write_now(&engine, &obj_dir).unwrap();

        let new_entries: Vec<_> = fs::read_dir(&obj_dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(new_entries.len(), 2); // dir listing + hash list, no leftover stale names
    }
}
