//! Hasher pool: worker threads draining the hash queue, memory-mapping each
//! file, and computing root plus per-piece BLAKE3 hashes.

use std::fs::File;
use std::sync::Mutex;

use log::warn;
use memmap2::Mmap;

use crate::Error;
use crate::hash::{self, CHUNK_LEN, OUT_LEN};
use crate::mount::MountTree;
use crate::queue::{HashQueue, QueueEntry};
use crate::store::{Store, TxnMode};

/// Runs `threads` worker threads (at least one), each draining `queue`
/// until empty. Blocks until every worker has exited.
pub fn run_pool(store: &Store, mounts: &MountTree, queue: &Mutex<HashQueue>, threads: usize, piece_size: u64) {
    std::thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            scope.spawn(|| worker_loop(store, mounts, queue, piece_size));
        }
    });
}

fn worker_loop(store: &Store, mounts: &MountTree, queue: &Mutex<HashQueue>, piece_size: u64) {
    loop {
        let entry = match queue.lock().expect("hash queue mutex poisoned").next(store) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("hash queue populate failed: {e}");
                return;
            }
        };
        let Some(entry) = entry else { return };

        match hash_entry(mounts, &entry, piece_size) {
            Ok((b3, pieces)) => {
                let outcome = store.transact(TxnMode::ReadWrite, |txn| {
                    queue.lock().expect("hash queue mutex poisoned").store(txn, &entry, b3, &pieces)
                });
                if let Err(e) = outcome {
                    warn!("failed to persist hash result for {}: {e}", entry.path);
                }
            }
            Err(Error::IoSkippable { path, reason }) => {
                warn!("skipping {}: {reason}", path.display());
            }
            Err(e) => {
                warn!("unexpected error hashing {}: {e}", entry.path);
            }
        }
    }
}

/// Resolves, mmaps, and hashes one queue entry. Empty files are
/// short-circuited to the hash of the empty string without mmapping.
fn hash_entry(mounts: &MountTree, entry: &QueueEntry, piece_size: u64) -> Result<([u8; OUT_LEN], Vec<[u8; OUT_LEN]>), Error> {
    let fs_path = mounts.virtual_to_fs(&entry.path).ok_or_else(|| Error::IoSkippable {
        path: entry.path.clone().into(),
        reason: "no mount resolves this virtual path".to_string(),
    })?;

    if entry.size == 0 {
        return Ok((hash::hash(b""), Vec::new()));
    }

    let file = File::open(&fs_path).map_err(|e| Error::IoSkippable { path: fs_path.clone(), reason: e.to_string() })?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::IoSkippable { path: fs_path.clone(), reason: e.to_string() })?;
    let data = &mmap[..];

    if (data.len() as u64) <= piece_size {
        return Ok((hash::hash_piece(0, data).root(), Vec::new()));
    }

    let chunks_per_piece = piece_size / CHUNK_LEN as u64;
    let mut cvs = Vec::new();
    for (i, piece) in data.chunks(piece_size as usize).enumerate() {
        let chunk_start = i as u64 * chunks_per_piece;
        cvs.push(hash::hash_piece(chunk_start, piece).chaining_value());
    }
    let root = hash::merge_pieces(&cvs).root();
    Ok((root, cvs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keys::{self, DirEntry};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn scratch(root_fs: std::path::PathBuf) -> (tempfile::TempDir, Store, MountTree) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("db"), 32 * 1024 * 1024).unwrap();
        let mut mounts = MountTree::new();
        mounts.mount("", root_fs);
        (dir, store, mounts)
    }

    #[test]
    fn empty_file_hashes_without_mmap() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("empty"), b"").unwrap();
        let (_store_dir, store, mounts) = scratch(root.path().to_path_buf());

        store
            .transact(TxnMode::ReadWrite, |txn| {
                txn.put(&keys::dir_entry_key(0, b"empty"), &DirEntry::Unhashed { lastmod: 0, size: 0 }.encode())
            })
            .unwrap();

        let queue = Mutex::new(HashQueue::new());
        queue.lock().unwrap().populate(&store).unwrap();
        run_pool(&store, &mounts, &queue, 2, 1024 * 1024);

        store
            .transact(TxnMode::ReadOnly, |txn| {
                let raw = txn.get(&keys::dir_entry_key(0, b"empty"))?.unwrap();
                let DirEntry::Hashed { b3, .. } = DirEntry::decode(&raw)? else { panic!("expected hashed") };
                assert_eq!(b3, hash::hash(b""));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn large_file_splits_into_pieces_and_matches_direct_hash() {
        let root = tempdir().unwrap();
        let piece_size: u64 = 2048;
        let mut data = vec![0u8; 5000];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        std::fs::write(root.path().join("big"), &data).unwrap();
        let (_store_dir, store, mounts) = scratch(root.path().to_path_buf());

        store
            .transact(TxnMode::ReadWrite, |txn| {
                txn.put(&keys::dir_entry_key(0, b"big"), &DirEntry::Unhashed { lastmod: 0, size: data.len() as u64 }.encode())
            })
            .unwrap();

        let queue = Mutex::new(HashQueue::new());
        queue.lock().unwrap().populate(&store).unwrap();
        run_pool(&store, &mounts, &queue, 1, piece_size);

        let expected = hash::hash(&data);
        store
            .transact(TxnMode::ReadOnly, |txn| {
                let raw = txn.get(&keys::dir_entry_key(0, b"big"))?.unwrap();
                let DirEntry::Hashed { b3, .. } = DirEntry::decode(&raw)? else { panic!("expected hashed") };
                assert_eq!(b3, expected);
                let piece_index = txn.get(&keys::piece_index_key(&b3))?.unwrap();
                assert_eq!(piece_index.len(), 8 + 3 * 32); // 5000 / 2048 rounds up to 3 pieces
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn concurrent_workers_drain_the_queue_completely() {
        let root = tempdir().unwrap();
        for i in 0..10 {
            std::fs::write(root.path().join(format!("f{i}")), format!("data-{i}")).unwrap();
        }
        let (_store_dir, store, mounts) = scratch(root.path().to_path_buf());

        store
            .transact(TxnMode::ReadWrite, |txn| {
                for i in 0..10 {
                    let name = format!("f{i}");
                    let size = format!("data-{i}").len() as u64;
                    txn.put(&keys::dir_entry_key(0, name.as_bytes()), &DirEntry::Unhashed { lastmod: 0, size }.encode())?;
                }
                Ok(())
            })
            .unwrap();

        let queue = Mutex::new(HashQueue::new());
        queue.lock().unwrap().populate(&store).unwrap();
        run_pool(&store, &mounts, &queue, 2, 1024 * 1024);

        assert_eq!(queue.lock().unwrap().total_files(), 0);
        store
            .transact(TxnMode::ReadOnly, |txn| {
                for i in 0..10 {
                    let name = format!("f{i}");
                    let raw = txn.get(&keys::dir_entry_key(0, name.as_bytes()))?.unwrap();
                    assert!(DirEntry::decode(&raw)?.is_hashed());
                }
                Ok(())
            })
            .unwrap();
    }
}
