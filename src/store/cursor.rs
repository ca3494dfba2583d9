//! Cursor helpers layered on `Txn::range_prefix`: a directory cursor for
//! the scanner's merge walk, plus reverse-index cursors for the
//! hash-to-path namespace.

use super::Txn;
use super::keys;
use crate::Error;

/// Iterates the persisted entries of one directory, sorted by name (the
/// same order `heed`'s own key ordering already gives namespace-1 keys
/// under a fixed `dir_id`).
pub struct DirectoryCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl DirectoryCursor {
    pub fn open(txn: &Txn, dir_id: u64) -> Result<Self, Error> {
        let prefix = keys::dir_entry_prefix(dir_id);
        let raw = txn.range_prefix(&prefix)?;
        let entries = raw.into_iter().map(|(k, v)| (keys::dir_entry_name(&k).to_vec(), v)).collect();
        Ok(DirectoryCursor { entries, pos: 0 })
    }

    /// Name of the entry the cursor would next return, without advancing.
    pub fn peek_name(&self) -> Option<&[u8]> {
        self.entries.get(self.pos).map(|(n, _)| n.as_slice())
    }

    /// Returns and advances past the current entry.
    pub fn step(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let item = self.entries.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    /// Positions so the next `step()` yields the entry whose name is >=
    /// `name` (or exhausts the cursor if none qualifies).
    pub fn skip_to(&mut self, name: &[u8]) {
        while let Some((n, _)) = self.entries.get(self.pos) {
            if n.as_slice() >= name {
                break;
            }
            self.pos += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.entries.len()
    }
}

/// Iterates every path recorded for one file hash (namespace 4, prefix
/// length 33).
pub struct HashPathCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl HashPathCursor {
    pub fn open(txn: &Txn, file_hash: &[u8; 32]) -> Result<Self, Error> {
        let entries = txn.range_prefix(&keys::hash_path_prefix(file_hash))?;
        Ok(HashPathCursor { entries, pos: 0 })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|(k, _)| k.as_slice())
    }
}

impl Iterator for HashPathCursor {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, value) = self.entries.get(self.pos)?;
        self.pos += 1;
        String::from_utf8(value.clone()).ok()
    }
}

/// Walks distinct file hashes recorded across namespace 4 in ascending
/// order, suppressing consecutive keys that share the same 32-byte hash
/// (one file hash may have several registered paths).
pub struct HashCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    last_hash: Option<[u8; 32]>,
}

impl HashCursor {
    pub fn open(txn: &Txn) -> Result<Self, Error> {
        let entries = txn.range_prefix(&[keys::NS_HASH_PATH])?;
        Ok(HashCursor { entries, pos: 0, last_hash: None })
    }
}

impl Iterator for HashCursor {
    type Item = [u8; 32];

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, _)) = self.entries.get(self.pos) {
            self.pos += 1;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key[1..33]);
            if self.last_hash != Some(hash) {
                self.last_hash = Some(hash);
                return Some(hash);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, TxnMode};
    use tempfile::tempdir;

    fn scratch_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("db"), 32 * 1024 * 1024).unwrap();
        (dir, store)
    }

    #[test]
    fn directory_cursor_skip_to_positions_at_or_after_name() {
        let (_dir, store) = scratch_store();
        store
            .transact(TxnMode::ReadWrite, |txn| {
                for name in ["a", "b", "d"] {
                    txn.put(
                        &keys::dir_entry_key(0, name.as_bytes()),
                        &keys::DirEntry::Unhashed { lastmod: 0, size: 0 }.encode(),
                    )?;
                }
                Ok(())
            })
            .unwrap();

        store
            .transact(TxnMode::ReadOnly, |txn| {
                let mut cur = DirectoryCursor::open(txn, 0)?;
                cur.skip_to(b"c");
                assert_eq!(cur.peek_name(), Some("d".as_bytes()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn hash_cursor_deduplicates_shared_hash() {
        let (_dir, store) = scratch_store();
        let h = [3u8; 32];
        store
            .transact(TxnMode::ReadWrite, |txn| {
                txn.put(&keys::hash_path_key(&h, "a"), b"a")?;
                txn.put(&keys::hash_path_key(&h, "b"), b"b")?;
                Ok(())
            })
            .unwrap();

        store
            .transact(TxnMode::ReadOnly, |txn| {
                let hashes: Vec<_> = HashCursor::open(txn)?.collect();
                assert_eq!(hashes, vec![h]);
                Ok(())
            })
            .unwrap();
    }
}
