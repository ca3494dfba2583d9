//! Bounded, resumable work queue of unhashed file entries. The queue owns
//! no durable state of its own; it is a cache over what the persisted
//! directory tree already says, refilled by walking that tree.

use crate::Error;
use crate::store::cursor::DirectoryCursor;
use crate::store::keys::{self, DirEntry};
use crate::store::{Store, Txn, TxnMode};
use crate::utils::config::HASH_QUEUE_CACHE_CAPACITY as CACHE_CAPACITY;

#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub dir_id: u64,
    pub size: u64,
    /// Full slash-joined virtual path from the repository root.
    pub path: String,
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}/{name}") }
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// In-memory cache of `{dir_id, size, path}` plus aggregate counters,
/// backed by a resume cursor so a full tree walk need not repeat once the
/// true totals are known.
#[derive(Default)]
pub struct HashQueue {
    /// Stored reversed: `pop()` yields entries in ascending path order.
    cache: Vec<QueueEntry>,
    resume_cursor: Option<String>,
    total_files: u64,
    total_size: u64,
}

impl HashQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cache.clear();
        self.total_files = 0;
        self.total_size = 0;
        self.resume_cursor = None;
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_cache_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Refills the cache (capped at `CACHE_CAPACITY`) from the persisted
    /// directory tree. With no resume cursor, walks the whole tree and
    /// recomputes the true aggregates; with a resume cursor, enters the
    /// correct subtree via `skip_to` and only refills the cache.
    pub fn populate(&mut self, store: &Store) -> Result<(), Error> {
        store.transact(TxnMode::ReadOnly, |txn| {
            let mut collected = Vec::new();
            match self.resume_cursor.clone() {
                None => {
                    self.total_files = 0;
                    self.total_size = 0;
                    self.fill_cache_and_count(txn, keys::ROOT_DIR_ID, "", &mut collected)?;
                }
                Some(cursor) => {
                    self.walk_resume(txn, keys::ROOT_DIR_ID, "", &cursor, &mut collected)?;
                }
            }
            collected.reverse();
            self.cache = collected;
            Ok(())
        })
    }

    fn fill_cache_and_count(&mut self, txn: &Txn, dir_id: u64, prefix: &str, out: &mut Vec<QueueEntry>) -> Result<(), Error> {
        let mut cur = DirectoryCursor::open(txn, dir_id)?;
        while let Some((name, value)) = cur.step() {
            let entry_path = join_path(prefix, &String::from_utf8_lossy(&name));
            match DirEntry::decode(&value)? {
                DirEntry::Unhashed { size, .. } => {
                    self.total_files += 1;
                    self.total_size += size;
                    if out.len() < CACHE_CAPACITY {
                        out.push(QueueEntry { dir_id, size, path: entry_path });
                    }
                }
                DirEntry::Hashed { .. } => {}
                DirEntry::Subdir { child_id } => self.fill_cache_and_count(txn, child_id, &entry_path, out)?,
            }
        }
        Ok(())
    }

    fn fill_cache_only(&mut self, txn: &Txn, dir_id: u64, prefix: &str, out: &mut Vec<QueueEntry>) -> Result<(), Error> {
        if out.len() >= CACHE_CAPACITY {
            return Ok(());
        }
        let mut cur = DirectoryCursor::open(txn, dir_id)?;
        while out.len() < CACHE_CAPACITY {
            let Some((name, value)) = cur.step() else { break };
            let entry_path = join_path(prefix, &String::from_utf8_lossy(&name));
            match DirEntry::decode(&value)? {
                DirEntry::Unhashed { size, .. } => out.push(QueueEntry { dir_id, size, path: entry_path }),
                DirEntry::Hashed { .. } => {}
                DirEntry::Subdir { child_id } => self.fill_cache_only(txn, child_id, &entry_path, out)?,
            }
        }
        Ok(())
    }

    /// Enters the subtree named by `skip_to(head(cursor))`, discards the
    /// entry the previous `populate()` stopped at, then continues filling
    /// the cache with the rest of the tree in sorted order.
    fn walk_resume(&mut self, txn: &Txn, dir_id: u64, prefix: &str, cursor: &str, out: &mut Vec<QueueEntry>) -> Result<(), Error> {
        if out.len() >= CACHE_CAPACITY {
            return Ok(());
        }
        let mut cur = DirectoryCursor::open(txn, dir_id)?;
        let (head, tail) = (crate::path::head(cursor), crate::path::tail(cursor));
        cur.skip_to(head.as_bytes());

        if cur.peek_name() == Some(head.as_bytes()) {
            let (name, value) = cur.step().unwrap();
            let entry_path = join_path(prefix, &String::from_utf8_lossy(&name));
            if !tail.is_empty()
                && let DirEntry::Subdir { child_id } = DirEntry::decode(&value)?
            {
                self.walk_resume(txn, child_id, &entry_path, tail, out)?;
            }
            // tail empty: `entry_path` is the resume cursor's own entry,
            // already consumed by the caller - discarded here.
        }

        while out.len() < CACHE_CAPACITY {
            let Some((name, value)) = cur.step() else { break };
            let entry_path = join_path(prefix, &String::from_utf8_lossy(&name));
            match DirEntry::decode(&value)? {
                DirEntry::Unhashed { size, .. } => out.push(QueueEntry { dir_id, size, path: entry_path }),
                DirEntry::Hashed { .. } => {}
                DirEntry::Subdir { child_id } => self.fill_cache_only(txn, child_id, &entry_path, out)?,
            }
        }
        Ok(())
    }

    /// Pops one entry, repopulating from the resume cursor if the cache is
    /// empty but more work may remain.
    pub fn next(&mut self, store: &Store) -> Result<Option<QueueEntry>, Error> {
        if self.cache.is_empty() && self.resume_cursor.is_some() {
            self.populate(store)?;
        }
        let entry = self.cache.pop();
        if let Some(entry) = &entry {
            self.resume_cursor = Some(entry.path.clone());
        }
        Ok(entry)
    }

    /// Within the caller's write transaction: re-reads the directory entry
    /// for `entry`, and if it is still present, still unhashed, and its
    /// size still matches, replaces it with a hashed variant, writes the
    /// piece index (if `pieces` is non-empty), registers the reverse-index
    /// path entry, and decrements the aggregate counters. Returns `false`
    /// (dropping silently, per the design's `QueueRaced` handling) if the
    /// entry raced with a concurrent scanner update.
    pub fn store(&mut self, txn: &mut Txn, entry: &QueueEntry, b3: [u8; 32], pieces: &[[u8; 32]]) -> Result<bool, Error> {
        let name = leaf_name(&entry.path);
        let key = keys::dir_entry_key(entry.dir_id, name.as_bytes());

        let Some(raw) = txn.get(&key)? else { return Ok(false) };
        let DirEntry::Unhashed { lastmod, size } = DirEntry::decode(&raw)? else { return Ok(false) };
        if size != entry.size {
            return Ok(false);
        }

        txn.put(&key, &DirEntry::Hashed { lastmod, size, b3 }.encode())?;

        if !pieces.is_empty() {
            let mut value = Vec::with_capacity(8 + pieces.len() * 32);
            value.extend_from_slice(&size.to_le_bytes());
            for piece in pieces {
                value.extend_from_slice(piece);
            }
            txn.put(&keys::piece_index_key(&b3), &value)?;
        }

        txn.insert_new(&keys::hash_path_key(&b3, &entry.path), entry.path.as_bytes())?;

        self.total_files = self.total_files.saturating_sub(1);
        self.total_size = self.total_size.saturating_sub(entry.size);
        Store::mark_manifest_dirty(txn)?;
        Ok(true)
    }
}
