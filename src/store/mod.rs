//! Embedded transactional ordered key-value store wrapper over `heed`
//! (an LMDB binding), with automatic map-full/map-resized retry and
//! cross-thread resize coordination.
//!
//! Exposes a single entry point, [`Store::transact`]: the caller-supplied
//! body runs inside a transaction and is retried, as a fresh transaction
//! each time, whenever the underlying map reports it has been resized by
//! another process or has run out of space. The body must therefore be
//! idempotent given the same committed state.

pub mod cursor;
pub mod keys;

use std::ops::Bound;
use std::path::Path;
use std::sync::{Condvar, Mutex};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::{CapacityKind, Error};

/// Grown by 50% on `MapFull`, per the design's "current_size +
/// current_size/2" rule.
const MAP_GROWTH_NUMERATOR: usize = 3;
const MAP_GROWTH_DENOMINATOR: usize = 2;

pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

enum TxnInner<'a> {
    Ro(RoTxn<'a>),
    Rw(RwTxn<'a>),
}

/// A transaction handle passed to `Store::transact`'s body. Reads are
/// available on both transaction kinds; writes return `Error::StoreFatal`
/// if attempted on a read-only transaction.
pub struct Txn<'a> {
    inner: TxnInner<'a>,
    db: Database<Bytes, Bytes>,
}

impl<'a> Txn<'a> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let found = match &self.inner {
            TxnInner::Ro(t) => self.db.get(t, key),
            TxnInner::Rw(t) => self.db.get(t, key),
        }
        .map_err(classify_heed_err)?;
        Ok(found.map(|v| v.to_vec()))
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        match &mut self.inner {
            TxnInner::Rw(t) => self.db.put(t, key, value).map_err(classify_heed_err),
            TxnInner::Ro(_) => Err(Error::StoreFatal("write attempted on read-only transaction".into())),
        }
    }

    /// Inserts a key known not to be present; used where the design calls
    /// for "insert strictly new key (fails if present)".
    pub fn insert_new(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        if self.get(key)?.is_some() {
            return Err(Error::StoreFatal(format!("insert_new: key already present ({} bytes)", key.len())));
        }
        self.put(key, value)
    }

    /// Point delete, returning whether the key was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, Error> {
        match &mut self.inner {
            TxnInner::Rw(t) => self.db.delete(t, key).map_err(classify_heed_err),
            TxnInner::Ro(_) => Err(Error::StoreFatal("delete attempted on read-only transaction".into())),
        }
    }

    /// All (key, value) pairs whose key starts with `prefix`, in ascending
    /// order. Directories and per-hash path sets are bounded in practice,
    /// so cursor reads materialize their prefix range up front rather than
    /// holding a live cursor across scanner steps.
    pub fn range_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let upper = prefix_upper_bound(prefix);
        let bounds = (Bound::Included(prefix), Bound::Excluded(upper.as_slice()));
        let iter = match &self.inner {
            TxnInner::Ro(t) => self.db.range(t, &bounds),
            TxnInner::Rw(t) => self.db.range(t, &bounds),
        }
        .map_err(classify_heed_err)?;
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item.map_err(classify_heed_err)?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn commit(self) -> Result<(), Error> {
        match self.inner {
            TxnInner::Ro(_) => Ok(()),
            TxnInner::Rw(t) => t.commit().map_err(classify_heed_err),
        }
    }
}

/// Smallest key greater than every key with the given prefix. Namespace
/// prefixes here are never all-`0xFF`, so the fallback branch is unreached
/// in practice; it is still total so the function never panics.
fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    for i in (0..upper.len()).rev() {
        if upper[i] != 0xFF {
            upper[i] += 1;
            upper.truncate(i + 1);
            return upper;
        }
    }
    let mut all_ff = vec![0xFFu8; upper.len() + 1];
    all_ff[upper.len()] = 0xFF;
    all_ff
}

fn classify_heed_err(e: heed::Error) -> Error {
    use heed::Error as HE;
    use heed::MdbError;
    match e {
        HE::Mdb(MdbError::MapFull) => Error::TransientStoreCapacity(CapacityKind::MapFull),
        HE::Mdb(MdbError::MapResized) => Error::TransientStoreCapacity(CapacityKind::MapResized),
        other => Error::StoreFatal(other.to_string()),
    }
}

struct ResizeState {
    active_txn: u64,
    resizing: bool,
}

/// Coordinates map resizes against concurrently running transactions: no
/// new transaction may start while a resize is pending, and a resize waits
/// until it is the only active transaction before touching the map.
struct Coordinator {
    state: Mutex<ResizeState>,
    changed: Condvar,
}

impl Coordinator {
    fn new() -> Self {
        Coordinator {
            state: Mutex::new(ResizeState { active_txn: 0, resizing: false }),
            changed: Condvar::new(),
        }
    }

    fn enter(&self) {
        let mut st = self.state.lock().unwrap();
        while st.resizing {
            st = self.changed.wait(st).unwrap();
        }
        st.active_txn += 1;
    }

    fn exit(&self) {
        let mut st = self.state.lock().unwrap();
        st.active_txn -= 1;
        self.changed.notify_all();
    }

    /// Called by a thread that hit a capacity signal while still holding
    /// its own active slot. If no resize is already underway, this thread
    /// becomes the leader: it blocks new transactions, waits until it is
    /// the only active one, and runs `perform`. If another thread is
    /// already resizing, this thread instead releases its slot (so the
    /// leader's wait can reach "only one active" at all) and waits for
    /// the resize to finish, then re-enters before returning, leaving
    /// every caller holding exactly one slot again regardless of path.
    fn recover(&self, perform: impl FnOnce() -> Result<(), Error>) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if st.resizing {
            st.active_txn -= 1;
            self.changed.notify_all();
            while st.resizing {
                st = self.changed.wait(st).unwrap();
            }
            drop(st);
            self.enter();
            return Ok(());
        }

        st.resizing = true;
        while st.active_txn != 1 {
            st = self.changed.wait(st).unwrap();
        }
        drop(st);

        let result = perform();

        let mut st = self.state.lock().unwrap();
        st.resizing = false;
        self.changed.notify_all();
        drop(st);
        result
    }
}

pub struct Store {
    env: Env,
    db: Database<Bytes, Bytes>,
    coordinator: Coordinator,
}

impl Store {
    /// Opens (creating if absent) the LMDB environment rooted at `db_dir`,
    /// with sync-on-commit disabled (the design tolerates non-durable
    /// commits) and the given initial map size.
    pub fn open(db_dir: &Path, initial_map_size: usize) -> Result<Self, Error> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| Error::StoreFatal(format!("create store directory {}: {e}", db_dir.display())))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(initial_map_size)
                .max_dbs(1)
                .flags(heed::EnvFlags::NO_SYNC)
                .open(db_dir)
        }
        .map_err(classify_heed_err)?;

        let mut wtxn = env.write_txn().map_err(classify_heed_err)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(classify_heed_err)?;
        wtxn.commit().map_err(classify_heed_err)?;

        let store = Store { env, db, coordinator: Coordinator::new() };
        store.ensure_header()?;
        Ok(store)
    }

    fn ensure_header(&self) -> Result<(), Error> {
        self.transact(TxnMode::ReadWrite, |txn| {
            match txn.get(&keys::header_key(keys::HDR_SCHEMA_VERSION))? {
                None => {
                    txn.put(
                        &keys::header_key(keys::HDR_SCHEMA_VERSION),
                        &[keys::SCHEMA_VERSION_MAJOR, keys::SCHEMA_VERSION_MINOR],
                    )?;
                    txn.put(&keys::header_key(keys::HDR_SEQUENCE_COUNTER), &1u64.to_le_bytes())?;
                    Ok(())
                }
                Some(v) if v.first() == Some(&keys::SCHEMA_VERSION_MAJOR) => Ok(()),
                Some(v) => Err(Error::StoreFatal(format!(
                    "schema major version mismatch: store has {}, expected {}",
                    v.first().copied().unwrap_or(0),
                    keys::SCHEMA_VERSION_MAJOR
                ))),
            }
        })
    }

    /// Runs `body` inside a transaction of the given mode, retrying with a
    /// fresh transaction on `MapFull`/`MapResized` after resizing the map.
    pub fn transact<T>(&self, mode: TxnMode, mut body: impl FnMut(&mut Txn) -> Result<T, Error>) -> Result<T, Error> {
        loop {
            self.coordinator.enter();
            let outcome = self.run_once(&mode, &mut body);

            match outcome {
                Ok(value) => {
                    self.coordinator.exit();
                    return Ok(value);
                }
                Err(Error::TransientStoreCapacity(kind)) => {
                    // `recover_capacity` always returns with this thread
                    // holding exactly one active slot again, whether it led
                    // the resize or waited out someone else's.
                    let result = self.recover_capacity(kind);
                    self.coordinator.exit();
                    result?;
                }
                Err(e) => {
                    self.coordinator.exit();
                    return Err(e);
                }
            }
        }
    }

    fn run_once<T>(&self, mode: &TxnMode, body: &mut impl FnMut(&mut Txn) -> Result<T, Error>) -> Result<T, Error> {
        let mut txn = self.begin(mode)?;
        let value = body(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    fn begin(&self, mode: &TxnMode) -> Result<Txn<'_>, Error> {
        match mode {
            TxnMode::ReadOnly => {
                let t = self.env.read_txn().map_err(classify_heed_err)?;
                Ok(Txn { inner: TxnInner::Ro(t), db: self.db })
            }
            TxnMode::ReadWrite => {
                let t = self.env.write_txn().map_err(classify_heed_err)?;
                Ok(Txn { inner: TxnInner::Rw(t), db: self.db })
            }
        }
    }

    fn recover_capacity(&self, kind: CapacityKind) -> Result<(), Error> {
        self.coordinator.recover(|| {
            let info = self.env.info();
            let new_size = match kind {
                CapacityKind::MapResized => info.map_size,
                CapacityKind::MapFull => (info.map_size * MAP_GROWTH_NUMERATOR) / MAP_GROWTH_DENOMINATOR,
            };
            unsafe { self.env.resize(new_size) }.map_err(classify_heed_err)
        })
    }

    /// Allocates and persists the next directory identifier from the
    /// monotonic sequence counter (header `0x01`).
    pub fn next_dir_id(txn: &mut Txn) -> Result<u64, Error> {
        let key = keys::header_key(keys::HDR_SEQUENCE_COUNTER);
        let current = match txn.get(&key)? {
            Some(bytes) => u64::from_le_bytes(bytes[..8].try_into().unwrap()),
            None => 1,
        };
        txn.put(&key, &(current + 1).to_le_bytes())?;
        Ok(current)
    }

    /// Sets the manifest "dirty" flag (header `0x05`); called whenever the
    /// scanner or hasher commits a change that should eventually trigger a
    /// manifest write.
    pub fn mark_manifest_dirty(txn: &mut Txn) -> Result<(), Error> {
        txn.put(&keys::header_key(keys::HDR_MANIFEST_DIRTY), &[1])
    }

    /// Atomically reads and clears the manifest dirty flag, returning
    /// whether it was set. Used at the start of a manifest write so a
    /// concurrent update setting it again is not lost.
    pub fn take_manifest_dirty(txn: &mut Txn) -> Result<bool, Error> {
        let key = keys::header_key(keys::HDR_MANIFEST_DIRTY);
        let was_dirty = txn.get(&key)?.map(|v| v.first() == Some(&1)).unwrap_or(false);
        txn.put(&key, &[0])?;
        Ok(was_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn transact_retries_past_a_map_full_signal_by_resizing() {
        let dir = tempdir().unwrap();
        // Deliberately tiny initial map: a single large value overruns it
        // well before LMDB's own minimum, forcing at least one resize.
        let store = Store::open(&dir.path().join("db"), 64 * 1024).unwrap();

        let big_value = vec![0xABu8; 200 * 1024];
        store
            .transact(TxnMode::ReadWrite, |txn| txn.put(b"big-key", &big_value))
            .unwrap();

        store
            .transact(TxnMode::ReadOnly, |txn| {
                assert_eq!(txn.get(b"big-key")?.unwrap(), big_value);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn concurrent_writers_all_recover_from_the_same_map_full_signal() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("db"), 64 * 1024).unwrap();

        std::thread::scope(|scope| {
            for i in 0..4 {
                scope.spawn({
                    let store = &store;
                    move || {
                        let value = vec![i as u8; 80 * 1024];
                        store
                            .transact(TxnMode::ReadWrite, |txn| txn.put(format!("k{i}").as_bytes(), &value))
                            .unwrap();
                    }
                });
            }
        });

        store
            .transact(TxnMode::ReadOnly, |txn| {
                for i in 0..4 {
                    let value = txn.get(format!("k{i}").as_bytes())?.unwrap();
                    assert_eq!(value, vec![i as u8; 80 * 1024]);
                }
                Ok(())
            })
            .unwrap();
    }
}
