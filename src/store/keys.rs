//! Namespace-tagged key encoding and directory-entry value encoding over
//! the raw byte-string key-value space. Fixed-width integers embedded here
//! are little-endian; this never affects key ordering because entries are
//! only ever range-scanned within one fixed `dir_id` prefix, comparing
//! names rather than ids.

use crate::Error;

pub const NS_HEADER: u8 = 0;
pub const NS_DIR_ENTRY: u8 = 1;
pub const NS_PIECE_INDEX: u8 = 2;
pub const NS_FILE_META: u8 = 3;
pub const NS_HASH_PATH: u8 = 4;

pub const HDR_SCHEMA_VERSION: u8 = 0x00;
pub const HDR_SEQUENCE_COUNTER: u8 = 0x01;
pub const HDR_DIR_LISTING_ROOT: u8 = 0x02;
pub const HDR_HASH_LIST_ROOT: u8 = 0x03;
pub const HDR_HASH_LIST_COUNT: u8 = 0x04;
pub const HDR_MANIFEST_DIRTY: u8 = 0x05;

pub const SCHEMA_VERSION_MAJOR: u8 = 1;
pub const SCHEMA_VERSION_MINOR: u8 = 0;

pub const ROOT_DIR_ID: u64 = 0;

pub fn header_key(sub_tag: u8) -> [u8; 2] {
    [NS_HEADER, sub_tag]
}

/// Key for one directory entry: namespace `1`, 8-byte little-endian parent
/// id, then the raw entry name bytes.
pub fn dir_entry_key(dir_id: u64, name: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + 8 + name.len());
    k.push(NS_DIR_ENTRY);
    k.extend_from_slice(&dir_id.to_le_bytes());
    k.extend_from_slice(name);
    k
}

/// Fixed 9-byte prefix shared by every entry under `dir_id`.
pub fn dir_entry_prefix(dir_id: u64) -> [u8; 9] {
    let mut k = [0u8; 9];
    k[0] = NS_DIR_ENTRY;
    k[1..9].copy_from_slice(&dir_id.to_le_bytes());
    k
}

/// Extracts the entry name suffix from a full namespace-1 key, given the
/// key is known to start with `dir_entry_prefix(dir_id)`.
pub fn dir_entry_name(key: &[u8]) -> &[u8] {
    &key[9..]
}

pub fn piece_index_key(file_hash: &[u8; 32]) -> [u8; 33] {
    let mut k = [0u8; 33];
    k[0] = NS_PIECE_INDEX;
    k[1..].copy_from_slice(file_hash);
    k
}

pub fn file_meta_key(file_hash: &[u8; 32]) -> [u8; 33] {
    let mut k = [0u8; 33];
    k[0] = NS_FILE_META;
    k[1..].copy_from_slice(file_hash);
    k
}

/// Key for one (file hash, path) pair in the reverse index: namespace `4`,
/// 32-byte file hash, then the leading 8 bytes of BLAKE3(path) so that one
/// hash may map to multiple paths without collision.
pub fn hash_path_key(file_hash: &[u8; 32], path: &str) -> [u8; 41] {
    let path_hash = crate::hash::hash(path.as_bytes());
    let mut k = [0u8; 41];
    k[0] = NS_HASH_PATH;
    k[1..33].copy_from_slice(file_hash);
    k[33..41].copy_from_slice(&path_hash[..8]);
    k
}

/// Fixed 33-byte prefix shared by every path entry for one file hash.
pub fn hash_path_prefix(file_hash: &[u8; 32]) -> [u8; 33] {
    let mut k = [0u8; 33];
    k[0] = NS_HASH_PATH;
    k[1..].copy_from_slice(file_hash);
    k
}

/// The value half of a namespace-1 entry, discriminated on disk purely by
/// its byte length (16 / 48 / 8), matching a tagged enum in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirEntry {
    Unhashed { lastmod: i64, size: u64 },
    Hashed { lastmod: i64, size: u64, b3: [u8; 32] },
    Subdir { child_id: u64 },
}

impl DirEntry {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DirEntry::Unhashed { lastmod, size } => {
                let mut v = Vec::with_capacity(16);
                v.extend_from_slice(&lastmod.to_le_bytes());
                v.extend_from_slice(&size.to_le_bytes());
                v
            }
            DirEntry::Hashed { lastmod, size, b3 } => {
                let mut v = Vec::with_capacity(48);
                v.extend_from_slice(&lastmod.to_le_bytes());
                v.extend_from_slice(&size.to_le_bytes());
                v.extend_from_slice(b3);
                v
            }
            DirEntry::Subdir { child_id } => child_id.to_le_bytes().to_vec(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        match bytes.len() {
            16 => Ok(DirEntry::Unhashed {
                lastmod: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
                size: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            }),
            48 => {
                let mut b3 = [0u8; 32];
                b3.copy_from_slice(&bytes[16..48]);
                Ok(DirEntry::Hashed {
                    lastmod: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
                    size: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
                    b3,
                })
            }
            8 => Ok(DirEntry::Subdir {
                child_id: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            }),
            n => Err(Error::StoreFatal(format!("directory entry value has invalid length {n}"))),
        }
    }

    pub fn is_subdir(&self) -> bool {
        matches!(self, DirEntry::Subdir { .. })
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, DirEntry::Hashed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_entry_value_roundtrips_all_variants() {
        let unhashed = DirEntry::Unhashed { lastmod: 123, size: 456 };
        assert_eq!(DirEntry::decode(&unhashed.encode()).unwrap(), unhashed);

        let hashed = DirEntry::Hashed { lastmod: -7, size: 0, b3: [9u8; 32] };
        assert_eq!(DirEntry::decode(&hashed.encode()).unwrap(), hashed);

        let subdir = DirEntry::Subdir { child_id: 42 };
        assert_eq!(DirEntry::decode(&subdir.encode()).unwrap(), subdir);
    }

    #[test]
    fn invalid_length_value_is_rejected() {
        assert!(DirEntry::decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn dir_entry_keys_sort_by_name_within_one_parent() {
        let a = dir_entry_key(1, b"aaa");
        let b = dir_entry_key(1, b"bbb");
        assert!(a < b);
        assert!(a.starts_with(&dir_entry_prefix(1)));
    }

    #[test]
    fn hash_path_key_includes_distinct_path_hash_suffix() {
        let h = [1u8; 32];
        let k1 = hash_path_key(&h, "a/b");
        let k2 = hash_path_key(&h, "a/c");
        assert_ne!(k1, k2);
        assert!(k1.starts_with(&hash_path_prefix(&h)));
    }
}
