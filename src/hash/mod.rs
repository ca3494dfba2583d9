//! BLAKE3 hash primitive: chunking, chaining values, parent compression.
//!
//! This is a from-scratch implementation of the BLAKE3 tree hash rather than a
//! wrapper around the `blake3` crate, because the engine needs to extract and
//! later recombine per-piece chaining values (for manifest-level piece
//! verification) rather than just a single whole-file digest. The algorithm
//! follows the published BLAKE3 specification: a compression function built on
//! the same round/permutation structure as BLAKE2s, chunked into 1024-byte
//! leaves, folded upward through parent nodes, with a final compression
//! flagged as root.

mod compress;
mod tree;

pub use tree::{Hasher, Output, PieceOutput, hash, hash_piece, merge_pieces};

/// Length of one BLAKE3 chunk in bytes.
pub const CHUNK_LEN: usize = 1024;
/// Length of one BLAKE3 message block in bytes.
pub const BLOCK_LEN: usize = 64;
/// Output digest length in bytes.
pub const OUT_LEN: usize = 32;

pub(crate) const IV: [u32; 8] = [
    0x6A09_E667,
    0xBB67_AE85,
    0x3C6E_F372,
    0xA54F_F53A,
    0x510E_527F,
    0x9B05_688C,
    0x1F83_D9AB,
    0x5BE0_CD19,
];

pub(crate) const CHUNK_START: u32 = 1 << 0;
pub(crate) const CHUNK_END: u32 = 1 << 1;
pub(crate) const PARENT: u32 = 1 << 2;
pub(crate) const ROOT: u32 = 1 << 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_32_bytes_and_stable() {
        assert_eq!(hash(b"").len(), 32);
        assert_eq!(hash(b""), hash(b""));
    }

    #[test]
    fn empty_and_nonempty_inputs_differ() {
        assert_ne!(hash(b""), hash(b"a"));
    }

    #[test]
    fn deterministic() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(hash(data), hash(data));
    }

    #[test]
    fn single_bit_changes_digest() {
        let a = hash(b"aaaa");
        let b = hash(b"aaab");
        assert_ne!(a, b);
    }

    #[test]
    fn chunked_hash_piece_then_merge_matches_single_pass_small() {
        // One chunk: hash_piece of the whole thing IS the root directly.
        let data = vec![7u8; 500];
        let direct = hash(&data);
        let piece = hash_piece(0, &data);
        assert_eq!(direct, piece.root());
    }

    #[test]
    fn chunked_hash_piece_then_merge_matches_single_pass_multi_chunk() {
        let mut data = vec![0u8; 4096]; // 4 chunks
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let direct = hash(&data);

        let mut cvs = Vec::new();
        for (i, chunk) in data.chunks(CHUNK_LEN).enumerate() {
            cvs.push(hash_piece(i as u64, chunk).chaining_value());
        }
        let merged = merge_pieces(&cvs);
        assert_eq!(direct, merged.root());
    }

    #[test]
    fn chunked_merge_matches_single_pass_non_power_of_two_chunk_count() {
        // 3 chunks + a short tail chunk: exercises the general (non power-of-two)
        // recursive split in merge_pieces.
        let mut data = vec![0u8; CHUNK_LEN * 3 + 17];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let direct = hash(&data);
        let mut cvs = Vec::new();
        for (i, chunk) in data.chunks(CHUNK_LEN).enumerate() {
            cvs.push(hash_piece(i as u64, chunk).chaining_value());
        }
        let merged = merge_pieces(&cvs);
        assert_eq!(direct, merged.root());
    }

    #[test]
    fn piece_sized_hashing_matches_whole_file_hash() {
        // Two 1024-byte pieces hashed independently, then merged, must equal
        // hashing the whole 2048-byte buffer in one pass - this is the scenario
        // the hasher pool relies on for per-piece chaining values.
        let mut data = vec![0u8; 2048];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let direct = hash(&data);
        let p0 = hash_piece(0, &data[..1024]).chaining_value();
        let p1 = hash_piece(1, &data[1024..]).chaining_value();
        let merged = merge_pieces(&[p0, p1]);
        assert_eq!(direct, merged.root());
    }
}
