//! Chunk state, tree-node output, and the incremental/one-shot hashers built
//! on top of the compression function.

use super::compress::{
    bytes_from_le_words_32, bytes_from_le_words_64, compress, first_8_words, words_from_le_bytes_64,
};
use super::{BLOCK_LEN, CHUNK_END, CHUNK_LEN, CHUNK_START, IV, OUT_LEN, PARENT, ROOT};

/// A not-yet-finalized compression: either a leaf chunk's last block or a
/// parent node. Carries enough to be compressed twice - once as a
/// tree-internal chaining value, once (if this output happens to represent
/// the whole input) flagged as the root.
#[derive(Clone)]
pub struct Output {
    input_chaining_value: [u32; 8],
    block_words: [u32; 16],
    counter: u64,
    block_len: u32,
    flags: u32,
}

impl Output {
    /// The 32-byte chaining value of this node, for use as a child input to a
    /// parent compression. Never applies the root flag.
    pub fn chaining_value(&self) -> [u8; OUT_LEN] {
        let state = compress(
            &self.input_chaining_value,
            &self.block_words,
            self.counter,
            self.block_len,
            self.flags,
        );
        bytes_from_le_words_32(&first_8_words(state))
    }

    /// The 32-byte root hash of this node. Only meaningful when this output
    /// represents the entire hashed input (the top of the tree).
    pub fn root(&self) -> [u8; OUT_LEN] {
        let state = compress(
            &self.input_chaining_value,
            &self.block_words,
            self.counter,
            self.block_len,
            self.flags | ROOT,
        );
        bytes_from_le_words_32(&first_8_words(state))
    }
}

/// Public alias used where a piece's output is produced directly by
/// `hash_piece`/`merge_pieces` rather than via the streaming `Hasher`.
pub type PieceOutput = Output;

fn parent_output(left_cv: &[u8; OUT_LEN], right_cv: &[u8; OUT_LEN], flags: u32) -> Output {
    let mut block_bytes = [0u8; 64];
    block_bytes[..32].copy_from_slice(left_cv);
    block_bytes[32..].copy_from_slice(right_cv);
    Output {
        input_chaining_value: IV,
        block_words: words_from_le_bytes_64(&block_bytes),
        counter: 0,
        block_len: BLOCK_LEN as u32,
        flags: flags | PARENT,
    }
}

struct ChunkState {
    chaining_value: [u32; 8],
    chunk_counter: u64,
    block: [u8; 64],
    block_len: u8,
    blocks_compressed: u8,
    flags: u32,
}

impl ChunkState {
    fn new(chunk_counter: u64, flags: u32) -> Self {
        Self {
            chaining_value: IV,
            chunk_counter,
            block: [0; 64],
            block_len: 0,
            blocks_compressed: 0,
            flags,
        }
    }

    fn len(&self) -> usize {
        BLOCK_LEN * self.blocks_compressed as usize + self.block_len as usize
    }

    fn start_flag(&self) -> u32 {
        if self.blocks_compressed == 0 { CHUNK_START } else { 0 }
    }

    fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            if self.block_len as usize == BLOCK_LEN {
                let block_words = words_from_le_bytes_64(&self.block);
                let state = compress(
                    &self.chaining_value,
                    &block_words,
                    self.chunk_counter,
                    BLOCK_LEN as u32,
                    self.flags | self.start_flag(),
                );
                self.chaining_value = first_8_words(state);
                self.blocks_compressed += 1;
                self.block = [0; 64];
                self.block_len = 0;
            }
            let want = BLOCK_LEN - self.block_len as usize;
            let take = want.min(input.len());
            self.block[self.block_len as usize..self.block_len as usize + take]
                .copy_from_slice(&input[..take]);
            self.block_len += take as u8;
            input = &input[take..];
        }
    }

    fn output(&self) -> Output {
        let block_words = words_from_le_bytes_64(&self.block);
        Output {
            input_chaining_value: self.chaining_value,
            block_words,
            counter: self.chunk_counter,
            block_len: self.block_len as u32,
            flags: self.flags | self.start_flag() | CHUNK_END,
        }
    }
}

/// Incremental hasher over an arbitrary-length byte stream, producing the
/// whole-input BLAKE3 root. Maintains a stack of completed subtree chaining
/// values the same way the reference BLAKE3 construction does, so it is
/// correct for any total length (not just powers of two chunks).
pub struct Hasher {
    chunk_state: ChunkState,
    cv_stack: Vec<[u8; OUT_LEN]>,
    flags: u32,
    chunk_counter_base: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::with_chunk_counter(0)
    }

    fn with_chunk_counter(chunk_counter: u64) -> Self {
        Self {
            chunk_state: ChunkState::new(chunk_counter, 0),
            cv_stack: Vec::new(),
            flags: 0,
            chunk_counter_base: chunk_counter,
        }
    }

    fn add_chunk_chaining_value(&mut self, mut new_cv: [u8; OUT_LEN], mut total_chunks: u64) {
        while total_chunks & 1 == 0 {
            let left = self.cv_stack.pop().expect("stack underflow in blake3 tree merge");
            new_cv = parent_output(&left, &new_cv, self.flags).chaining_value();
            total_chunks >>= 1;
        }
        self.cv_stack.push(new_cv);
    }

    pub fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            if self.chunk_state.len() == CHUNK_LEN {
                let chunk_cv = self.chunk_state.output().chaining_value();
                let total_chunks = self.chunk_state.chunk_counter - self.chunk_counter_base + 1;
                self.add_chunk_chaining_value(chunk_cv, total_chunks);
                self.chunk_state = ChunkState::new(self.chunk_state.chunk_counter + 1, self.flags);
            }
            let want = CHUNK_LEN - self.chunk_state.len();
            let take = want.min(input.len());
            self.chunk_state.update(&input[..take]);
            input = &input[take..];
        }
    }

    /// Finalize into an `Output`. Caller decides whether to read `.root()` or
    /// `.chaining_value()` depending on whether this hasher covered the whole
    /// input or just a subtree.
    pub fn finalize(mut self) -> Output {
        let mut output = self.chunk_state.output();
        while let Some(left) = self.cv_stack.pop() {
            let right = output.chaining_value();
            output = parent_output(&left, &right, self.flags);
        }
        output
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot whole-input BLAKE3 root hash.
pub fn hash(data: &[u8]) -> [u8; OUT_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().root()
}

/// Hashes one piece (a contiguous byte range starting at BLAKE3 chunk counter
/// `chunk_start`). `bytes` is typically the configured piece size, a
/// power-of-two multiple of [`CHUNK_LEN`], except for a final shorter piece.
///
/// Returns an [`Output`] whose `.chaining_value()` is the subtree's chaining
/// value (valid as a child of a parent node) and whose `.root()` is only
/// meaningful when this piece is the entire file (chunk_start == 0 and the
/// file fits in one piece).
pub fn hash_piece(chunk_start: u64, bytes: &[u8]) -> PieceOutput {
    let mut hasher = Hasher::with_chunk_counter(chunk_start);
    hasher.update(bytes);
    hasher.finalize()
}

/// Largest power of two that is `<= n`. `n` must be nonzero.
fn largest_power_of_two_leq(n: usize) -> usize {
    debug_assert!(n >= 1);
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

/// A subtree that has either not been merged at all (a lone leaf chaining
/// value) or has been folded into a real parent node.
enum Merged {
    Leaf([u8; OUT_LEN]),
    Node(Output),
}

impl Merged {
    fn chaining_value(&self) -> [u8; OUT_LEN] {
        match self {
            Merged::Leaf(cv) => *cv,
            Merged::Node(output) => output.chaining_value(),
        }
    }
}

/// Recursively folds a slice of leaf chaining values into one subtree,
/// splitting at the same point BLAKE3's own tree construction would: the
/// left side takes the largest power-of-two count less than the total, so
/// that any power-of-two-sized slice collapses into a perfectly balanced
/// tree and a ragged final group still folds correctly.
fn merge_range(chaining_values: &[[u8; OUT_LEN]]) -> Merged {
    match chaining_values.len() {
        0 => unreachable!("merge_range called on an empty slice"),
        1 => Merged::Leaf(chaining_values[0]),
        2 => Merged::Node(parent_output(&chaining_values[0], &chaining_values[1], 0)),
        n => {
            let left_count = largest_power_of_two_leq(n - 1);
            let (left, right) = chaining_values.split_at(left_count);
            let left_merged = merge_range(left);
            let right_merged = merge_range(right);
            Merged::Node(parent_output(
                &left_merged.chaining_value(),
                &right_merged.chaining_value(),
                0,
            ))
        }
    }
}

/// Combines a flat, ordered list of chaining values (e.g. one per file piece)
/// into a single parent [`Output`], using the same largest-power-of-two split
/// BLAKE3 itself uses, so the piece count need not be a power of two.
///
/// Requires at least two chaining values: a single piece's own [`Output`]
/// (from [`hash_piece`]) already represents the whole tree and should be read
/// directly via its `.root()`/`.chaining_value()` rather than passed here.
pub fn merge_pieces(chaining_values: &[[u8; OUT_LEN]]) -> Output {
    assert!(
        chaining_values.len() >= 2,
        "merge_pieces requires at least two chaining values"
    );
    match merge_range(chaining_values) {
        Merged::Node(output) => output,
        Merged::Leaf(_) => unreachable!("two or more inputs always produce a parent node"),
    }
}

#[allow(dead_code)]
fn _unused_helper_kept_for_symmetry(words: &[u32; 16]) -> [u8; 64] {
    bytes_from_le_words_64(words)
}
