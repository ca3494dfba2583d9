//! The BLAKE3 compression function: seven rounds of a ChaCha-like quarter
//! round over a 16-word state, with the message schedule permuted between
//! rounds.

use super::IV;

const MSG_PERMUTATION: [usize; 16] = [2, 6, 3, 10, 7, 0, 4, 13, 1, 11, 12, 5, 9, 14, 15, 8];

#[inline(always)]
fn g(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize, mx: u32, my: u32) {
    state[a] = state[a].wrapping_add(state[b]).wrapping_add(mx);
    state[d] = (state[d] ^ state[a]).rotate_right(16);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_right(12);
    state[a] = state[a].wrapping_add(state[b]).wrapping_add(my);
    state[d] = (state[d] ^ state[a]).rotate_right(8);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_right(7);
}

fn permute(m: &[u32; 16]) -> [u32; 16] {
    let mut out = [0u32; 16];
    for i in 0..16 {
        out[i] = m[MSG_PERMUTATION[i]];
    }
    out
}

/// Runs the full seven-round compression, returning the 16-word output state.
/// The first eight words are the new chaining value (possibly further
/// XOR-folded by the caller for a root output); BLAKE3's tree structure never
/// needs more than these 16 words of keystream since digests here are fixed
/// at 32 bytes.
pub(crate) fn compress(
    chaining_value: &[u32; 8],
    block_words: &[u32; 16],
    counter: u64,
    block_len: u32,
    flags: u32,
) -> [u32; 16] {
    #[rustfmt::skip]
    let mut state: [u32; 16] = [
        chaining_value[0], chaining_value[1], chaining_value[2], chaining_value[3],
        chaining_value[4], chaining_value[5], chaining_value[6], chaining_value[7],
        IV[0], IV[1], IV[2], IV[3],
        counter as u32, (counter >> 32) as u32, block_len, flags,
    ];
    let mut block = *block_words;

    for round in 0..7 {
        g(&mut state, 0, 4, 8, 12, block[0], block[1]);
        g(&mut state, 1, 5, 9, 13, block[2], block[3]);
        g(&mut state, 2, 6, 10, 14, block[4], block[5]);
        g(&mut state, 3, 7, 11, 15, block[6], block[7]);

        g(&mut state, 0, 5, 10, 15, block[8], block[9]);
        g(&mut state, 1, 6, 11, 12, block[10], block[11]);
        g(&mut state, 2, 7, 8, 13, block[12], block[13]);
        g(&mut state, 3, 4, 9, 14, block[14], block[15]);

        if round < 6 {
            block = permute(&block);
        }
    }

    for i in 0..8 {
        state[i] ^= state[i + 8];
        state[i + 8] ^= chaining_value[i];
    }
    state
}

pub(crate) fn first_8_words(state: [u32; 16]) -> [u32; 8] {
    let mut out = [0u32; 8];
    out.copy_from_slice(&state[..8]);
    out
}

pub(crate) fn words_from_le_bytes_64(bytes: &[u8; 64]) -> [u32; 16] {
    let mut words = [0u32; 16];
    for (i, w) in words.iter_mut().enumerate() {
        *w = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    }
    words
}

pub(crate) fn bytes_from_le_words_32(words: &[u32; 8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}

pub(crate) fn bytes_from_le_words_64(words: &[u32; 16]) -> [u8; 64] {
    let mut out = [0u8; 64];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}
