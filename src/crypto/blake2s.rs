//! BLAKE2s (RFC 7693), reduced to what MAC1 rewriting needs.
//!
//! Only two variants are exposed:
//!
//! 1. **Unkeyed 256-bit digest** — derives the per-peer `mac1` key
//! 2. **Keyed 128-bit MAC** — the MAC1 tag itself
//!
//! The keyed variant stores the 32-byte key as the first (zero-padded)
//! message block, per the RFC; the tag is the first 16 bytes of the
//! 16-byte-digest output.

const BLOCK_SIZE: usize = 64;

const IV: [u32; 8] = [
    0x6A09_E667, 0xBB67_AE85, 0x3C6E_F372, 0xA54F_F53A,
    0x510E_527F, 0x9B05_688C, 0x1F83_D9AB, 0x5BE0_CD19,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

#[inline(always)]
fn g(v: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize, x: u32, y: u32) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(12);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(8);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(7);
}

fn compress(h: &mut [u32; 8], block: &[u8], t: u64, last: bool) {
    debug_assert_eq!(block.len(), BLOCK_SIZE);

    let mut m = [0u32; 16];
    for (i, word) in m.iter_mut().enumerate() {
        *word = u32::from_le_bytes(block[4 * i..4 * i + 4].try_into().unwrap());
    }

    let mut v = [0u32; 16];
    v[..8].copy_from_slice(h);
    v[8..12].copy_from_slice(&IV[..4]);
    v[12] = (t as u32) ^ IV[4];
    v[13] = ((t >> 32) as u32) ^ IV[5];
    v[14] = IV[6];
    v[15] = IV[7];
    if last {
        v[14] ^= 0xFFFF_FFFF;
    }

    for s in &SIGMA {
        g(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        g(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        g(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        g(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
        g(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        g(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        g(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        g(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
}

/// Incremental BLAKE2s state.
///
/// A sequence of `update` calls over arbitrary splits of the input produces
/// the same digest as a single call over the concatenation.
pub(crate) struct Blake2s {
    h: [u32; 8],
    t: u64,
    buf: [u8; BLOCK_SIZE],
    buf_len: usize,
}

impl Blake2s {
    fn new(out_len: usize, key: Option<&[u8; 32]>) -> Self {
        debug_assert!(out_len == 16 || out_len == 32);

        let mut h = IV;
        let key_len = key.map_or(0u32, |_| 32);
        h[0] ^= 0x0101_0000 ^ (key_len << 8) ^ out_len as u32;

        let mut state = Self { h, t: 0, buf: [0u8; BLOCK_SIZE], buf_len: 0 };
        if let Some(key) = key {
            // The key occupies the whole first block, zero padded.
            state.buf[..32].copy_from_slice(key);
            state.buf_len = BLOCK_SIZE;
        }
        state
    }

    pub(crate) fn unkeyed(out_len: usize) -> Self {
        Self::new(out_len, None)
    }

    pub(crate) fn keyed(out_len: usize, key: &[u8; 32]) -> Self {
        Self::new(out_len, Some(key))
    }

    pub(crate) fn update(&mut self, mut data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let fill = BLOCK_SIZE - self.buf_len;
        if data.len() > fill {
            self.buf[self.buf_len..].copy_from_slice(&data[..fill]);
            self.t += BLOCK_SIZE as u64;
            let block = self.buf;
            compress(&mut self.h, &block, self.t, false);
            data = &data[fill..];
            self.buf_len = 0;

            // A trailing full block stays buffered so the final compress
            // can carry the last-block flag.
            while data.len() > BLOCK_SIZE {
                self.t += BLOCK_SIZE as u64;
                compress(&mut self.h, &data[..BLOCK_SIZE], self.t, false);
                data = &data[BLOCK_SIZE..];
            }
        }

        self.buf[self.buf_len..self.buf_len + data.len()].copy_from_slice(data);
        self.buf_len += data.len();
    }

    /// Consume the state and return the full 32 bytes of output words.
    ///
    /// Callers truncate to the configured output length.
    pub(crate) fn finalize(mut self) -> [u8; 32] {
        self.t += self.buf_len as u64;
        self.buf[self.buf_len..].fill(0);
        let block = self.buf;
        compress(&mut self.h, &block, self.t, true);

        let mut out = [0u8; 32];
        for (i, word) in self.h.iter().enumerate() {
            out[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

/// One-shot unkeyed BLAKE2s with 32-byte output.
pub fn digest256(data: &[u8]) -> [u8; 32] {
    let mut state = Blake2s::unkeyed(32);
    state.update(data);
    state.finalize()
}

/// One-shot keyed BLAKE2s with 16-byte output (the MAC1 tag variant).
pub fn mac128(key: &[u8; 32], data: &[u8]) -> [u8; 16] {
    let mut state = Blake2s::keyed(16, key);
    state.update(data);
    let full = state.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}
