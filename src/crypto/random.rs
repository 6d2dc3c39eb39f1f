//! Randomness for padding, junk, and decoy payloads.
//!
//! Padding bytes and junk packets are never validated by the peer; they only
//! have to look like noise on the wire. Everything here draws from the
//! thread-local generator, which keeps the packet hot path free of entropy
//! syscalls.

use rand::{thread_rng, Rng, RngCore};

const ALPHANUMERIC: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Fill a buffer with random bytes.
pub fn fill(dest: &mut [u8]) {
    thread_rng().fill_bytes(dest);
}

/// Fill a buffer with random alphanumeric ASCII (`[0-9A-Za-z]`).
pub fn alphanumeric_fill(dest: &mut [u8]) {
    let mut rng = thread_rng();
    for b in dest {
        *b = ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())];
    }
}

/// Fill a buffer with random decimal ASCII digits (`[0-9]`).
pub fn digit_fill(dest: &mut [u8]) {
    let mut rng = thread_rng();
    for b in dest {
        *b = b'0' + rng.gen_range(0..10u8);
    }
}

/// Pick a uniform value in `[min, max]` inclusive.
pub fn pick_u32(min: u32, max: u32) -> u32 {
    if min >= max {
        return min;
    }
    thread_rng().gen_range(min..=max)
}

/// Pick a uniform length in `[min, max]` inclusive.
pub fn pick_len(min: usize, max: usize) -> usize {
    if min >= max {
        return min;
    }
    thread_rng().gen_range(min..=max)
}
