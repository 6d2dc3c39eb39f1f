//! Cryptographic primitives for MAC1 rewriting, plus the relay's
//! randomness source.
//!
//! The relay deliberately implements no WireGuard cryptography beyond
//! BLAKE2s: the Noise payload passes through opaque.

pub mod blake2s;
pub mod mac1;
pub mod random;

pub use blake2s::{digest256, mac128};
pub use mac1::{mac1_key, rewrite_init_mac1, rewrite_response_mac1};
