//! WireGuard MAC1 derivation and rewriting.
//!
//! Rewriting the message type changes the bytes MAC1 covers, so handshake
//! packets must be re-signed with the receiving peer's key or the WireGuard
//! engine on the other side rejects them. Offsets are fixed by the WireGuard
//! packet layout:
//!
//! * handshake init (148 B): MAC1 at `[116..132]`, covering `[0..116]`
//! * handshake response (92 B): MAC1 at `[60..76]`, covering `[0..60]`

use crate::crypto::blake2s;

/// Label prepended to the peer public key when deriving the MAC1 key.
pub const MAC1_LABEL: &[u8; 8] = b"mac1----";

const INIT_MAC1_OFFSET: usize = 116;
const RESPONSE_MAC1_OFFSET: usize = 60;
const MAC1_LEN: usize = 16;

/// Derive `mac1key = BLAKE2s-256("mac1----" || peer_pub)`.
///
/// Computed once per peer at configuration finalization.
pub fn mac1_key(peer_pub: &[u8; 32]) -> [u8; 32] {
    let mut input = [0u8; 40];
    input[..8].copy_from_slice(MAC1_LABEL);
    input[8..].copy_from_slice(peer_pub);
    blake2s::digest256(&input)
}

/// Recompute MAC1 in a handshake init packet. `buf` must hold at least the
/// 132 bytes up to the end of the MAC1 field.
pub fn rewrite_init_mac1(buf: &mut [u8], key: &[u8; 32]) {
    let tag = blake2s::mac128(key, &buf[..INIT_MAC1_OFFSET]);
    buf[INIT_MAC1_OFFSET..INIT_MAC1_OFFSET + MAC1_LEN].copy_from_slice(&tag);
}

/// Recompute MAC1 in a handshake response packet. `buf` must hold at least
/// the 76 bytes up to the end of the MAC1 field.
pub fn rewrite_response_mac1(buf: &mut [u8], key: &[u8; 32]) {
    let tag = blake2s::mac128(key, &buf[..RESPONSE_MAC1_OFFSET]);
    buf[RESPONSE_MAC1_OFFSET..RESPONSE_MAC1_OFFSET + MAC1_LEN].copy_from_slice(&tag);
}
