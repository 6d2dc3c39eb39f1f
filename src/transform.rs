//! Packet transform engine: WireGuard ↔ AmneziaWG framing.
//!
//! Outbound (client→server) the engine replaces the 4-byte message type
//! with a pick from the configured H range, re-signs MAC1 where the type
//! change invalidated it, and prepends `S_n` bytes of random padding.
//! Inbound (server→client) it locates the type field under the padding,
//! restores the standard type, and re-signs the handshake response so the
//! client's WireGuard engine accepts it. Datagrams that match nothing are
//! decoys or corruption and are reported invalid for silent dropping.
//!
//! Both directions work in place on a caller-supplied buffer with enough
//! headroom for the largest padding prefix, so the hot path never
//! allocates.

use crate::config::Config;
use crate::crypto::mac1;
use crate::crypto::random;

/// Standard WireGuard message types (little-endian u32 in the first 4 bytes).
pub const HANDSHAKE_INIT: u32 = 1;
pub const HANDSHAKE_RESPONSE: u32 = 2;
pub const COOKIE_REPLY: u32 = 3;
pub const TRANSPORT_DATA: u32 = 4;

/// Standard WireGuard packet sizes.
pub const HANDSHAKE_INIT_SIZE: usize = 148;
pub const HANDSHAKE_RESPONSE_SIZE: usize = 92;
pub const COOKIE_REPLY_SIZE: usize = 64;
pub const TRANSPORT_MIN_SIZE: usize = 32;

#[inline]
fn read_type(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[..4].try_into().unwrap())
}

#[inline]
fn write_type(buf: &mut [u8], msg_type: u32) {
    buf[..4].copy_from_slice(&msg_type.to_le_bytes());
}

/// Transform an outbound WireGuard datagram into AmneziaWG framing.
///
/// `buf[headroom..headroom + n]` holds the received datagram; `headroom`
/// must be at least [`Config::max_scan`] so any padding prefix fits in
/// front without copying. Returns the bytes to put on the wire and whether
/// the decoy burst (CPS then junk) must precede them.
pub fn transform_outbound<'a>(
    cfg: &Config,
    buf: &'a mut [u8],
    headroom: usize,
    n: usize,
) -> (&'a [u8], bool) {
    debug_assert!(headroom >= cfg.max_scan());
    let end = headroom + n;
    if n < 4 {
        return (&buf[headroom..end], false);
    }

    let msg_type = read_type(&buf[headroom..]);
    match msg_type {
        HANDSHAKE_INIT if n == HANDSHAKE_INIT_SIZE => {
            write_type(&mut buf[headroom..], cfg.h1.pick());
            // The router signed MAC1 with type=1; the rewritten frame must
            // carry a tag the AWG server will accept.
            if cfg.server_pub != [0u8; 32] {
                mac1::rewrite_init_mac1(&mut buf[headroom..end], cfg.mac1key_server());
            }
            let start = headroom - cfg.s1;
            random::fill(&mut buf[start..headroom]);
            (&buf[start..end], cfg.jc > 0)
        }
        HANDSHAKE_RESPONSE if n == HANDSHAKE_RESPONSE_SIZE => {
            // MAC1 stays: the router computed it with the server's key,
            // which remains correct for the reconstructed frame.
            write_type(&mut buf[headroom..], cfg.h2.pick());
            let start = headroom - cfg.s2;
            random::fill(&mut buf[start..headroom]);
            (&buf[start..end], false)
        }
        COOKIE_REPLY if n == COOKIE_REPLY_SIZE => {
            write_type(&mut buf[headroom..], cfg.h3.pick());
            let start = headroom - cfg.s3;
            random::fill(&mut buf[start..headroom]);
            (&buf[start..end], false)
        }
        TRANSPORT_DATA if n >= TRANSPORT_MIN_SIZE => {
            if cfg.h4_noop() {
                return (&buf[headroom..end], false);
            }
            write_type(&mut buf[headroom..], cfg.h4.pick());
            let start = headroom - cfg.s4;
            random::fill(&mut buf[start..headroom]);
            (&buf[start..end], false)
        }
        // Unknown framing passes through untouched.
        _ => (&buf[headroom..end], false),
    }
}

/// Restore an inbound AmneziaWG datagram to standard WireGuard framing.
///
/// The type field may sit at any offset in `[0, max_scan]` because of the
/// padding prefixes. Returns the restored window, or `None` when nothing
/// matches (server-side decoy traffic or a corrupted frame).
pub fn transform_inbound<'a>(cfg: &Config, buf: &'a mut [u8]) -> Option<&'a [u8]> {
    let n = buf.len();
    if n < 4 {
        return None;
    }

    // Zero-offset transport fast path: the overwhelmingly common case.
    let h = read_type(buf);
    if cfg.h4.contains(h) && n >= TRANSPORT_MIN_SIZE {
        if !cfg.h4_noop() {
            write_type(buf, TRANSPORT_DATA);
        }
        return Some(&buf[..n]);
    }

    // Padded frame: scan for the type field. At each offset transport wins
    // over the handshake types; H ranges may overlap, and the transport
    // check matches the high-frequency case.
    let mut off = 0;
    while off <= cfg.max_scan() && off + 4 <= n {
        let h = read_type(&buf[off..]);
        let rem = n - off;

        if cfg.h4.contains(h) && rem >= TRANSPORT_MIN_SIZE {
            write_type(&mut buf[off..], TRANSPORT_DATA);
            return Some(&buf[off..n]);
        }
        if cfg.h1.contains(h) && rem == HANDSHAKE_INIT_SIZE {
            write_type(&mut buf[off..], HANDSHAKE_INIT);
            return Some(&buf[off..n]);
        }
        if cfg.h2.contains(h) && rem == HANDSHAKE_RESPONSE_SIZE {
            write_type(&mut buf[off..], HANDSHAKE_RESPONSE);
            // The server signed with the original AWG type; re-sign for the
            // restored frame so the client's engine accepts it.
            if cfg.client_pub != [0u8; 32] {
                mac1::rewrite_response_mac1(
                    &mut buf[off..off + HANDSHAKE_RESPONSE_SIZE],
                    cfg.mac1key_client(),
                );
            }
            return Some(&buf[off..n]);
        }
        if cfg.h3.contains(h) && rem == COOKIE_REPLY_SIZE {
            write_type(&mut buf[off..], COOKIE_REPLY);
            return Some(&buf[off..n]);
        }

        off += 1;
    }

    None
}
