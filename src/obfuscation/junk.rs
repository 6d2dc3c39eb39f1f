//! Junk packet generation.
//!
//! Junk packets are shapeless random datagrams sent ahead of a handshake
//! init to confuse traffic classifiers. The AWG server discards them.

use crate::config::Config;
use crate::crypto::random;

/// Generate exactly `Jc` junk packets with sizes uniform in `[Jmin, Jmax]`.
///
/// Degenerate bounds are normalized rather than rejected; configuration
/// validation has already flagged them at startup.
pub fn generate_junk_packets(cfg: &Config) -> Vec<Vec<u8>> {
    if cfg.jc == 0 {
        return Vec::new();
    }

    let jmin = cfg.jmin.max(1);
    let jmax = cfg.jmax.max(jmin);

    (0..cfg.jc)
        .map(|_| {
            let mut pkt = vec![0u8; random::pick_len(jmin, jmax)];
            random::fill(&mut pkt);
            pkt
        })
        .collect()
}
