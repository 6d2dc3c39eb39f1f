//! Decoy traffic generation.
//!
//! Two kinds of cover traffic precede the first handshake:
//!
//! 1. **CPS packets** — structured covers built from the I1..I5 templates
//! 2. **Junk packets** — shapeless random datagrams
//!
//! Both are emitted client→server only, in a fixed order ahead of the
//! transformed handshake init.

pub mod cps;
pub mod junk;

pub use cps::{generate_cps_packets, CpsTemplate};
pub use junk::generate_junk_packets;
