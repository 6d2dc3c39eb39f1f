//! # awg-relay
//!
//! A unidirectional-per-peer UDP relay between a standard WireGuard client
//! and an AmneziaWG server. The relay rewrites packet framing in both
//! directions so each side sees the dialect it expects:
//!
//! ```text
//! ┌───────────┐ standard WG  ┌─────────────────────────────┐  AWG framing ┌────────────┐
//! │ WG client │─────────────▶│  transform engine + decoys  │─────────────▶│ AWG server │
//! │ (router)  │◀─────────────│  (this crate)               │◀─────────────│            │
//! └───────────┘              └─────────────────────────────┘              └────────────┘
//! ```
//!
//! Per datagram the hot path:
//!
//! 1. Classifies the packet by message type and length
//! 2. Rewrites the 4-byte type header and strips or prepends random padding
//! 3. Re-signs the BLAKE2s-128 MAC1 on handshake packets the rewrite
//!    invalidated
//! 4. Injects junk and CPS decoy packets ahead of the first handshake
//!
//! The session layer keeps a resilient connected socket to the server with
//! reconnect, exponential backoff, and an inactivity timeout. On Linux both
//! directions run on batched `recvmmsg`/`sendmmsg` I/O.
//!
//! Out of scope by design: all WireGuard cryptography beyond BLAKE2s (the
//! Noise payload is never inspected), NAT traversal, routing, and
//! multiplexing more than one logical client.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod obfuscation;
pub mod proxy;
pub mod transform;

pub use config::{Config, HRange, LogLevel, ProtocolMode, Settings};
pub use error::{Error, Result};
pub use proxy::Proxy;
