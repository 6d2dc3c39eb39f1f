//! Configurable Packet Structure (CPS) templates.
//!
//! A CPS template describes one synthetic cover packet as a sequence of
//! angle-bracketed tags:
//!
//! | tag | content |
//! |-----|---------|
//! | `<b 0xHH..>` | literal bytes from hex |
//! | `<r N>` | N uniform random bytes |
//! | `<rc N>` | N random alphanumeric ASCII bytes |
//! | `<rd N>` | N random decimal ASCII bytes |
//! | `<t>` | 4-byte little-endian unix timestamp at generation time |
//! | `<c>` | 4-byte little-endian packet counter |
//!
//! Up to five templates (I1..I5) are emitted ahead of a handshake init, in
//! index order, with the counter bumped after each packet.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::random;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(Vec<u8>),
    Random(usize),
    AlphanumericChars(usize),
    DecimalDigits(usize),
    Timestamp,
    Counter,
}

impl Segment {
    fn size(&self) -> usize {
        match self {
            Segment::Static(data) => data.len(),
            Segment::Random(n) | Segment::AlphanumericChars(n) | Segment::DecimalDigits(n) => *n,
            Segment::Timestamp | Segment::Counter => 4,
        }
    }
}

/// A parsed CPS template (one of I1..I5).
#[derive(Debug, Clone)]
pub struct CpsTemplate {
    segments: Vec<Segment>,
}

impl CpsTemplate {
    /// Parse a template string. Whitespace between tags is ignored; every
    /// tag must be closed; an empty template is an error.
    pub fn parse(input: &str) -> Result<Self> {
        let bytes = input.as_bytes();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i].is_ascii_whitespace() {
                i += 1;
                continue;
            }
            if bytes[i] != b'<' {
                return Err(Error::template(format!("expected '<' at position {i}")));
            }
            let Some(rel) = bytes[i + 1..].iter().position(|&b| b == b'>') else {
                return Err(Error::template(format!("unclosed '<' at position {i}")));
            };
            segments.push(parse_tag(&input[i + 1..i + 1 + rel])?);
            i += rel + 2;
        }

        if segments.is_empty() {
            return Err(Error::template("empty template"));
        }
        Ok(Self { segments })
    }

    /// Materialize one packet. `<t>` reads the clock now; `<c>` encodes the
    /// supplied counter without incrementing it.
    pub fn generate(&self, counter: u32) -> Vec<u8> {
        let total: usize = self.segments.iter().map(Segment::size).sum();
        let mut buf = vec![0u8; total];

        let mut off = 0;
        for seg in &self.segments {
            let end = off + seg.size();
            match seg {
                Segment::Static(data) => buf[off..end].copy_from_slice(data),
                Segment::Random(_) => random::fill(&mut buf[off..end]),
                Segment::AlphanumericChars(_) => random::alphanumeric_fill(&mut buf[off..end]),
                Segment::DecimalDigits(_) => random::digit_fill(&mut buf[off..end]),
                Segment::Timestamp => buf[off..end].copy_from_slice(&unix_now().to_le_bytes()),
                Segment::Counter => buf[off..end].copy_from_slice(&counter.to_le_bytes()),
            }
            off = end;
        }
        buf
    }
}

/// Generate all configured CPS packets in I1 → I5 order.
///
/// The counter is incremented once per emitted packet, after generation, so
/// the first packet of a burst sees the counter's current value.
pub fn generate_cps_packets(
    templates: &[Option<CpsTemplate>; 5],
    counter: &mut u32,
) -> Vec<Vec<u8>> {
    let mut packets = Vec::with_capacity(5);
    for tmpl in templates.iter().flatten() {
        packets.push(tmpl.generate(*counter));
        *counter = counter.wrapping_add(1);
    }
    packets
}

fn parse_tag(tag: &str) -> Result<Segment> {
    let Some(kind) = tag.bytes().next() else {
        return Err(Error::template("empty tag"));
    };

    match kind {
        b'b' => {
            let rest = tag[1..].trim_start();
            let hex = rest
                .strip_prefix("0x")
                .or_else(|| rest.strip_prefix("0X"))
                .ok_or_else(|| Error::template("expected '0x' prefix in <b> tag"))?;
            if hex.is_empty() {
                return Err(Error::template("empty hex in <b> tag"));
            }
            Ok(Segment::Static(decode_hex(hex)?))
        }
        b'r' => {
            if let Some(rest) = tag[1..].strip_prefix('c') {
                Ok(Segment::AlphanumericChars(parse_size(rest, "rc")?))
            } else if let Some(rest) = tag[1..].strip_prefix('d') {
                Ok(Segment::DecimalDigits(parse_size(rest, "rd")?))
            } else {
                Ok(Segment::Random(parse_size(&tag[1..], "r")?))
            }
        }
        b't' => Ok(Segment::Timestamp),
        b'c' => Ok(Segment::Counter),
        other => Err(Error::template(format!("unknown tag kind: {}", other as char))),
    }
}

fn parse_size(raw: &str, tag: &str) -> Result<usize> {
    let size: usize = raw
        .trim_start()
        .parse()
        .map_err(|e| Error::template(format!("invalid size in <{tag}> tag: {e}")))?;
    if size == 0 {
        return Err(Error::template(format!("<{tag}> size must be positive")));
    }
    Ok(size)
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::template("odd-length hex string"));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| match (hex_val(pair[0]), hex_val(pair[1])) {
            (Some(hi), Some(lo)) => Ok(hi << 4 | lo),
            _ => Err(Error::template("invalid hex digit in <b> tag")),
        })
        .collect()
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
