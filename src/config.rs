//! Obfuscation parameters and process configuration.
//!
//! Everything is read from `AWG_*` environment variables once at startup and
//! is immutable afterwards. Parse and validation problems are accumulated so
//! the operator sees every misconfiguration in a single report instead of
//! fixing them one restart at a time.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::{mac1, random};
use crate::error::{Error, Result};
use crate::obfuscation::CpsTemplate;
use crate::transform;

/// Closed `u32` range for a replacement message type (`H1..H4`).
///
/// v1 configurations collapse the range to a single value (`min == max`);
/// v2 configurations pick a fresh value from the range per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HRange {
    pub min: u32,
    pub max: u32,
}

impl HRange {
    /// A range holding exactly one value.
    pub const fn single(value: u32) -> Self {
        Self { min: value, max: value }
    }

    pub fn contains(&self, value: u32) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn is_single(&self) -> bool {
        self.min == self.max
    }

    /// Pick a value from the range, skipping the RNG for collapsed ranges.
    pub fn pick(&self) -> u32 {
        if self.is_single() {
            self.min
        } else {
            random::pick_u32(self.min, self.max)
        }
    }
}

impl fmt::Display for HRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Log verbosity, from `AWG_LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(LogLevel::None),
            "error" => Some(LogLevel::Error),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// The `tracing` filter directive equivalent to this level.
    pub fn env_filter(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Diagnostic protocol generation, derived from the parameter shape.
///
/// Purely informational: the transform engine reads the numeric fields
/// directly and never branches on this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    V1,
    V1_5,
    V2,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolMode::V1 => "v1",
            ProtocolMode::V1_5 => "v1.5",
            ProtocolMode::V2 => "v2",
        })
    }
}

/// All obfuscation parameters, immutable once [`Config::finalize`] has
/// computed the derived fields.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Junk packet count sent ahead of a handshake init.
    pub jc: u32,
    /// Junk packet size bounds, inclusive.
    pub jmin: usize,
    pub jmax: usize,
    /// Random padding prepended to init / response / cookie / transport.
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    /// Replacement message types for the four WireGuard packet kinds.
    pub h1: HRange,
    pub h2: HRange,
    pub h3: HRange,
    pub h4: HRange,
    /// CPS templates I1..I5.
    pub cps: [Option<CpsTemplate>; 5],
    /// AWG server public key (outbound init MAC1 recomputation).
    pub server_pub: [u8; 32],
    /// WG client public key (inbound response MAC1 recomputation).
    pub client_pub: [u8; 32],
    /// Inactivity timeout in seconds.
    pub timeout_secs: u64,
    pub log_level: LogLevel,

    pub(crate) mac1key_server: [u8; 32],
    pub(crate) mac1key_client: [u8; 32],
    pub(crate) max_scan: usize,
    pub(crate) h4_noop: bool,
}

impl Config {
    /// Compute the derived fields. Must be called once after the parameters
    /// are set and before the config is shared.
    pub fn finalize(&mut self) {
        self.mac1key_server = mac1::mac1_key(&self.server_pub);
        self.mac1key_client = mac1::mac1_key(&self.client_pub);
        self.max_scan = self.s1.max(self.s2).max(self.s3).max(self.s4);
        self.h4_noop = self.h4.is_single()
            && self.h4.min == transform::TRANSPORT_DATA
            && self.s4 == 0;
    }

    pub fn mac1key_server(&self) -> &[u8; 32] {
        &self.mac1key_server
    }

    pub fn mac1key_client(&self) -> &[u8; 32] {
        &self.mac1key_client
    }

    /// Highest possible padding prefix; bounds the inbound type-field scan.
    pub fn max_scan(&self) -> usize {
        self.max_scan
    }

    /// True when transport data needs no rewriting at all (`H4 == {4}` and
    /// `S4 == 0`), which unlocks the zero-copy fast paths.
    pub fn h4_noop(&self) -> bool {
        self.h4_noop
    }

    /// Classify the configuration as v1 / v1.5 / v2.
    pub fn mode(&self) -> ProtocolMode {
        let ranged = [&self.h1, &self.h2, &self.h3, &self.h4]
            .iter()
            .any(|h| !h.is_single());
        if self.s3 > 0 || self.s4 > 0 || ranged {
            ProtocolMode::V2
        } else if self.cps.iter().any(Option::is_some) {
            ProtocolMode::V1_5
        } else {
            ProtocolMode::V1
        }
    }

    /// Range-check the numeric parameters, returning one finding per
    /// violation.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !(1..=1500).contains(&self.jmin) {
            issues.push(format!("AWG_JMIN: must be in [1, 1500], got {}", self.jmin));
        }
        if !(1..=1500).contains(&self.jmax) {
            issues.push(format!("AWG_JMAX: must be in [1, 1500], got {}", self.jmax));
        }
        if self.jmin > self.jmax {
            issues.push("AWG_JMIN: must not exceed AWG_JMAX".to_string());
        }
        for (name, s) in [
            ("AWG_S1", self.s1),
            ("AWG_S2", self.s2),
            ("AWG_S3", self.s3),
            ("AWG_S4", self.s4),
        ] {
            if s > 256 {
                issues.push(format!("{name}: must be in [0, 256], got {s}"));
            }
        }
        for (name, h) in [
            ("AWG_H1", self.h1),
            ("AWG_H2", self.h2),
            ("AWG_H3", self.h3),
            ("AWG_H4", self.h4),
        ] {
            if h.min > h.max {
                issues.push(format!("{name}: min > max"));
            }
        }

        issues
    }
}

/// Fully parsed process configuration: the two endpoint specs plus the
/// obfuscation parameters.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `host:port` (or `:port`) to listen on for the WG client.
    pub listen: String,
    /// `host:port` of the AWG server; kept unresolved so reconnects can
    /// re-resolve DNS.
    pub remote: String,
    pub config: Config,
}

/// Load the configuration from the process environment.
pub fn from_env() -> Result<Settings> {
    load(|name| std::env::var(name).ok())
}

/// Load the configuration through an arbitrary variable lookup.
///
/// Empty values are treated as unset, matching shell behavior for optional
/// variables.
pub(crate) fn load(get: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let get = |name: &str| get(name).filter(|v| !v.is_empty());
    let mut issues: Vec<String> = Vec::new();

    let listen = required(&get, "AWG_LISTEN", "listen address", ":51820", &mut issues);
    let remote = required(
        &get,
        "AWG_REMOTE",
        "server endpoint (Endpoint from the [Peer] section)",
        "1.2.3.4:443",
        &mut issues,
    );
    let jc = required(&get, "AWG_JC", "junk packet count (Jc)", "5", &mut issues);
    let jmin = required(&get, "AWG_JMIN", "min junk size (Jmin)", "30", &mut issues);
    let jmax = required(&get, "AWG_JMAX", "max junk size (Jmax)", "500", &mut issues);
    let s1 = required(&get, "AWG_S1", "init padding bytes (S1)", "20", &mut issues);
    let s2 = required(&get, "AWG_S2", "response padding bytes (S2)", "20", &mut issues);
    let h1 = required(&get, "AWG_H1", "init type (H1)", "1234567890", &mut issues);
    let h2 = required(&get, "AWG_H2", "response type (H2)", "1234567891", &mut issues);
    let h3 = required(&get, "AWG_H3", "cookie type (H3)", "1234567892", &mut issues);
    let h4 = required(&get, "AWG_H4", "transport type (H4)", "1234567893", &mut issues);
    let server_pub = required(
        &get,
        "AWG_SERVER_PUB",
        "server public key, base64 (PublicKey from the [Peer] section)",
        "AAAA...=",
        &mut issues,
    );
    let client_pub = required(
        &get,
        "AWG_CLIENT_PUB",
        "client public key, base64 (derive via `wg pubkey`)",
        "BBBB...=",
        &mut issues,
    );

    // Report every missing variable before attempting to parse anything.
    if !issues.is_empty() {
        return Err(Error::config_report(&issues));
    }

    let mut cfg = Config {
        jc: parse_u32("AWG_JC", &jc, &mut issues),
        jmin: parse_usize("AWG_JMIN", &jmin, &mut issues),
        jmax: parse_usize("AWG_JMAX", &jmax, &mut issues),
        s1: parse_usize("AWG_S1", &s1, &mut issues),
        s2: parse_usize("AWG_S2", &s2, &mut issues),
        h1: parse_h_range("AWG_H1", &h1, &mut issues),
        h2: parse_h_range("AWG_H2", &h2, &mut issues),
        h3: parse_h_range("AWG_H3", &h3, &mut issues),
        h4: parse_h_range("AWG_H4", &h4, &mut issues),
        server_pub: parse_pubkey("AWG_SERVER_PUB", &server_pub, &mut issues),
        client_pub: parse_pubkey("AWG_CLIENT_PUB", &client_pub, &mut issues),
        timeout_secs: 180,
        ..Config::default()
    };

    if let Some(v) = get("AWG_S3") {
        cfg.s3 = parse_usize("AWG_S3", &v, &mut issues);
    }
    if let Some(v) = get("AWG_S4") {
        cfg.s4 = parse_usize("AWG_S4", &v, &mut issues);
    }

    for (i, name) in ["AWG_I1", "AWG_I2", "AWG_I3", "AWG_I4", "AWG_I5"]
        .iter()
        .enumerate()
    {
        if let Some(v) = get(name) {
            match CpsTemplate::parse(&v) {
                Ok(tmpl) => cfg.cps[i] = Some(tmpl),
                Err(e) => issues.push(format!("{name}: {e}")),
            }
        }
    }

    if let Some(v) = get("AWG_TIMEOUT") {
        match v.parse::<u64>() {
            Ok(t) => cfg.timeout_secs = t,
            Err(e) => issues.push(format!("AWG_TIMEOUT: expected integer: {e}")),
        }
    }

    if let Some(v) = get("AWG_LOG_LEVEL") {
        match LogLevel::parse(&v) {
            Some(level) => cfg.log_level = level,
            None => issues.push(format!(
                "AWG_LOG_LEVEL: expected none, error, info, or debug, got {v:?}"
            )),
        }
    }

    issues.extend(cfg.validate());
    if !issues.is_empty() {
        return Err(Error::config_report(&issues));
    }

    cfg.finalize();
    Ok(Settings { listen, remote, config: cfg })
}

fn required(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    hint: &str,
    example: &str,
    issues: &mut Vec<String>,
) -> String {
    match get(name) {
        Some(v) => v,
        None => {
            issues.push(format!("{name} is not set -- {hint} (example: {name}={example})"));
            String::new()
        }
    }
}

fn parse_u32(name: &str, raw: &str, issues: &mut Vec<String>) -> u32 {
    match raw.parse() {
        Ok(v) => v,
        Err(e) => {
            issues.push(format!("{name}: expected integer: {e}"));
            0
        }
    }
}

fn parse_usize(name: &str, raw: &str, issues: &mut Vec<String>) -> usize {
    match raw.parse() {
        Ok(v) => v,
        Err(e) => {
            issues.push(format!("{name}: expected integer: {e}"));
            0
        }
    }
}

fn parse_h_range(name: &str, raw: &str, issues: &mut Vec<String>) -> HRange {
    match raw.split_once('-') {
        None => HRange::single(parse_u32(name, raw, issues)),
        Some((lo, hi)) => HRange {
            min: parse_u32(name, lo.trim(), issues),
            max: parse_u32(name, hi.trim(), issues),
        },
    }
}

fn parse_pubkey(name: &str, raw: &str, issues: &mut Vec<String>) -> [u8; 32] {
    match BASE64.decode(raw) {
        Err(e) => {
            issues.push(format!("{name}: invalid base64: {e}"));
            [0u8; 32]
        }
        Ok(bytes) if bytes.len() != 32 => {
            issues.push(format!("{name}: must be 32 bytes, got {}", bytes.len()));
            [0u8; 32]
        }
        Ok(bytes) => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AWG_LISTEN", ":51820"),
            ("AWG_REMOTE", "127.0.0.1:443"),
            ("AWG_JC", "5"),
            ("AWG_JMIN", "30"),
            ("AWG_JMAX", "500"),
            ("AWG_S1", "20"),
            ("AWG_S2", "20"),
            ("AWG_H1", "1234567890"),
            ("AWG_H2", "1234567891"),
            ("AWG_H3", "1234567892"),
            ("AWG_H4", "1234567893"),
            // base64 of 32 bytes
            ("AWG_SERVER_PUB", "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="),
            ("AWG_CLIENT_PUB", "Hx4dHBsaGRgXFhUUExIREA8ODQwLCgkIBwYFBAMCAQA="),
        ]
    }

    #[test]
    fn test_h_range_contains_and_pick() {
        let range = HRange { min: 100, max: 200 };
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));

        for _ in 0..1000 {
            assert!(range.contains(range.pick()));
        }
        assert_eq!(HRange::single(42).pick(), 42);
    }

    #[test]
    fn test_load_complete_config() {
        let settings = load(env(&complete_env())).unwrap();
        let cfg = &settings.config;

        assert_eq!(settings.listen, ":51820");
        assert_eq!(settings.remote, "127.0.0.1:443");
        assert_eq!(cfg.jc, 5);
        assert_eq!(cfg.jmin, 30);
        assert_eq!(cfg.jmax, 500);
        assert_eq!(cfg.h1, HRange::single(1234567890));
        assert_eq!(cfg.server_pub[0], 0);
        assert_eq!(cfg.server_pub[31], 31);
        assert_eq!(cfg.timeout_secs, 180);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.max_scan(), 20);
        assert!(!cfg.h4_noop());
    }

    #[test]
    fn test_load_optional_fields() {
        let mut pairs = complete_env();
        pairs.push(("AWG_S3", "15"));
        pairs.push(("AWG_S4", "25"));
        pairs.push(("AWG_I1", "<b 0xDEAD>"));
        pairs.push(("AWG_TIMEOUT", "60"));
        pairs.push(("AWG_LOG_LEVEL", "debug"));

        let settings = load(env(&pairs)).unwrap();
        let cfg = &settings.config;

        assert_eq!(cfg.s3, 15);
        assert_eq!(cfg.s4, 25);
        assert!(cfg.cps[0].is_some());
        assert!(cfg.cps[1].is_none());
        assert_eq!(cfg.timeout_secs, 60);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.max_scan(), 25);
    }

    #[test]
    fn test_load_h_range_syntax() {
        let mut pairs = complete_env();
        pairs.retain(|(k, _)| *k != "AWG_H4");
        pairs.push(("AWG_H4", "1000-2000"));

        let settings = load(env(&pairs)).unwrap();
        assert_eq!(settings.config.h4, HRange { min: 1000, max: 2000 });
        assert_eq!(settings.config.mode(), ProtocolMode::V2);
    }

    #[test]
    fn test_load_reports_all_missing_vars() {
        let err = load(env(&[("AWG_LISTEN", ":51820")])).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("AWG_REMOTE is not set"));
        assert!(text.contains("AWG_JC is not set"));
        assert!(text.contains("AWG_CLIENT_PUB is not set"));
    }

    #[test]
    fn test_load_reports_all_parse_errors() {
        let mut pairs = complete_env();
        pairs.retain(|(k, _)| !matches!(*k, "AWG_JC" | "AWG_H1" | "AWG_SERVER_PUB"));
        pairs.push(("AWG_JC", "five"));
        pairs.push(("AWG_H1", "10-5"));
        pairs.push(("AWG_SERVER_PUB", "notbase64!!"));
        pairs.push(("AWG_I2", "<unknown>"));

        let err = load(env(&pairs)).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("AWG_JC: expected integer"));
        assert!(text.contains("AWG_H1: min > max"));
        assert!(text.contains("AWG_SERVER_PUB: invalid base64"));
        assert!(text.contains("AWG_I2:"));
    }

    #[test]
    fn test_load_range_validation() {
        let mut pairs = complete_env();
        pairs.retain(|(k, _)| !matches!(*k, "AWG_JMIN" | "AWG_JMAX" | "AWG_S1"));
        pairs.push(("AWG_JMIN", "0"));
        pairs.push(("AWG_JMAX", "2000"));
        pairs.push(("AWG_S1", "300"));

        let err = load(env(&pairs)).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("AWG_JMIN: must be in [1, 1500]"));
        assert!(text.contains("AWG_JMAX: must be in [1, 1500]"));
        assert!(text.contains("AWG_S1: must be in [0, 256]"));
    }

    #[test]
    fn test_load_rejects_wrong_key_length() {
        let mut pairs = complete_env();
        pairs.retain(|(k, _)| *k != "AWG_CLIENT_PUB");
        pairs.push(("AWG_CLIENT_PUB", "AAEC")); // 3 bytes

        let err = load(env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("AWG_CLIENT_PUB: must be 32 bytes, got 3"));
    }

    #[test]
    fn test_mode_selector() {
        let mut cfg = Config {
            jmin: 1,
            jmax: 1,
            h1: HRange::single(1),
            h2: HRange::single(2),
            h3: HRange::single(3),
            h4: HRange::single(4),
            ..Config::default()
        };
        assert_eq!(cfg.mode(), ProtocolMode::V1);

        cfg.cps[2] = Some(CpsTemplate::parse("<c>").unwrap());
        assert_eq!(cfg.mode(), ProtocolMode::V1_5);

        cfg.s4 = 10;
        assert_eq!(cfg.mode(), ProtocolMode::V2);

        cfg.s4 = 0;
        cfg.cps[2] = None;
        cfg.h2 = HRange { min: 2, max: 9 };
        assert_eq!(cfg.mode(), ProtocolMode::V2);
    }

    #[test]
    fn test_finalize_derived_fields() {
        let mut cfg = Config {
            s1: 40,
            s2: 10,
            h4: HRange::single(transform::TRANSPORT_DATA),
            server_pub: [0xAB; 32],
            ..Config::default()
        };
        cfg.finalize();

        assert_eq!(cfg.max_scan(), 40);
        assert!(cfg.h4_noop());
        assert_eq!(*cfg.mac1key_server(), mac1::mac1_key(&[0xAB; 32]));
        assert_eq!(*cfg.mac1key_client(), mac1::mac1_key(&[0u8; 32]));

        // Any S4 padding or a non-trivial H4 defeats the no-op fast path.
        cfg.s4 = 1;
        cfg.finalize();
        assert!(!cfg.h4_noop());

        cfg.s4 = 0;
        cfg.h4 = HRange { min: 4, max: 5 };
        cfg.finalize();
        assert!(!cfg.h4_noop());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("none"), Some(LogLevel::None));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::None.env_filter(), "off");
        assert_eq!(LogLevel::Info.env_filter(), "info");
    }
}
