//! meshwire-proto - wire types and socket-kind registry for the meshwire
//! messaging fabric.
//!
//! This crate has no opinion about reactors, coordinators or reconciliation;
//! it only knows how to name a socket kind, tell whether two kinds can talk
//! to each other, and parse/serialize the two JSON documents the fabric
//! exchanges through the coordinator: the service manifest and the endpoint
//! advertisement.

pub mod socket_config;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The minimum supported set of socket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Pub,
    Sub,
    Push,
    Pull,
}

/// Bitmask of directions the reactor can poll a socket for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollMask {
    pub input: bool,
    pub output: bool,
}

impl PollMask {
    pub const NONE: PollMask = PollMask { input: false, output: false };
    pub const IN: PollMask = PollMask { input: true, output: false };
    pub const OUT: PollMask = PollMask { input: false, output: true };

    pub fn to_zmq(self) -> zmq::PollEvents {
        let mut e = zmq::PollEvents::empty();
        if self.input {
            e |= zmq::POLLIN;
        }
        if self.output {
            e |= zmq::POLLOUT;
        }
        e
    }

    pub fn from_zmq(events: zmq::PollEvents) -> Self {
        Self {
            input: events.contains(zmq::POLLIN),
            output: events.contains(zmq::POLLOUT),
        }
    }

    pub fn is_empty(self) -> bool {
        !self.input && !self.output
    }
}

impl std::ops::BitOr for PollMask {
    type Output = PollMask;

    fn bitor(self, rhs: PollMask) -> PollMask {
        PollMask {
            input: self.input || rhs.input,
            output: self.output || rhs.output,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid socket kind name: {0:?}")]
pub struct InvalidKind(pub String);

impl Kind {
    /// Canonical wire name, e.g. "zmq:PUB".
    pub fn wire_name(self) -> &'static str {
        match self {
            Kind::Pub => "zmq:PUB",
            Kind::Sub => "zmq:SUB",
            Kind::Push => "zmq:PUSH",
            Kind::Pull => "zmq:PULL",
        }
    }

    pub fn zmq_type(self) -> zmq::SocketType {
        match self {
            Kind::Pub => zmq::PUB,
            Kind::Sub => zmq::SUB,
            Kind::Push => zmq::PUSH,
            Kind::Pull => zmq::PULL,
        }
    }

    /// The direction this kind is polled for by default: SUB/PULL read,
    /// PUB/PUSH write.
    pub fn default_poll_dir(self) -> PollMask {
        match self {
            Kind::Sub | Kind::Pull => PollMask::IN,
            Kind::Pub | Kind::Push => PollMask::OUT,
        }
    }
}

/// Resolve a namespaced kind name (e.g. "zmq:pub") to a `Kind`.
///
/// The namespace prefix (`zmq:`) identifies the transport family; the
/// remainder compares case-insensitively against the known kind names.
pub fn resolve_kind(name: &str) -> Result<Kind, InvalidKind> {
    let rest = name
        .strip_prefix("zmq:")
        .ok_or_else(|| InvalidKind(name.to_string()))?;

    match rest.to_ascii_uppercase().as_str() {
        "PUB" => Ok(Kind::Pub),
        "SUB" => Ok(Kind::Sub),
        "PUSH" => Ok(Kind::Push),
        "PULL" => Ok(Kind::Pull),
        _ => Err(InvalidKind(name.to_string())),
    }
}

/// Whether a socket of kind `a` may connect to a socket of kind `b`.
///
/// PUB/SUB and PUSH/PULL are the only compatible pairs; a kind is never
/// compatible with itself.
pub fn compatible(a: Kind, b: Kind) -> bool {
    matches!(
        (a, b),
        (Kind::Pub, Kind::Sub)
            | (Kind::Sub, Kind::Pub)
            | (Kind::Push, Kind::Pull)
            | (Kind::Pull, Kind::Push)
    )
}

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

/// One bound URL advertised by a listening socket.
///
/// JSON field `ztype` carries the wire-level kind name; the struct field is
/// named `kind` since that's what it actually holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenRecord {
    #[serde(rename = "type")]
    pub fullname: String,
    #[serde(rename = "ztype")]
    pub kind: String,
    pub url: String,
    pub uuid: String,
    pub cell: String,
}

impl ListenRecord {
    pub fn new(
        fullname: impl Into<String>,
        kind: Kind,
        url: impl Into<String>,
        uuid: impl Into<String>,
        cell: impl Into<String>,
    ) -> Self {
        Self {
            fullname: fullname.into(),
            kind: kind.wire_name().to_string(),
            url: url.into(),
            uuid: uuid.into(),
            cell: cell.into(),
        }
    }

    /// Parse a `ListenRecord` from a JSON buffer. Returns `None` (and logs a
    /// warning) on any malformed or incomplete document.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        match serde_json::from_slice(buf) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(target: "zsock", error = %e, "invalid listen record JSON");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ListenRecord always serializes")
    }
}

/// One socket declared in a service manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketCfg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connect: HashMap<String, String>,
    #[serde(default)]
    pub bind: Vec<String>,
}

/// A full service manifest, as fetched from `/services/<srvtype>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCfg {
    pub name: String,
    pub sockets: Vec<SocketCfg>,
}

impl ServiceCfg {
    /// Parse a `ServiceCfg` from a JSON buffer. Returns `None` (and logs a
    /// warning) if the buffer isn't valid JSON or is missing `name`/`sockets`.
    ///
    /// Sockets that declare neither `bind` nor `connect` are dropped with a
    /// warning rather than failing the whole manifest.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let mut cfg: ServiceCfg = match serde_json::from_slice(buf) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(target: "zsock", error = %e, "invalid service manifest JSON");
                return None;
            }
        };

        cfg.sockets.retain(|s| {
            let ok = !s.connect.is_empty() || !s.bind.is_empty();
            if !ok {
                tracing::warn!(target: "zsock", socket = %s.name, "socket definition has neither bind nor connect, skipping");
            }
            ok
        });

        Some(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_kind_case_insensitive() {
        assert_eq!(resolve_kind("zmq:PUB").unwrap(), Kind::Pub);
        assert_eq!(resolve_kind("zmq:pub").unwrap(), Kind::Pub);
        assert_eq!(resolve_kind("zmq:PuLl").unwrap(), Kind::Pull);
    }

    #[test]
    fn test_resolve_kind_missing_prefix() {
        assert!(resolve_kind("PUB").is_err());
    }

    #[test]
    fn test_resolve_kind_unknown() {
        assert!(resolve_kind("zmq:ROUTER").is_err());
    }

    #[test]
    fn test_compatible_pairs() {
        assert!(compatible(Kind::Pub, Kind::Sub));
        assert!(compatible(Kind::Sub, Kind::Pub));
        assert!(compatible(Kind::Push, Kind::Pull));
        assert!(!compatible(Kind::Pub, Kind::Push));
        assert!(!compatible(Kind::Pub, Kind::Pub));
    }

    #[test]
    fn test_poll_mask_roundtrip() {
        let mask = PollMask::IN | PollMask::OUT;
        assert_eq!(PollMask::from_zmq(mask.to_zmq()), mask);
        assert!(PollMask::NONE.is_empty());
        assert!(!mask.is_empty());
    }

    #[test]
    fn test_default_poll_dir() {
        assert_eq!(Kind::Sub.default_poll_dir(), PollMask::IN);
        assert_eq!(Kind::Pull.default_poll_dir(), PollMask::IN);
        assert_eq!(Kind::Pub.default_poll_dir(), PollMask::OUT);
        assert_eq!(Kind::Push.default_poll_dir(), PollMask::OUT);
    }

    #[test]
    fn test_listen_record_roundtrip() {
        let rec = ListenRecord::new("svc.out0", Kind::Pub, "tcp://127.0.0.1:5001", "u-1", "cell-1");
        let json = rec.to_json();
        let parsed = ListenRecord::parse(json.as_bytes()).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_listen_record_field_name_is_ztype() {
        let rec = ListenRecord::new("svc.out0", Kind::Pub, "tcp://127.0.0.1:5001", "u-1", "cell-1");
        let json = rec.to_json();
        assert!(json.contains("\"ztype\":\"zmq:PUB\""));
    }

    #[test]
    fn test_listen_record_invalid_json() {
        assert!(ListenRecord::parse(b"not json").is_none());
    }

    #[test]
    fn test_service_cfg_parse() {
        let json = r#"{
            "name": "A",
            "sockets": [
                { "name": "out", "type": "zmq:PUB", "bind": ["tcp://127.0.0.1:5001"] },
                { "name": "in", "type": "zmq:SUB", "connect": { "B.out": "all" } },
                { "name": "broken", "type": "zmq:SUB" }
            ]
        }"#;
        let cfg = ServiceCfg::parse(json.as_bytes()).unwrap();
        assert_eq!(cfg.name, "A");
        assert_eq!(cfg.sockets.len(), 2);
        assert_eq!(cfg.sockets[0].name, "out");
        assert_eq!(cfg.sockets[1].connect.get("B.out").unwrap(), "all");
    }

    #[test]
    fn test_service_cfg_connect_defaults_empty() {
        let json = r#"{"name":"A","sockets":[{"name":"out","type":"zmq:PUB","bind":["tcp://x"]}]}"#;
        let cfg = ServiceCfg::parse(json.as_bytes()).unwrap();
        assert!(cfg.sockets[0].connect.is_empty());
    }

    #[test]
    fn test_service_cfg_invalid_json() {
        assert!(ServiceCfg::parse(b"{").is_none());
    }

    #[test]
    fn test_service_cfg_missing_required_field() {
        assert!(ServiceCfg::parse(br#"{"sockets":[]}"#).is_none());
    }
}
