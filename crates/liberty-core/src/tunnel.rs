//! Forwarding channel requests and their rejections.

use std::fmt;
use thiserror::Error;

/// A parsed `direct-tcpip` request.
///
/// The origin fields are what the client reports about its own end of the
/// forwarded connection. They are logged but never used for policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub host: String,
    pub port: u16,
    pub origin_host: String,
    pub origin_port: u16,
}

impl TunnelRequest {
    /// Validate the raw channel-open fields. SSH carries ports as `u32`.
    pub fn parse(
        host: &str,
        port: u32,
        origin_host: &str,
        origin_port: u32,
    ) -> Result<Self, TunnelRejection> {
        if host.is_empty() {
            return Err(TunnelRejection::new(
                RejectKind::Malformed,
                "error parsing forward data: empty destination host",
            ));
        }
        let port = u16::try_from(port).map_err(|_| {
            TunnelRejection::new(
                RejectKind::Malformed,
                format!("error parsing forward data: port {port} out of range"),
            )
        })?;
        // The origin is informational; clamp rather than reject.
        let origin_port = u16::try_from(origin_port).unwrap_or(0);
        Ok(Self {
            host: host.to_string(),
            port,
            origin_host: origin_host.to_string(),
            origin_port,
        })
    }
}

/// Classification of a refused tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// The request payload could not be interpreted.
    Malformed,
    /// The destination is not allowed by policy.
    Prohibited,
    /// The destination host did not resolve.
    Unresolvable,
    /// Dialing the destination (or the upstream proxy) failed.
    ConnectionFailed,
}

impl RejectKind {
    /// SSH `CHANNEL_OPEN_FAILURE` reason code (RFC 4254 §5.1).
    pub fn reason_code(self) -> u32 {
        match self {
            RejectKind::Prohibited | RejectKind::Unresolvable => 1,
            RejectKind::Malformed | RejectKind::ConnectionFailed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectKind::Malformed => "malformed",
            RejectKind::Prohibited => "prohibited",
            RejectKind::Unresolvable => "unresolvable",
            RejectKind::ConnectionFailed => "connection-failed",
        }
    }
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused tunnel: classification plus a short human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct TunnelRejection {
    pub kind: RejectKind,
    pub reason: String,
}

impl TunnelRejection {
    pub fn new(kind: RejectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}
