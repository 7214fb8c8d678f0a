//! Core data types for the scan engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Protocol recorded for every verified proxy; this engine probes HTTP
/// forward-proxy semantics only.
pub const PROTOCOL_HTTP: &str = "HTTP";

/// How much a proxy discloses about the originating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    #[default]
    Unknown,
}

impl Anonymity {
    /// Parse a stored label; anything unrecognized reads as `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Transparent" => Anonymity::Transparent,
            "Anonymous" => Anonymity::Anonymous,
            "Elite" => Anonymity::Elite,
            _ => Anonymity::Unknown,
        }
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Transparent => write!(f, "Transparent"),
            Anonymity::Anonymous => write!(f, "Anonymous"),
            Anonymity::Elite => write!(f, "Elite"),
            Anonymity::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One probe target. Ephemeral: exists only for the duration of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Task {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Task {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid target line: {0:?}")]
pub struct ParseTaskError(String);

impl FromStr for Task {
    type Err = ParseTaskError;

    /// Parse an `ip:port` line as written by the candidate exports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, port) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ParseTaskError(s.to_string()))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| ParseTaskError(s.to_string()))?;
        let port: u16 = port.parse().map_err(|_| ParseTaskError(s.to_string()))?;
        if port == 0 {
            return Err(ParseTaskError(s.to_string()));
        }
        Ok(Task::new(addr, port))
    }
}

/// Outcome of a successful full verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Round trip to response headers, in milliseconds.
    pub latency_ms: u32,
    pub anonymity: Anonymity,
}

/// Durable record of a verified proxy, keyed by (ip, port).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub ip: String,
    pub port: u16,
    pub country: String,
    pub city: String,
    /// Round trip in milliseconds.
    pub speed: u32,
    pub protocol: String,
    pub anonymity: Anonymity,
    pub isp: String,
    pub last_checked: DateTime<Utc>,
    /// Soft-delete flag; this engine only ever writes `true`.
    pub active: bool,
}

impl ProxyRecord {
    /// Build a fresh record from a verified task. Location and ISP default to
    /// "Unknown" until enrichment fills them in.
    pub fn verified(task: Task, verification: Verification) -> Self {
        Self {
            ip: task.addr.to_string(),
            port: task.port,
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            speed: verification.latency_ms,
            protocol: PROTOCOL_HTTP.to_string(),
            anonymity: verification.anonymity,
            isp: "Unknown".to_string(),
            last_checked: Utc::now(),
            active: true,
        }
    }

    /// The proxy endpoint in `ip:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Durable record of a /24 that produced at least one working proxy.
///
/// Absence of a record means "unscanned", not "zero hit-rate".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RangeRecord {
    pub cidr: String,
    pub last_scan: DateTime<Utc>,
    /// Fraction of probed hosts that verified as working, in [0, 1].
    pub hit_rate: f64,
}
