//! CIDR parsing and host enumeration
//!
//! Pure helpers over [`ipnet::Ipv4Net`]; safe for concurrent use. Callers
//! skip malformed ranges and keep going rather than abort a batch load.

use ipnet::Ipv4Net;
use log::debug;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid CIDR range: {0:?}")]
pub struct InvalidRangeError(pub String);

/// Parse CIDR text into a normalized IPv4 network.
pub fn parse_range(text: &str) -> Result<Ipv4Net, InvalidRangeError> {
    text.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|_| InvalidRangeError(text.to_string()))
}

/// Usable host addresses of a CIDR string. Network and broadcast addresses
/// are excluded for prefixes shorter than /31.
pub fn expand(text: &str) -> Result<Vec<Ipv4Addr>, InvalidRangeError> {
    Ok(parse_range(text)?.hosts().collect())
}

/// The /24 containing `addr`, used to record working neighborhoods.
pub fn containing_slash24(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new(addr, 24)
        .expect("/24 prefix is valid")
        .trunc()
}

/// Parse a plain-text range list: one CIDR per line, blank lines and `#`
/// comments ignored, malformed entries skipped.
pub fn parse_range_list(content: &str) -> Vec<Ipv4Net> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match parse_range(line) {
                Ok(net) => Some(net),
                Err(err) => {
                    debug!("skipping range line: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Load a range list file as handed over by the range-acquisition process.
pub fn load_range_file<P: AsRef<Path>>(path: P) -> crate::Result<Vec<Ipv4Net>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_range_list(&content))
}
