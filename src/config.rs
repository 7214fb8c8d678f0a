//! Scanner configuration with silent fallback to defaults

use crate::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

/// Ports probed on every target address.
pub const DEFAULT_PORTS: &[u16] = &[80, 8080, 3128, 8000, 8888, 1080];
/// Per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
/// Concurrent probes in flight.
pub const DEFAULT_CONCURRENCY: usize = 200;

const TIMEOUT_BOUNDS: RangeInclusive<u64> = 1..=30;
const CONCURRENCY_BOUNDS: RangeInclusive<usize> = 10..=500;

/// Scanner configuration as handed over by the configuration collaborator.
///
/// Out-of-range values fall back to their defaults silently; a malformed or
/// missing file yields all defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub ports: Vec<u16>,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ScannerConfig {
    /// Load from a JSON file, sanitizing every field.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let parsed = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ScannerConfig>(&content) {
                Ok(config) => config,
                Err(err) => {
                    warn!("config file corrupted, using defaults: {err}");
                    ScannerConfig::default()
                }
            },
            Err(_) => ScannerConfig::default(),
        };
        parsed.sanitized()
    }

    /// Replace each out-of-range field with its default. The port list is
    /// all-or-nothing: one invalid entry discards the whole list.
    fn sanitized(mut self) -> Self {
        let defaults = ScannerConfig::default();
        if self.ports.is_empty() || self.ports.iter().any(|&port| port == 0) {
            self.ports = defaults.ports;
        }
        if !TIMEOUT_BOUNDS.contains(&self.timeout_secs) {
            self.timeout_secs = defaults.timeout_secs;
        }
        if !CONCURRENCY_BOUNDS.contains(&self.concurrency) {
            self.concurrency = defaults.concurrency;
        }
        self
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
