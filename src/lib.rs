//! Proxy Sweep - adaptive open-proxy scanner
//!
//! Discovers, verifies and classifies open HTTP proxy endpoints across
//! large, sparse address spaces, and feeds verified results back into
//! future target selection.

pub mod config;
pub mod report;
pub mod scan;
pub mod store;

pub use config::ScannerConfig;
pub use scan::*;
pub use store::ResultStore;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
