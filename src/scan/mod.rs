//! The scan-and-verify engine
//!
//! This module provides functionality for:
//! - Generating candidate targets from feedback ranges, supplied ranges and
//!   random fallback addresses
//! - Cheap open-proxy detection with per-site heuristics and retry
//! - Batched, bounded-concurrency execution with cooperative stop
//! - Full verification (latency + anonymity level) of open candidates

pub mod addr;
pub mod batch;
pub mod geo;
pub mod http;
pub mod models;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod stealth;
pub mod targets;
pub mod verify;

pub use batch::BatchScheduler;
pub use models::{Anonymity, ProxyRecord, RangeRecord, Task, Verification};
pub use progress::{RunContext, ScanEvent};
pub use stealth::StealthProbe;
pub use targets::TargetGenerator;
pub use verify::VerificationPipeline;
