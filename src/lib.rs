//! Vigil - Scan Job Orchestrator
//!
//! Coordinates external security-scanning tools (nmap, nuclei, nikto,
//! wpscan) against sets of targets: fans target workers out under a
//! concurrency bound, merges their streamed output into one live feed,
//! records structured findings incrementally, and re-fires scans on cron
//! schedules without overlapping runs.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod job;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod targets;
