//! Procvisor - supervised subprocess execution.
//!
//! Launches a child under a chosen identity, captures its stdout/stderr
//! while it runs, repairs external job-control stops, enforces timeouts,
//! and retries whole runs with backoff.

pub mod config;
pub mod display;
pub mod identity;
pub mod process;
pub mod retry;
