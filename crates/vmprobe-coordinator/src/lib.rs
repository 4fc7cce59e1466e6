//! vmprobe-coordinator - ephemeral VM test harness
//!
//! Brings up one VM per target directory with an external provisioning
//! tool, runs a probe inside it, records the results and always tears the
//! VM down again, including on timeouts, errors and interrupts.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod log_sink;
pub mod orchestrator;
pub mod report;
pub mod runner;
