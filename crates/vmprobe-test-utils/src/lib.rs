//! Shared test utilities for vmprobe
//!
//! This crate provides a throwaway lab for integration tests: a temporary
//! VM root whose targets are driven by a fake provisioning tool instead of
//! a real hypervisor.
//!
//! ## Modules
//!
//! - [`lab`]: temporary VM root, fake tool script and per-target knobs

pub mod lab;

// Re-export commonly used items
pub use lab::{FakeLab, FakeTarget, FAKE_PROBE_FILE, FAKE_PROBE_INTERPRETER};
