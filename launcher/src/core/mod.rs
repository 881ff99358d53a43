//! Deterministic, pure logic shared by the launcher.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod actions;
pub mod interpolate;
pub mod keys;
pub mod locations;
pub mod properties;
pub mod types;
