//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on captured
//! event logs and return deterministic outputs suitable for tests.

pub mod detectors;
pub mod event;
pub mod invocations;
pub mod messages;
