//! Harness for supervised runs of an external AI coding agent.
//!
//! One run submits a prompt to the agent in an isolated workspace, captures
//! its behavior as a structured event stream, bounds runaway behavior with
//! turn and action budgets, and guarantees cleanup whatever happens mid-run.
//! The captured log is then evaluated by stateless regression detectors.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (event model, message
//!   aggregation, invocation correlation, detectors). No I/O, fully testable
//!   in isolation.
//! - **[`io`]**: Side-effecting operations (agent process supervision, wire
//!   decoding, workspaces, configuration). Isolated to enable scripted
//!   doubles in tests.
//!
//! Orchestration modules ([`session`], [`conversation`]) coordinate core
//! logic with I/O.

pub mod conversation;
pub mod core;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
