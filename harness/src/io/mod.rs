//! Side-effecting helpers: agent process supervision, wire decoding,
//! workspaces, configuration.

pub mod client;
pub mod config;
pub mod wire;
pub mod workspace;
