//! # tether-cli
//!
//! Command-line interface for the tether voice presence agent.
//!
//! ## Commands
//!
//! - `tether start`: Log in to Discord and keep voice presence
//! - `tether status`: Query a running agent's liveness server
//! - `tether config`: Show the resolved configuration
//! - `tether version`: Show version and build info

pub mod commands;

pub use commands::Cli;
