//! `gb-bridge`: the `godot-bridge` process.
//!
//! Loads configuration, builds the one [`Connection`](gb_connection::Connection)
//! the process owns, and exposes it through a newline-delimited JSON command
//! channel on stdio plus a handful of one-shot CLI commands.

pub mod bootstrap;
pub mod cli;
pub mod dispatch;
pub mod observer;
