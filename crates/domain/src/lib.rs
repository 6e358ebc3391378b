//! Shared configuration and environment helpers for the bridge.

pub mod config;
pub mod host;
