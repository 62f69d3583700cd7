//! Terminal client for a hostpulse agent's snapshot stream.

pub mod cli;
pub mod format;
pub mod types;
pub mod ws;
