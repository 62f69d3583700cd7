//! Host-monitoring agent: samples the OS once per tick and streams immutable
//! snapshots to any number of independently paced viewers.

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod history;
pub mod hub;
pub mod logbook;
pub mod metrics;
pub mod rates;
pub mod sampler;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod types;
pub mod ws;
