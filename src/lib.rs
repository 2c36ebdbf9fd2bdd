//! Host telemetry agent with MQTT publishing and Home Assistant discovery.
//!
//! The agent samples host metrics on independent cadences (fast, slow,
//! one-time), shares one expensive combined CPU/disk sample across many
//! logical sensors, and registers every sensor up-front through a single
//! retained device-discovery document so consumers can auto-configure.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod facts;
pub mod measurement;
pub mod probe;
pub mod publish;
pub mod scheduler;
