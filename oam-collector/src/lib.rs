//! Multi-tenant OAM telemetry collector.
//!
//! Polls performance, fault, SIM and network-group endpoints of a remote OAM
//! REST API for many user accounts, each with its own session, and writes
//! normalized responses to disk.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
pub mod workers;
