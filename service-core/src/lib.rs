//! service-core: Shared infrastructure for the collector services.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

