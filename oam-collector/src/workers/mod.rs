pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{FetchOrchestrator, FetchOutcome, FetchSettings, FetchSummary, InFlight};
pub use scheduler::{run_aligned, Scheduler};
