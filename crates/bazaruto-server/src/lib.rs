//! # Bazaruto Worker Library
//!
//! Application side of the job engine: the marketplace job types, the
//! handlers bridging domain events to jobs, the collaborators jobs use,
//! and telemetry bootstrap for the `bazaruto-worker` binary.

pub mod app;
pub mod handlers;
pub mod jobs;
pub mod services;
pub mod startup;
pub mod telemetry;

pub use app::{AppBuilder, AppError, Application};
