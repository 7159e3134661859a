//! # Bazaruto Config
//!
//! Configuration management for the Bazaruto job worker.
//! Supports layered configuration from files, `.env`, environment
//! variables, and runtime refresh.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
