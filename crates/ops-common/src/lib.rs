//! Common types and utilities for the ops engine
//!
//! This crate provides the shared records, error taxonomy and configuration
//! used across all components of the autonomous operations engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CatalogConfig, ExecutorConfig, LoopConfig, OpsConfig, PolicyConfig};
pub use error::{Error, Result};
pub use types::{ComponentHealth, HealthLevel, Metadata, RiskLevel, Tier};
