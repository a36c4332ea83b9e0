//! opsd library surface
//!
//! The daemon binary is a thin wrapper over [`Engine`], which assembles
//! the control plane and exposes the host-local control surface.

pub mod engine;

pub use engine::{ActionSummary, Engine};
