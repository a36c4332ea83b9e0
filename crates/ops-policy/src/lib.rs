//! Action catalog and policy engine
//!
//! Declarative action definitions are loaded once at startup and owned by
//! the catalog; the policy engine combines them with forbidden-operation
//! scanning, per-action rate limits, circuit breakers, preconditions and
//! safety checks to produce structured approval decisions.

pub mod catalog;
pub mod engine;

pub use catalog::{
    render_template, ActionCatalog, ActionDefinition, Precondition, SafetyCheck,
};
pub use engine::{PolicyContext, PolicyDecision, PolicyEngine, PolicyResult, PolicyStats};
