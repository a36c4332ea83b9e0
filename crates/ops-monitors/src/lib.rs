//! Monitor loops for the ops engine
//!
//! Three cooperating loops share one shape: scheduled tick, snapshot,
//! issue derivation, dispatch to the remediation orchestrator. Each keeps
//! a short bounded history for trend reporting. External surfaces are
//! reached only through the probe contracts in [`probes`]; the local
//! implementations in [`docker`] shell through the safe executor.

pub mod docker;
pub mod health;
pub mod optimizer;
pub mod probes;
pub mod scheduler;
pub mod security;

pub use docker::{DfDiskProbe, DockerCliRuntime, PingNetworkProbe};
pub use health::{HealthMonitor, HealthSnapshot, SystemSummary};
pub use optimizer::{ContinuousOptimizer, EfficiencyTrends, OptimizationSnapshot};
pub use scheduler::spawn_loop;
pub use security::{SecurityLevel, SecurityScanner, SecuritySnapshot, SecuritySummary};
