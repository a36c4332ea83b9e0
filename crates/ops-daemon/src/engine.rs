//! Engine assembly and the host-local control surface
//!
//! [`Engine::build`] wires the validator, executor, policy engine, agent,
//! store, orchestrator and monitor loops together from one configuration.
//! The methods on [`Engine`] are the operations a wrapping collaborator
//! (an HTTP layer, a CLI) is expected to call; nothing else reaches into
//! component internals.

use ops_agent::{AgentMetrics, AgentResult, AutonomousAgent};
use ops_common::{OpsConfig, Result, RiskLevel, Tier};
use ops_executor::{FileAuditSink, SafeExecutor};
use ops_monitors::{
    spawn_loop, ContinuousOptimizer, DfDiskProbe, DockerCliRuntime, HealthMonitor,
    PingNetworkProbe, SecurityScanner,
};
use ops_policy::{ActionCatalog, PolicyContext, PolicyEngine, PolicyResult, PolicyStats};
use ops_remediation::{RemediationOrchestrator, RuleBasedAnalyzer};
use ops_store::{Incident, IncidentFilter, IncidentPatch, IncidentStatus, MemoryStore, Store};
use ops_validator::CommandValidator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// One catalog entry as shown on the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    pub name: String,
    pub tier: Tier,
    pub risk_level: RiskLevel,
    pub category: String,
    pub auto_execute: bool,
    pub requires_approval: bool,
}

/// The assembled control plane
pub struct Engine {
    config: OpsConfig,
    validator: Arc<CommandValidator>,
    executor: Arc<SafeExecutor>,
    policy: Arc<PolicyEngine>,
    agent: Arc<AutonomousAgent>,
    store: Arc<dyn Store>,
    orchestrator: Arc<RemediationOrchestrator>,
    health: Arc<HealthMonitor>,
    optimizer: Arc<ContinuousOptimizer>,
    security: Arc<SecurityScanner>,
}

impl Engine {
    /// Build the full engine. Any configuration problem (bad pattern,
    /// bad action definition) is fatal here, before anything runs.
    pub fn build(config: OpsConfig) -> Result<Self> {
        let validator = Arc::new(CommandValidator::new()?);
        let sink = Arc::new(FileAuditSink::new(&config.executor.audit_log_path));
        let executor = Arc::new(SafeExecutor::new(
            validator.clone(),
            config.executor.clone(),
            sink,
        ));

        let catalog = ActionCatalog::load_dir(&config.catalog.actions_dir, &validator)?;
        info!(actions = catalog.len(), "action catalog loaded");
        let policy = Arc::new(PolicyEngine::new(
            catalog,
            validator.clone(),
            config.policy.clone(),
        ));

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let agent = Arc::new(AutonomousAgent::new(
            policy.clone(),
            executor.clone(),
            store.clone(),
        ));
        let orchestrator = Arc::new(RemediationOrchestrator::new(
            store.clone(),
            executor.clone(),
            Arc::new(RuleBasedAnalyzer::new()),
        ));

        let runtime = Arc::new(DockerCliRuntime::new(executor.clone()));
        let disk = Arc::new(DfDiskProbe::new(executor.clone(), "/"));
        let network = Arc::new(PingNetworkProbe::new(executor.clone()));

        let health = Arc::new(HealthMonitor::new(
            runtime.clone(),
            None,
            network,
            disk,
            orchestrator.clone(),
        ));
        let optimizer = Arc::new(ContinuousOptimizer::new(
            runtime.clone(),
            None,
            orchestrator.clone(),
        ));
        let security = Arc::new(SecurityScanner::new(
            runtime,
            None,
            None,
            None,
            orchestrator.clone(),
        ));

        Ok(Self {
            config,
            validator,
            executor,
            policy,
            agent,
            store,
            orchestrator,
            health,
            optimizer,
            security,
        })
    }

    /// Spawn the periodic loops onto the tracker
    pub fn start_monitors(&self, cancel: CancellationToken, tracker: &TaskTracker) {
        let loops = &self.config.loops;

        let health = self.health.clone();
        spawn_loop(
            "health",
            Duration::from_secs(loops.health_quick_interval_seconds),
            Duration::from_secs(loops.health_quick_interval_seconds),
            cancel.clone(),
            tracker,
            move || {
                let health = health.clone();
                async move {
                    health.run_health_check().await;
                }
            },
        );

        let summary = self.health.clone();
        spawn_loop(
            "health-summary",
            Duration::from_secs(loops.health_deep_interval_seconds),
            Duration::from_secs(60),
            cancel.clone(),
            tracker,
            move || {
                let summary = summary.clone();
                async move {
                    let report = summary.system_summary();
                    info!(
                        healthy = report.containers_healthy,
                        unhealthy = report.containers_unhealthy,
                        stopped = report.containers_stopped,
                        issues = report.issues_found,
                        "system summary"
                    );
                }
            },
        );

        let optimizer = self.optimizer.clone();
        spawn_loop(
            "optimizer",
            Duration::from_secs(loops.optimizer_interval_seconds),
            Duration::from_secs(loops.optimizer_interval_seconds),
            cancel.clone(),
            tracker,
            move || {
                let optimizer = optimizer.clone();
                async move {
                    optimizer.run_analysis().await;
                }
            },
        );

        let security = self.security.clone();
        spawn_loop(
            "security",
            Duration::from_secs(loops.security_interval_seconds),
            Duration::from_secs(loops.security_interval_seconds),
            cancel,
            tracker,
            move || {
                let security = security.clone();
                async move {
                    security.run_scan().await;
                }
            },
        );
    }

    // Control surface operations

    /// Evaluate an action without executing it
    pub fn evaluate_action(&self, name: &str, context: &PolicyContext) -> PolicyResult {
        self.policy.evaluate(name, context)
    }

    /// Execute an action (dry or live)
    pub async fn execute_action(&self, name: &str, dry_run: bool) -> AgentResult {
        self.agent
            .execute_action(name, dry_run, &PolicyContext::default())
            .await
    }

    /// Record the result of an execution performed outside the agent
    pub fn record_external_result(&self, name: &str, success: bool) {
        self.policy.record_execution_result(name, success);
    }

    pub fn reset_circuit_breaker(&self, name: &str) {
        self.policy.reset_circuit_breaker(name);
    }

    /// Known actions with tier, risk and category
    pub fn list_actions(&self) -> Vec<ActionSummary> {
        let mut actions: Vec<ActionSummary> = self
            .policy
            .catalog()
            .all()
            .into_iter()
            .map(|a| ActionSummary {
                name: a.name.clone(),
                tier: a.tier,
                risk_level: a.risk_level,
                category: a.category.clone(),
                auto_execute: a.auto_execute,
                requires_approval: a.requires_approval,
            })
            .collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        actions
    }

    pub async fn incidents(&self, filter: IncidentFilter) -> Result<Vec<Incident>> {
        self.store.query_incidents(filter).await
    }

    pub async fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        notes: Option<String>,
    ) -> Result<Incident> {
        self.store
            .update_incident_status(incident_id, status, notes, IncidentPatch::default())
            .await
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.agent.get_metrics()
    }

    pub fn policy_stats(&self) -> PolicyStats {
        self.policy.stats()
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn executor(&self) -> &SafeExecutor {
        &self.executor
    }

    pub fn orchestrator(&self) -> &RemediationOrchestrator {
        &self.orchestrator
    }
}
