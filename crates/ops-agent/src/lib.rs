//! Autonomous execution agent
//!
//! The agent binds a request "run action X now" to a complete cycle:
//! policy evaluation, safe execution, breaker-state recording and
//! persistence of the outcome. Nothing here panics on a bad action or a
//! failing collaborator; every path folds into a structured result.

use chrono::{DateTime, Utc};
use metrics::counter;
use ops_common::{Metadata, Tier};
use ops_executor::{ApprovalToken, ExecOptions, ExecutionRecord, SafeExecutor};
use ops_policy::{PolicyContext, PolicyDecision, PolicyEngine, PolicyResult, PolicyStats};
use ops_store::{ActionRecord, ActionStatus, Store};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Identity the agent presents to the executor and the audit trail
const INITIATOR: &str = "autonomous";

/// Result of one autonomous action cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub action_name: String,
    pub tier: Option<Tier>,
    pub success: bool,
    pub decision: String,
    pub execution: Option<ExecutionRecord>,
    pub policy: PolicyResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Aggregate execution counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub tier1_executions: u64,
    pub tier2_executions: u64,
    pub tier3_executions: u64,
    pub policy_rejections: u64,
    pub policy_deferrals: u64,
}

/// Metrics snapshot for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub execution_metrics: ExecutionMetrics,
    pub success_rate: f64,
    pub policy_stats: PolicyStats,
    pub timestamp: DateTime<Utc>,
}

/// Autonomous execution agent
pub struct AutonomousAgent {
    policy: Arc<PolicyEngine>,
    executor: Arc<SafeExecutor>,
    store: Arc<dyn Store>,
    metrics: parking_lot::Mutex<ExecutionMetrics>,
}

impl AutonomousAgent {
    pub fn new(policy: Arc<PolicyEngine>, executor: Arc<SafeExecutor>, store: Arc<dyn Store>) -> Self {
        Self {
            policy,
            executor,
            store,
            metrics: parking_lot::Mutex::new(ExecutionMetrics::default()),
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Run one action through policy, execution, breaker recording and
    /// persistence. Non-approve decisions come back as unsuccessful
    /// results carrying the decision string.
    pub async fn execute_action(
        &self,
        action_name: &str,
        dry_run: bool,
        context: &PolicyContext,
    ) -> AgentResult {
        let started_at = Utc::now();
        let start = Instant::now();

        info!(action = action_name, dry_run, "executing autonomous action");

        let policy_result = self.policy.evaluate(action_name, context);
        let tier = policy_result.tier;

        {
            let mut metrics = self.metrics.lock();
            match tier {
                Some(Tier::Diagnose) => metrics.tier1_executions += 1,
                Some(Tier::Remediate) => metrics.tier2_executions += 1,
                Some(Tier::Proactive) => metrics.tier3_executions += 1,
                None => {}
            }
        }

        match policy_result.decision {
            PolicyDecision::Reject => {
                self.metrics.lock().policy_rejections += 1;
                counter!("ops_agent_policy_rejections_total").increment(1);
                warn!(action = action_name, reason = %policy_result.reason, "action rejected by policy");
                return self.decision_result(action_name, tier, policy_result, started_at, start, None);
            }
            PolicyDecision::Defer => {
                self.metrics.lock().policy_deferrals += 1;
                counter!("ops_agent_policy_deferrals_total").increment(1);
                info!(action = action_name, reason = %policy_result.reason, "action deferred");
                let error = format!("Deferred: {}", policy_result.reason);
                return self.decision_result(action_name, tier, policy_result, started_at, start, Some(error));
            }
            PolicyDecision::RequireApproval => {
                info!(action = action_name, "action requires human approval");
                let error = "Requires human approval".to_string();
                return self.decision_result(action_name, tier, policy_result, started_at, start, Some(error));
            }
            PolicyDecision::Approve => {}
        }

        // Approval implies the definition exists
        let Some(action) = self.policy.catalog().get(action_name) else {
            let error = format!("Action definition not found: {}", action_name);
            return self.decision_result(action_name, tier, policy_result, started_at, start, Some(error));
        };

        let execution = if dry_run {
            self.executor.dry_run(&action.command, INITIATOR).await
        } else {
            let options = ExecOptions {
                timeout: Some(Duration::from_secs(action.timeout_seconds)),
                approval: Some(ApprovalToken::new("policy-engine")),
                ..Default::default()
            };
            self.executor.execute(&action.command, INITIATOR, options).await
        };

        {
            let mut metrics = self.metrics.lock();
            metrics.total_executions += 1;
            if execution.success {
                metrics.successful_executions += 1;
            } else {
                metrics.failed_executions += 1;
            }
        }
        counter!("ops_agent_executions_total").increment(1);

        // Cancellation is not a failure of the remote operation and must
        // not feed the breaker
        if !execution.was_cancelled() {
            self.policy.record_execution_result(action_name, execution.success);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = AgentResult {
            action_name: action_name.to_string(),
            tier,
            success: execution.success,
            decision: policy_result.decision.as_str().to_string(),
            execution: Some(execution.clone()),
            policy: policy_result.clone(),
            started_at,
            duration_ms,
            error: if execution.success {
                None
            } else {
                Some(execution.stderr.clone())
            },
        };

        if !dry_run {
            self.persist(&action.command, &result, &policy_result).await;
        }

        info!(
            action = action_name,
            success = result.success,
            tier = ?tier,
            duration_ms,
            "autonomous action completed"
        );
        result
    }

    /// Run every action of one tier sequentially
    pub async fn execute_tier_actions(&self, tier: Tier, dry_run: bool) -> Vec<AgentResult> {
        let actions = self.policy.catalog().tier(tier);
        info!(tier = %tier, count = actions.len(), "executing tier actions");

        let context = PolicyContext::default();
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            results.push(self.execute_action(&action.name, dry_run, &context).await);
        }
        results
    }

    /// Run all Tier 1 (DIAGNOSE) actions
    pub async fn run_diagnostics(&self, dry_run: bool) -> Vec<AgentResult> {
        self.execute_tier_actions(Tier::Diagnose, dry_run).await
    }

    /// Run all Tier 2 (REMEDIATE) actions
    pub async fn run_remediation(&self, dry_run: bool) -> Vec<AgentResult> {
        self.execute_tier_actions(Tier::Remediate, dry_run).await
    }

    /// Run all Tier 3 (PROACTIVE) actions
    pub async fn run_proactive_maintenance(&self, dry_run: bool) -> Vec<AgentResult> {
        self.execute_tier_actions(Tier::Proactive, dry_run).await
    }

    pub fn get_metrics(&self) -> AgentMetrics {
        let execution_metrics = self.metrics.lock().clone();
        let total = execution_metrics.total_executions;
        let success_rate = if total > 0 {
            (execution_metrics.successful_executions as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        AgentMetrics {
            execution_metrics,
            success_rate,
            policy_stats: self.policy.stats(),
            timestamp: Utc::now(),
        }
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock() = ExecutionMetrics::default();
        info!("execution metrics reset");
    }

    fn decision_result(
        &self,
        action_name: &str,
        tier: Option<Tier>,
        policy: PolicyResult,
        started_at: DateTime<Utc>,
        start: Instant,
        error: Option<String>,
    ) -> AgentResult {
        let error = error.or_else(|| Some(policy.reason.clone()));
        AgentResult {
            action_name: action_name.to_string(),
            tier,
            success: false,
            decision: policy.decision.as_str().to_string(),
            execution: None,
            policy,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }

    /// Persist the action record. Store failures are logged, never raised.
    async fn persist(&self, command: &str, result: &AgentResult, policy: &PolicyResult) {
        let tier_name = result.tier.map(|t| t.name()).unwrap_or("UNKNOWN");
        let category = policy
            .metadata
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let record = ActionRecord {
            id: Uuid::new_v4().to_string(),
            status: if result.success {
                ActionStatus::Executed
            } else {
                ActionStatus::Failed
            },
            command: command.to_string(),
            description: format!(
                "Autonomous {} (Tier {})",
                result.action_name,
                result.tier.map(|t| t.as_u8()).unwrap_or(0)
            ),
            risk_level: policy.risk_level,
            requested_by: INITIATOR.to_string(),
            approved_by: "policy-engine".to_string(),
            approved_at: result.started_at,
            executed_at: result.started_at,
            execution_result: result
                .execution
                .as_ref()
                .and_then(|e| serde_json::to_value(e).ok()),
            execution_time_ms: result.duration_ms,
            metadata: Metadata::from([
                ("autonomous".to_string(), json!(true)),
                ("tier".to_string(), json!(result.tier.map(|t| t.as_u8()))),
                ("tier_name".to_string(), json!(tier_name)),
                ("category".to_string(), json!(category)),
                ("policy_decision".to_string(), json!(result.decision)),
                ("action_name".to_string(), json!(result.action_name)),
            ]),
        };

        if let Err(e) = self.store.insert_action(record).await {
            error!(action = %result.action_name, error = %e, "failed to persist autonomous action");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_common::{ExecutorConfig, PolicyConfig, RiskLevel};
    use ops_executor::MemoryAuditSink;
    use ops_policy::{ActionCatalog, ActionDefinition};
    use ops_store::MemoryStore;
    use ops_validator::CommandValidator;

    fn agent_with(definitions: Vec<ActionDefinition>, policy_config: PolicyConfig) -> (AutonomousAgent, Arc<MemoryStore>) {
        let validator = Arc::new(CommandValidator::new().unwrap());
        let catalog = ActionCatalog::from_definitions(definitions, &validator).unwrap();
        let policy = Arc::new(PolicyEngine::new(catalog, validator.clone(), policy_config));
        let executor = Arc::new(SafeExecutor::new(
            validator,
            ExecutorConfig {
                default_timeout_seconds: 5,
                max_executions_per_minute: 60,
                audit_log_path: "/tmp/unused-audit.log".into(),
            },
            Arc::new(MemoryAuditSink::new()),
        ));
        let store = Arc::new(MemoryStore::new());
        (
            AutonomousAgent::new(policy, executor, store.clone()),
            store,
        )
    }

    fn echo_action(name: &str, tier: Tier) -> ActionDefinition {
        ActionDefinition {
            name: name.to_string(),
            tier,
            category: "diagnostics".to_string(),
            command: format!("echo {}", name),
            timeout_seconds: 5,
            auto_execute: true,
            requires_approval: false,
            preconditions: Vec::new(),
            safety_checks: Vec::new(),
            risk_level: RiskLevel::Low,
            description: None,
        }
    }

    #[tokio::test]
    async fn approved_action_executes_and_persists() {
        let (agent, store) = agent_with(
            vec![echo_action("uptime_report", Tier::Diagnose)],
            PolicyConfig::default(),
        );

        let result = agent
            .execute_action("uptime_report", false, &PolicyContext::default())
            .await;

        assert!(result.success);
        assert_eq!(result.decision, "approve");
        assert!(result.execution.is_some());
        assert_eq!(store.action_count(), 1);

        let metrics = agent.get_metrics();
        assert_eq!(metrics.execution_metrics.total_executions, 1);
        assert_eq!(metrics.execution_metrics.successful_executions, 1);
        assert_eq!(metrics.execution_metrics.tier1_executions, 1);
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let (agent, store) = agent_with(
            vec![echo_action("uptime_report", Tier::Diagnose)],
            PolicyConfig::default(),
        );

        let result = agent
            .execute_action("uptime_report", true, &PolicyContext::default())
            .await;

        assert!(result.success);
        assert_eq!(store.action_count(), 0);
    }

    #[tokio::test]
    async fn unknown_action_is_a_rejection_not_a_panic() {
        let (agent, _store) = agent_with(Vec::new(), PolicyConfig::default());

        let result = agent
            .execute_action("missing", false, &PolicyContext::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.decision, "reject");
        assert_eq!(agent.get_metrics().execution_metrics.policy_rejections, 1);
    }

    #[tokio::test]
    async fn deferral_increments_metric_and_skips_execution() {
        let (agent, store) = agent_with(
            vec![echo_action("uptime_report", Tier::Diagnose)],
            PolicyConfig {
                max_executions_per_hour: 1,
                ..Default::default()
            },
        );

        let first = agent
            .execute_action("uptime_report", false, &PolicyContext::default())
            .await;
        let second = agent
            .execute_action("uptime_report", false, &PolicyContext::default())
            .await;

        assert!(first.success);
        assert!(!second.success);
        assert_eq!(second.decision, "defer");
        assert_eq!(agent.get_metrics().execution_metrics.policy_deferrals, 1);
        assert_eq!(store.action_count(), 1);
    }

    #[tokio::test]
    async fn failed_execution_feeds_the_breaker() {
        let mut failing = echo_action("probe_missing_file", Tier::Diagnose);
        // cat of a missing path is whitelisted but exits non-zero
        failing.command = "cat /tmp/ops-agent-definitely-missing-file".to_string();

        let (agent, _store) = agent_with(
            vec![failing],
            PolicyConfig {
                circuit_breaker_threshold: 2,
                ..Default::default()
            },
        );
        let context = PolicyContext::default();

        for _ in 0..2 {
            let result = agent.execute_action("probe_missing_file", false, &context).await;
            assert!(!result.success);
        }

        let third = agent.execute_action("probe_missing_file", false, &context).await;
        assert_eq!(third.decision, "reject");
        assert!(third.policy.reason.to_lowercase().contains("circuit breaker"));
    }

    #[tokio::test]
    async fn tier_run_executes_each_action_once() {
        let (agent, store) = agent_with(
            vec![
                echo_action("report_a", Tier::Diagnose),
                echo_action("report_b", Tier::Diagnose),
                echo_action("remediate_c", Tier::Remediate),
            ],
            PolicyConfig::default(),
        );

        let results = agent.run_diagnostics(false).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(store.action_count(), 2);
    }
}
