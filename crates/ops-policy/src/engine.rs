//! Risk-based decision making for autonomous actions
//!
//! The policy engine is the single decision point for any autonomous
//! execution. Evaluation is strictly ordered and the first failing check
//! short-circuits: approval flag, forbidden overlay, rate limit, circuit
//! breaker, preconditions, safety checks. Decisions are structured values,
//! never exceptions.

use crate::catalog::{ActionCatalog, ActionDefinition, Precondition, SafetyCheck};
use chrono::{DateTime, Timelike, Utc};
use ops_common::{Metadata, PolicyConfig, RiskLevel, Tier};
use ops_validator::CommandValidator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Write-operation keywords scanned by the read-only safety check
const WRITE_OPERATIONS: &[&str] = &["rm ", "delete", "drop", "truncate", "update", "insert"];

/// Policy decision outcomes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Approve,
    Reject,
    Defer,
    RequireApproval,
}

impl PolicyDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Approve => "approve",
            PolicyDecision::Reject => "reject",
            PolicyDecision::Defer => "defer",
            PolicyDecision::RequireApproval => "require_approval",
        }
    }
}

/// Result of one policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResult {
    pub decision: PolicyDecision,
    pub tier: Option<Tier>,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub preconditions_met: bool,
    pub safety_checks_passed: bool,
    pub metadata: Metadata,
}

impl PolicyResult {
    pub fn can_execute(&self) -> bool {
        self.decision == PolicyDecision::Approve
    }
}

/// Environment snapshot the caller supplies for precondition evaluation.
/// Missing data defers rather than approves.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub disk_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub service_health: HashMap<String, bool>,
    pub now: DateTime<Utc>,
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self {
            disk_usage_percent: None,
            memory_usage_percent: None,
            service_health: HashMap::new(),
            now: Utc::now(),
        }
    }
}

/// Point-in-time statistics for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStats {
    pub total_actions_registered: usize,
    pub execution_history_size: usize,
    pub open_circuit_breakers: Vec<String>,
    pub actions_with_failures: Vec<String>,
    pub max_executions_per_hour: usize,
    pub circuit_breaker_threshold: usize,
}

#[derive(Default)]
struct EngineState {
    execution_history: HashMap<String, Vec<Instant>>,
    failure_history: HashMap<String, Vec<Instant>>,
    restart_history: HashMap<String, Vec<Instant>>,
    circuit_open: HashMap<String, bool>,
}

/// Policy engine for autonomous action approval
pub struct PolicyEngine {
    catalog: ActionCatalog,
    validator: Arc<CommandValidator>,
    config: PolicyConfig,
    state: parking_lot::Mutex<EngineState>,
}

impl PolicyEngine {
    pub fn new(catalog: ActionCatalog, validator: Arc<CommandValidator>, config: PolicyConfig) -> Self {
        Self {
            catalog,
            validator,
            config,
            state: parking_lot::Mutex::new(EngineState::default()),
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Evaluate whether a named action should run right now. Side-effect
    /// free except for history pruning and, on approval, recording the
    /// execution timestamp.
    pub fn evaluate(&self, action_name: &str, context: &PolicyContext) -> PolicyResult {
        let Some(action) = self.catalog.get(action_name) else {
            return PolicyResult {
                decision: PolicyDecision::Reject,
                tier: None,
                risk_level: RiskLevel::Unknown,
                reason: format!("Action '{}' not found in registry", action_name),
                preconditions_met: false,
                safety_checks_passed: false,
                metadata: Metadata::from([(
                    "error".to_string(),
                    json!("action_not_found"),
                )]),
            };
        };

        let mut metadata = base_metadata(&action, context.now);

        if action.requires_approval {
            return PolicyResult {
                decision: PolicyDecision::RequireApproval,
                tier: Some(action.tier),
                risk_level: action.risk_level,
                reason: "Action explicitly requires human approval".to_string(),
                preconditions_met: false,
                safety_checks_passed: false,
                metadata,
            };
        }

        if let Some(reason) = self.validator.scan_overlay(&action.command) {
            metadata.insert("forbidden_operation".to_string(), json!(true));
            return PolicyResult {
                decision: PolicyDecision::Reject,
                tier: Some(action.tier),
                risk_level: RiskLevel::Critical,
                reason,
                preconditions_met: false,
                safety_checks_passed: false,
                metadata,
            };
        }

        // Rate limit, breaker and the approval record share one guard so
        // evaluations and result recordings for an action are linearized.
        let mut state = self.state.lock();

        if let Some(reason) = self.check_rate_limit(&mut state, &action.name) {
            metadata.insert("rate_limited".to_string(), json!(true));
            return PolicyResult {
                decision: PolicyDecision::Defer,
                tier: Some(action.tier),
                risk_level: action.risk_level,
                reason,
                preconditions_met: false,
                safety_checks_passed: false,
                metadata,
            };
        }

        if let Some(reason) = self.check_circuit_breaker(&mut state, &action.name) {
            metadata.insert("circuit_breaker_open".to_string(), json!(true));
            return PolicyResult {
                decision: PolicyDecision::Reject,
                tier: Some(action.tier),
                risk_level: action.risk_level,
                reason,
                preconditions_met: false,
                safety_checks_passed: false,
                metadata,
            };
        }

        if let Err(reason) = check_preconditions(&action, context) {
            metadata.insert("precondition_failure".to_string(), json!(reason.clone()));
            return PolicyResult {
                decision: PolicyDecision::Defer,
                tier: Some(action.tier),
                risk_level: action.risk_level,
                reason: format!("Preconditions not met: {}", reason),
                preconditions_met: false,
                safety_checks_passed: false,
                metadata,
            };
        }

        if let Err(reason) = self.check_safety(&mut state, &action) {
            metadata.insert("safety_check_failure".to_string(), json!(reason.clone()));
            return PolicyResult {
                decision: PolicyDecision::Reject,
                tier: Some(action.tier),
                risk_level: RiskLevel::Critical,
                reason: format!("Safety check failed: {}", reason),
                preconditions_met: true,
                safety_checks_passed: false,
                metadata,
            };
        }

        if action.auto_execute {
            state
                .execution_history
                .entry(action.name.clone())
                .or_default()
                .push(Instant::now());
            if action
                .safety_checks
                .iter()
                .any(|c| matches!(c, SafetyCheck::RestartLimit { .. }))
            {
                state
                    .restart_history
                    .entry(action.name.clone())
                    .or_default()
                    .push(Instant::now());
            }

            return PolicyResult {
                decision: PolicyDecision::Approve,
                tier: Some(action.tier),
                risk_level: action.risk_level,
                reason: format!(
                    "Tier {} action approved for autonomous execution",
                    action.tier
                ),
                preconditions_met: true,
                safety_checks_passed: true,
                metadata,
            };
        }

        PolicyResult {
            decision: PolicyDecision::RequireApproval,
            tier: Some(action.tier),
            risk_level: action.risk_level,
            reason: "Action requires manual review".to_string(),
            preconditions_met: true,
            safety_checks_passed: true,
            metadata,
        }
    }

    /// Record the outcome of an execution. Failures feed the breaker;
    /// successes recover through the window's natural pruning.
    pub fn record_execution_result(&self, action_name: &str, success: bool) {
        if success {
            return;
        }
        let mut state = self.state.lock();
        let failures = state
            .failure_history
            .entry(action_name.to_string())
            .or_default();
        failures.push(Instant::now());
        warn!(
            action = action_name,
            failures = failures.len(),
            "recorded action failure"
        );
    }

    /// Clear the breaker flag and failure history atomically
    pub fn reset_circuit_breaker(&self, action_name: &str) {
        let mut state = self.state.lock();
        state.circuit_open.insert(action_name.to_string(), false);
        state.failure_history.remove(action_name);
        info!(action = action_name, "circuit breaker reset");
    }

    pub fn stats(&self) -> PolicyStats {
        let state = self.state.lock();
        PolicyStats {
            total_actions_registered: self.catalog.len(),
            execution_history_size: state.execution_history.values().map(Vec::len).sum(),
            open_circuit_breakers: state
                .circuit_open
                .iter()
                .filter(|(_, open)| **open)
                .map(|(name, _)| name.clone())
                .collect(),
            actions_with_failures: state.failure_history.keys().cloned().collect(),
            max_executions_per_hour: self.config.max_executions_per_hour,
            circuit_breaker_threshold: self.config.circuit_breaker_threshold,
        }
    }

    fn check_rate_limit(&self, state: &mut EngineState, action_name: &str) -> Option<String> {
        let now = Instant::now();
        let history = state
            .execution_history
            .entry(action_name.to_string())
            .or_default();
        history.retain(|t| now.duration_since(*t) < Duration::from_secs(3600));

        if history.len() >= self.config.max_executions_per_hour {
            Some(format!(
                "Rate limit exceeded: {} executions per hour",
                self.config.max_executions_per_hour
            ))
        } else {
            None
        }
    }

    fn check_safety(&self, state: &mut EngineState, action: &ActionDefinition) -> Result<(), String> {
        let command_lower = action.command.to_lowercase();

        for check in &action.safety_checks {
            match check {
                SafetyCheck::ReadOnly => {
                    for op in WRITE_OPERATIONS {
                        if command_lower.contains(op) {
                            return Err(format!(
                                "Write operation '{}' detected in read-only action",
                                op.trim()
                            ));
                        }
                    }
                }
                SafetyCheck::PathWhitelist { paths } => {
                    if !paths.is_empty() && !paths.iter().any(|p| action.command.contains(p)) {
                        return Err(format!(
                            "Command operates outside whitelisted paths: {:?}",
                            paths
                        ));
                    }
                }
                SafetyCheck::RestartLimit { max_per_hour } => {
                    let now = Instant::now();
                    let restarts = state
                        .restart_history
                        .entry(action.name.clone())
                        .or_default();
                    restarts.retain(|t| now.duration_since(*t) < Duration::from_secs(3600));
                    if restarts.len() >= *max_per_hour as usize {
                        return Err(format!(
                            "Restart limit exceeded: {} restarts per hour",
                            max_per_hour
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_circuit_breaker(&self, state: &mut EngineState, action_name: &str) -> Option<String> {
        if state.circuit_open.get(action_name).copied().unwrap_or(false) {
            return Some("Circuit breaker is OPEN - too many recent failures".to_string());
        }

        let window = Duration::from_secs(self.config.circuit_breaker_window_minutes * 60);
        let now = Instant::now();
        let failures = state
            .failure_history
            .entry(action_name.to_string())
            .or_default();
        failures.retain(|t| now.duration_since(*t) < window);
        let failure_count = failures.len();

        if failure_count >= self.config.circuit_breaker_threshold {
            state.circuit_open.insert(action_name.to_string(), true);
            warn!(
                action = action_name,
                failures = failure_count,
                window_minutes = self.config.circuit_breaker_window_minutes,
                "circuit breaker opened"
            );
            return Some(format!(
                "Circuit breaker opened: {} recent failures",
                failure_count
            ));
        }

        None
    }
}

fn base_metadata(action: &ActionDefinition, now: DateTime<Utc>) -> Metadata {
    Metadata::from([
        ("action_name".to_string(), json!(action.name)),
        ("tier".to_string(), json!(action.tier.as_u8())),
        ("tier_name".to_string(), json!(action.tier.name())),
        ("category".to_string(), json!(action.category)),
        ("evaluation_timestamp".to_string(), json!(now.to_rfc3339())),
    ])
}

fn check_preconditions(action: &ActionDefinition, context: &PolicyContext) -> Result<(), String> {
    for condition in &action.preconditions {
        match condition {
            Precondition::DiskUsageThreshold { threshold } => match context.disk_usage_percent {
                Some(usage) if usage >= *threshold => {}
                Some(usage) => {
                    return Err(format!(
                        "disk usage {:.1}% below threshold {:.1}%",
                        usage, threshold
                    ))
                }
                None => return Err("disk usage unknown".to_string()),
            },
            Precondition::ServiceHealth { service } => {
                match context.service_health.get(service) {
                    Some(true) => {}
                    Some(false) => return Err(format!("service {} is unhealthy", service)),
                    None => return Err(format!("service {} health unknown", service)),
                }
            }
            Precondition::ScheduledWindow { start_hour, end_hour } => {
                let hour = context.now.hour() as u8;
                let inside = if start_hour <= end_hour {
                    (*start_hour..*end_hour).contains(&hour)
                } else {
                    // Window wraps midnight
                    hour >= *start_hour || hour < *end_hour
                };
                if !inside {
                    return Err(format!(
                        "outside scheduled window {:02}:00-{:02}:00",
                        start_hour, end_hour
                    ));
                }
            }
            Precondition::MemoryThreshold { threshold } => match context.memory_usage_percent {
                Some(usage) if usage >= *threshold => {}
                Some(usage) => {
                    return Err(format!(
                        "memory usage {:.1}% below threshold {:.1}%",
                        usage, threshold
                    ))
                }
                None => return Err("memory usage unknown".to_string()),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ActionCatalog;
    use assert_matches::assert_matches;

    fn engine_with(definitions: Vec<ActionDefinition>, config: PolicyConfig) -> PolicyEngine {
        let validator = Arc::new(CommandValidator::new().unwrap());
        let catalog = ActionCatalog::from_definitions(definitions, &validator).unwrap();
        PolicyEngine::new(catalog, validator, config)
    }

    fn restart_action() -> ActionDefinition {
        ActionDefinition {
            name: "container_restart".to_string(),
            tier: Tier::Remediate,
            category: "container".to_string(),
            command: "docker restart web-1".to_string(),
            timeout_seconds: 60,
            auto_execute: true,
            requires_approval: false,
            preconditions: Vec::new(),
            safety_checks: Vec::new(),
            risk_level: RiskLevel::Low,
            description: None,
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let engine = engine_with(vec![restart_action()], PolicyConfig::default());
        let result = engine.evaluate("does_not_exist", &PolicyContext::default());
        assert_matches!(result.decision, PolicyDecision::Reject);
        assert!(result.reason.contains("not found"));
    }

    #[test]
    fn rate_limit_defers_third_evaluation() {
        let config = PolicyConfig {
            max_executions_per_hour: 2,
            ..Default::default()
        };
        let engine = engine_with(vec![restart_action()], config);
        let context = PolicyContext::default();

        assert_matches!(
            engine.evaluate("container_restart", &context).decision,
            PolicyDecision::Approve
        );
        assert_matches!(
            engine.evaluate("container_restart", &context).decision,
            PolicyDecision::Approve
        );
        let third = engine.evaluate("container_restart", &context);
        assert_matches!(third.decision, PolicyDecision::Defer);
        assert!(third.reason.contains("Rate limit exceeded"));
    }

    #[test]
    fn breaker_opens_after_threshold_and_reset_recovers() {
        let config = PolicyConfig {
            circuit_breaker_threshold: 3,
            ..Default::default()
        };
        let engine = engine_with(vec![restart_action()], config);
        let context = PolicyContext::default();

        for _ in 0..3 {
            engine.record_execution_result("container_restart", false);
        }

        let rejected = engine.evaluate("container_restart", &context);
        assert_matches!(rejected.decision, PolicyDecision::Reject);
        assert!(rejected.reason.to_lowercase().contains("circuit breaker"));

        engine.reset_circuit_breaker("container_restart");
        let approved = engine.evaluate("container_restart", &context);
        assert_matches!(approved.decision, PolicyDecision::Approve);
    }

    #[test]
    fn explicit_approval_flag_short_circuits() {
        let mut action = restart_action();
        action.requires_approval = true;
        action.auto_execute = false;
        let engine = engine_with(vec![action], PolicyConfig::default());

        let result = engine.evaluate("container_restart", &PolicyContext::default());
        assert_matches!(result.decision, PolicyDecision::RequireApproval);
    }

    #[test]
    fn forbidden_path_in_command_rejects_as_critical() {
        let mut action = restart_action();
        action.name = "peek_at_docker_state".to_string();
        action.command = "ls /var/lib/docker".to_string();
        let engine = engine_with(vec![action], PolicyConfig::default());

        let result = engine.evaluate("peek_at_docker_state", &PolicyContext::default());
        assert_matches!(result.decision, PolicyDecision::Reject);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn unmet_precondition_defers() {
        let mut action = restart_action();
        action.name = "clear_space".to_string();
        action.command = "docker system prune -f".to_string();
        action.preconditions = vec![Precondition::DiskUsageThreshold { threshold: 80.0 }];
        let engine = engine_with(vec![action], PolicyConfig::default());

        let low_disk = PolicyContext {
            disk_usage_percent: Some(40.0),
            ..Default::default()
        };
        let result = engine.evaluate("clear_space", &low_disk);
        assert_matches!(result.decision, PolicyDecision::Defer);

        let full_disk = PolicyContext {
            disk_usage_percent: Some(92.0),
            ..Default::default()
        };
        let result = engine.evaluate("clear_space", &full_disk);
        assert_matches!(result.decision, PolicyDecision::Approve);
    }

    #[test]
    fn read_only_safety_check_rejects_write_commands() {
        let mut action = restart_action();
        action.name = "list_files".to_string();
        action.command = "rm old-report.txt".to_string();
        action.safety_checks = vec![SafetyCheck::ReadOnly];
        let engine = engine_with(vec![action], PolicyConfig::default());

        let result = engine.evaluate("list_files", &PolicyContext::default());
        assert_matches!(result.decision, PolicyDecision::Reject);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn restart_limit_caps_approvals_per_hour() {
        let mut action = restart_action();
        action.safety_checks = vec![SafetyCheck::RestartLimit { max_per_hour: 2 }];
        let engine = engine_with(vec![action], PolicyConfig::default());
        let context = PolicyContext::default();

        assert_matches!(
            engine.evaluate("container_restart", &context).decision,
            PolicyDecision::Approve
        );
        assert_matches!(
            engine.evaluate("container_restart", &context).decision,
            PolicyDecision::Approve
        );

        let third = engine.evaluate("container_restart", &context);
        assert_matches!(third.decision, PolicyDecision::Reject);
        assert!(third.reason.contains("Restart limit exceeded"));
        assert_eq!(third.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn non_auto_action_requires_manual_review() {
        let mut action = restart_action();
        action.auto_execute = false;
        let engine = engine_with(vec![action], PolicyConfig::default());

        let result = engine.evaluate("container_restart", &PolicyContext::default());
        assert_matches!(result.decision, PolicyDecision::RequireApproval);
        assert!(result.preconditions_met);
        assert!(result.safety_checks_passed);
    }

    #[test]
    fn identical_state_gives_identical_decisions() {
        let engine = engine_with(vec![restart_action()], PolicyConfig::default());
        let context = PolicyContext::default();

        let a = engine.evaluate("missing", &context);
        let b = engine.evaluate("missing", &context);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.reason, b.reason);
    }
}
