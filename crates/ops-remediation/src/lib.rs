//! Remediation orchestration
//!
//! Translates incidents into playbook executions and routes outcomes back
//! into incident state and the learning store. Selection is gated: unknown
//! playbooks escalate, auto-execution respects per-playbook settings and
//! severity thresholds, and confirmation-gated playbooks refuse to run
//! without an explicit token.

pub mod analyzer;
pub mod learning;
pub mod playbooks;

pub use analyzer::{candidates_for, Analyzer, Recommendation, RuleBasedAnalyzer};
pub use learning::{learning_stats, pattern_hash, record_outcome, LearningStats};
pub use playbooks::Playbook;

use async_trait::async_trait;
use ops_common::{Error, Metadata, Result};
use ops_executor::{ApprovalToken, ExecOptions, SafeExecutor};
use ops_policy::render_template;
use ops_store::{
    AutoRemediationSetting, Incident, IncidentFilter, IncidentPatch, IncidentSeverity,
    IncidentStatus, IncidentType, NewIncident, SettingPatch, Store,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Identity the orchestrator presents to the executor
const INITIATOR: &str = "remediation";

/// Result of running a command on a remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetCommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Remote transport collaborator: run a command on a named host
#[async_trait]
pub trait HostFleet: Send + Sync {
    async fn execute_command(
        &self,
        host_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<FleetCommandResult>;
}

/// How a playbook execution request should be gated
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionRequest {
    pub dry_run: bool,
    /// The caller is an autonomous loop, not a human
    pub auto_execute: bool,
    /// The caller carries explicit operator confirmation
    pub confirmed: bool,
}

/// Outcome of one playbook execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlaybookOutcome {
    Executed {
        incident_id: String,
        playbook_id: String,
        success: bool,
        result: serde_json::Value,
    },
    DryRun {
        incident_id: String,
        playbook_id: String,
        would_execute: String,
    },
    RequiresApproval {
        playbook_id: String,
        reason: String,
    },
    RequiresConfirmation {
        playbook_id: String,
    },
    Escalated {
        incident_id: String,
        reason: String,
    },
}

/// Failure report produced by monitors for incident intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFailure {
    pub service_name: String,
    pub container_name: Option<String>,
    pub display_name: Option<String>,
    pub message: Option<String>,
    pub severity: IncidentSeverity,
    pub health_status: Option<String>,
    pub restart_count: u32,
    pub details: Metadata,
}

/// Maps incidents to playbooks and closes the learning loop
pub struct RemediationOrchestrator {
    store: Arc<dyn Store>,
    executor: Arc<SafeExecutor>,
    analyzer: Arc<dyn Analyzer>,
    fleet: Option<Arc<dyn HostFleet>>,
}

impl RemediationOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<SafeExecutor>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            store,
            executor,
            analyzer,
            fleet: None,
        }
    }

    pub fn with_fleet(mut self, fleet: Arc<dyn HostFleet>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    pub async fn create_incident(&self, new: NewIncident) -> Result<Incident> {
        let incident = self.store.insert_incident(new).await?;
        info!(incident_id = %incident.incident_id, title = %incident.title, "created incident");
        Ok(incident)
    }

    pub async fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        self.store.get_incident(incident_id).await
    }

    pub async fn list_incidents(&self, filter: IncidentFilter) -> Result<Vec<Incident>> {
        self.store.query_incidents(filter).await
    }

    /// Ask the analyzer for a recommendation and persist it on the incident
    pub async fn analyze_incident(&self, incident_id: &str) -> Result<Recommendation> {
        let incident = self
            .store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| Error::Store(format!("incident not found: {}", incident_id)))?;

        let incident = if incident.status == IncidentStatus::Detected {
            self.store
                .update_incident_status(
                    incident_id,
                    IncidentStatus::Analyzing,
                    None,
                    IncidentPatch::default(),
                )
                .await?
        } else {
            incident
        };

        let candidates = candidates_for(&incident);
        let recommendation = self
            .analyzer
            .analyze(&incident, &candidates)
            .await
            .map_err(|e| Error::Collaborator(format!("analyzer failed: {}", e)))?;

        let patch = IncidentPatch {
            ai_analysis: serde_json::to_value(&recommendation).ok(),
            ai_recommendations: Some(json!({
                "playbook": recommendation.recommended_playbook,
                "params": recommendation.playbook_params,
                "alternatives": recommendation.alternative_actions,
                "prevention": recommendation.prevention_tips,
            })),
            playbook_id: recommendation.recommended_playbook.clone(),
            playbook_params: Some(recommendation.playbook_params.clone()),
            ..Default::default()
        };
        self.store.patch_incident(incident_id, patch).await?;

        Ok(recommendation)
    }

    /// Execute a playbook for an incident, honoring the selection gates
    pub async fn execute_playbook(
        &self,
        incident_id: &str,
        playbook_id: Option<&str>,
        params: Metadata,
        request: ExecutionRequest,
    ) -> Result<PlaybookOutcome> {
        let incident = self
            .store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| Error::Store(format!("incident not found: {}", incident_id)))?;

        let chosen = playbook_id
            .map(str::to_string)
            .or_else(|| incident.playbook_id.clone());

        let Some(chosen) = chosen else {
            return self
                .escalate_outcome(&incident, "no playbook selected for incident")
                .await;
        };

        let Some(playbook) = playbooks::get(&chosen) else {
            return self
                .escalate_outcome(&incident, &format!("unknown playbook: {}", chosen))
                .await;
        };

        if request.auto_execute {
            if !playbook.auto_execute {
                return Ok(PlaybookOutcome::RequiresApproval {
                    playbook_id: playbook.id.to_string(),
                    reason: format!("Playbook {} is not approved for auto-execution", playbook.id),
                });
            }
            if let Some(outcome) = self.check_auto_settings(&incident, playbook).await? {
                return Ok(outcome);
            }
        }

        if playbook.requires_confirmation && !request.confirmed && !request.dry_run {
            return Ok(PlaybookOutcome::RequiresConfirmation {
                playbook_id: playbook.id.to_string(),
            });
        }

        let command = self.render_playbook_command(playbook, &incident, &params);

        if request.dry_run {
            return Ok(PlaybookOutcome::DryRun {
                incident_id: incident.incident_id.clone(),
                playbook_id: playbook.id.to_string(),
                would_execute: command,
            });
        }

        self.store
            .update_incident_status(
                incident_id,
                IncidentStatus::Remediating,
                None,
                IncidentPatch {
                    playbook_id: Some(playbook.id.to_string()),
                    playbook_params: Some(params.clone()),
                    auto_remediated: Some(request.auto_execute),
                    increment_remediation_attempts: true,
                    ..Default::default()
                },
            )
            .await?;

        let timeout = Duration::from_secs(playbook.estimated_duration_seconds.max(60));
        let (success, result) = self
            .run_playbook_command(&incident, &command, timeout, request)
            .await;

        let incident = if success {
            let resolved = self
                .store
                .update_incident_status(
                    incident_id,
                    IncidentStatus::Resolved,
                    Some(format!("Resolved via playbook: {}", playbook.name)),
                    IncidentPatch {
                        playbook_result: Some(result.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            info!(incident_id, playbook = playbook.id, "playbook resolved incident");
            resolved
        } else {
            let failed = self
                .store
                .update_incident_status(
                    incident_id,
                    IncidentStatus::Failed,
                    None,
                    IncidentPatch {
                        playbook_result: Some(result.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            warn!(incident_id, playbook = playbook.id, "playbook failed");
            failed
        };

        if let Err(e) = record_outcome(self.store.as_ref(), &incident, playbook.id, success).await {
            warn!(incident_id, error = %e, "failed to update learning record");
        }

        Ok(PlaybookOutcome::Executed {
            incident_id: incident.incident_id,
            playbook_id: playbook.id.to_string(),
            success,
            result,
        })
    }

    /// Analyze, then execute the recommended playbook
    pub async fn remediate_incident(
        &self,
        incident_id: &str,
        request: ExecutionRequest,
    ) -> Result<PlaybookOutcome> {
        let recommendation = self.analyze_incident(incident_id).await?;

        let Some(playbook_id) = recommendation.recommended_playbook else {
            let incident = self
                .store
                .get_incident(incident_id)
                .await?
                .ok_or_else(|| Error::Store(format!("incident not found: {}", incident_id)))?;
            return self
                .escalate_outcome(&incident, "analyzer recommends manual handling")
                .await;
        };

        self.execute_playbook(
            incident_id,
            Some(&playbook_id),
            recommendation.playbook_params,
            request,
        )
        .await
    }

    /// Hand an incident to a human operator
    pub async fn escalate_to_human(&self, incident_id: &str, reason: &str) -> Result<Incident> {
        let incident = self
            .store
            .update_incident_status(
                incident_id,
                IncidentStatus::Escalated,
                Some(format!("Escalated: {}", reason)),
                IncidentPatch {
                    escalated_to: Some("human_operator".to_string()),
                    escalation_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        warn!(incident_id, reason, "incident escalated to humans");
        Ok(incident)
    }

    /// Open incidents for monitor-detected failures, deriving the type
    /// from the failure shape
    pub async fn detect_and_create_incidents(
        &self,
        failures: Vec<DetectedFailure>,
    ) -> Vec<Incident> {
        let mut incidents = Vec::new();

        for failure in failures {
            let incident_type = if failure.health_status.as_deref() == Some("unhealthy") {
                IncidentType::ContainerUnhealthy
            } else if failure.restart_count > 3 {
                IncidentType::ContainerCrashLoop
            } else {
                IncidentType::ContainerDown
            };

            let display = failure
                .display_name
                .clone()
                .unwrap_or_else(|| failure.service_name.clone());
            let message = failure
                .message
                .clone()
                .unwrap_or_else(|| "Service issue detected".to_string());

            let mut new = NewIncident::new(
                incident_type,
                failure.service_name.clone(),
                format!("{} - {}", display, message),
            )
            .severity(failure.severity)
            .trigger("auto_detection", failure.details.clone());
            if let Some(container) = &failure.container_name {
                new = new.container(container.clone());
            }

            match self.store.insert_incident(new).await {
                Ok(incident) => incidents.push(incident),
                Err(e) => warn!(service = %failure.service_name, error = %e, "failed to create incident"),
            }
        }

        incidents
    }

    /// Aggregate learning statistics
    pub async fn learning_stats(&self) -> Result<LearningStats> {
        learning_stats(self.store.as_ref()).await
    }

    /// Available playbooks, optionally filtered by applicable issue type
    pub fn playbooks(&self, applicable_to: Option<IncidentType>) -> Vec<&'static Playbook> {
        match applicable_to {
            Some(incident_type) => playbooks::applicable_to(incident_type),
            None => playbooks::all().iter().collect(),
        }
    }

    pub async fn update_auto_remediation_setting(
        &self,
        playbook_id: Option<String>,
        service_name: Option<String>,
        patch: SettingPatch,
    ) -> Result<AutoRemediationSetting> {
        self.store
            .upsert_autoremediation_setting(playbook_id, service_name, patch)
            .await
    }

    pub async fn auto_remediation_settings(&self) -> Result<Vec<AutoRemediationSetting>> {
        self.store.list_autoremediation_settings().await
    }

    async fn escalate_outcome(&self, incident: &Incident, reason: &str) -> Result<PlaybookOutcome> {
        self.escalate_to_human(&incident.incident_id, reason).await?;
        Ok(PlaybookOutcome::Escalated {
            incident_id: incident.incident_id.clone(),
            reason: reason.to_string(),
        })
    }

    /// Gate auto-execution on the stored per-playbook / per-service policy
    async fn check_auto_settings(
        &self,
        incident: &Incident,
        playbook: &Playbook,
    ) -> Result<Option<PlaybookOutcome>> {
        let settings = self.store.list_autoremediation_settings().await?;
        let matched = settings.iter().find(|s| {
            s.playbook_id.as_deref() == Some(playbook.id)
                || s.service_name.as_deref() == Some(incident.service_name.as_str())
        });

        let Some(setting) = matched else {
            return Ok(None);
        };

        if !setting.enabled {
            return Ok(Some(PlaybookOutcome::RequiresApproval {
                playbook_id: playbook.id.to_string(),
                reason: "Auto-remediation is disabled for this playbook".to_string(),
            }));
        }
        if incident.severity >= setting.require_approval_severity {
            return Ok(Some(PlaybookOutcome::RequiresApproval {
                playbook_id: playbook.id.to_string(),
                reason: format!(
                    "Severity {:?} requires human approval",
                    incident.severity
                ),
            }));
        }
        if incident.remediation_attempts >= setting.max_auto_attempts {
            return Ok(Some(
                self.escalate_outcome(incident, "max auto-remediation attempts reached")
                    .await?,
            ));
        }

        Ok(None)
    }

    fn render_playbook_command(
        &self,
        playbook: &Playbook,
        incident: &Incident,
        params: &Metadata,
    ) -> String {
        let mut values: HashMap<String, String> = HashMap::new();
        values.insert("service_name".to_string(), incident.service_name.clone());
        if let Some(container) = &incident.container_name {
            values.insert("container_name".to_string(), container.clone());
        }
        for (key, value) in params {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            values.insert(key.clone(), rendered);
        }
        render_template(playbook.command, &values)
    }

    async fn run_playbook_command(
        &self,
        incident: &Incident,
        command: &str,
        timeout: Duration,
        request: ExecutionRequest,
    ) -> (bool, serde_json::Value) {
        // Remote execution when the incident names a host and a fleet
        // transport is wired in; local safe execution otherwise
        if let (Some(host_id), Some(fleet)) = (&incident.host_id, &self.fleet) {
            return match fleet.execute_command(host_id, command, timeout).await {
                Ok(result) => {
                    let success = result.success;
                    (success, serde_json::to_value(&result).unwrap_or(json!({})))
                }
                Err(e) => (
                    false,
                    json!({ "success": false, "error": format!("fleet transport failed: {}", e) }),
                ),
            };
        }

        let granted_by = if request.confirmed {
            "operator"
        } else {
            "auto-remediation"
        };
        let options = ExecOptions {
            timeout: Some(timeout),
            approval: Some(ApprovalToken::new(granted_by)),
            ..Default::default()
        };
        let record = self.executor.execute(command, INITIATOR, options).await;
        let success = record.success;
        (success, serde_json::to_value(&record).unwrap_or(json!({})))
    }
}
