//! Persisted record types for incidents, learning and executed actions

use chrono::{DateTime, Utc};
use ops_common::{Metadata, RiskLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of incidents the engine can track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    ContainerDown,
    ContainerUnhealthy,
    ContainerCrashLoop,
    HighCpu,
    HighMemory,
    DiskFull,
    NasStale,
    ServiceDegraded,
    NetworkIssue,
    SslExpiring,
    SecurityAlert,
    Custom,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::ContainerDown => "container_down",
            IncidentType::ContainerUnhealthy => "container_unhealthy",
            IncidentType::ContainerCrashLoop => "container_crash_loop",
            IncidentType::HighCpu => "high_cpu",
            IncidentType::HighMemory => "high_memory",
            IncidentType::DiskFull => "disk_full",
            IncidentType::NasStale => "nas_stale",
            IncidentType::ServiceDegraded => "service_degraded",
            IncidentType::NetworkIssue => "network_issue",
            IncidentType::SslExpiring => "ssl_expiring",
            IncidentType::SecurityAlert => "security_alert",
            IncidentType::Custom => "custom",
        }
    }
}

/// Incident severity, ordered so threshold comparisons work
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Incident lifecycle states. Transitions are forward-only; a failed
/// incident is retried by opening a new one that references the original.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detected,
    Analyzing,
    Remediating,
    Resolved,
    Escalated,
    Failed,
}

impl IncidentStatus {
    fn rank(&self) -> u8 {
        match self {
            IncidentStatus::Detected => 0,
            IncidentStatus::Analyzing => 1,
            IncidentStatus::Remediating => 2,
            IncidentStatus::Resolved | IncidentStatus::Escalated | IncidentStatus::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

/// A tracked incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,
    pub host_id: Option<String>,
    pub service_name: String,
    pub container_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub ai_analysis: Option<serde_json::Value>,
    pub ai_recommendations: Option<serde_json::Value>,
    pub playbook_id: Option<String>,
    pub playbook_params: Option<Metadata>,
    pub playbook_result: Option<serde_json::Value>,
    pub auto_remediated: bool,
    pub remediation_attempts: u32,
    pub escalated_to: Option<String>,
    pub escalation_reason: Option<String>,
    pub resolution_notes: Option<String>,
    pub trigger_source: String,
    pub trigger_details: Metadata,
    pub related_incident_id: Option<String>,
    pub created_by: String,
}

impl Incident {
    /// Seconds from detection to resolution, when both are known
    pub fn duration_seconds(&self) -> Option<f64> {
        self.resolved_at
            .map(|resolved| (resolved - self.detected_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Fields required to open a new incident
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub host_id: Option<String>,
    pub service_name: String,
    pub container_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub trigger_source: String,
    pub trigger_details: Metadata,
    pub related_incident_id: Option<String>,
}

impl NewIncident {
    pub fn new(
        incident_type: IncidentType,
        service_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            incident_type,
            severity: IncidentSeverity::Medium,
            host_id: None,
            service_name: service_name.into(),
            container_name: None,
            title: title.into(),
            description: None,
            trigger_source: "manual".to_string(),
            trigger_details: Metadata::new(),
            related_incident_id: None,
        }
    }

    pub fn severity(mut self, severity: IncidentSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn container(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = Some(container_name.into());
        self
    }

    pub fn host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn trigger(mut self, source: impl Into<String>, details: Metadata) -> Self {
        self.trigger_source = source.into();
        self.trigger_details = details;
        self
    }

    pub fn related_to(mut self, incident_id: impl Into<String>) -> Self {
        self.related_incident_id = Some(incident_id.into());
        self
    }
}

/// Optional field updates applied together with a status change
#[derive(Debug, Clone, Default)]
pub struct IncidentPatch {
    pub playbook_id: Option<String>,
    pub playbook_params: Option<Metadata>,
    pub playbook_result: Option<serde_json::Value>,
    pub auto_remediated: Option<bool>,
    pub increment_remediation_attempts: bool,
    pub escalated_to: Option<String>,
    pub escalation_reason: Option<String>,
    pub ai_analysis: Option<serde_json::Value>,
    pub ai_recommendations: Option<serde_json::Value>,
}

/// Query filter for incidents
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<IncidentSeverity>,
    pub service_name: Option<String>,
    pub include_resolved: bool,
    pub limit: usize,
}

/// Aggregated knowledge about one recurring symptom pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    /// SHA-256 over the canonical symptom tuple, truncated to 64 hex chars
    pub pattern_hash: String,
    pub incident_type: IncidentType,
    pub service_name: Option<String>,
    pub symptoms: serde_json::Value,
    pub successful_playbook: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_resolution_time_seconds: Option<f64>,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

impl LearningRecord {
    /// Success rate when any resolutions were recorded
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            None
        } else {
            Some(self.success_count as f64 / total as f64)
        }
    }
}

/// Per-playbook / per-service auto-remediation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRemediationSetting {
    pub playbook_id: Option<String>,
    pub service_name: Option<String>,
    pub enabled: bool,
    pub max_auto_attempts: u32,
    pub cooldown_minutes: u32,
    /// At or above this severity a human must always approve
    pub require_approval_severity: IncidentSeverity,
    pub notify_channels: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl Default for AutoRemediationSetting {
    fn default() -> Self {
        Self {
            playbook_id: None,
            service_name: None,
            enabled: true,
            max_auto_attempts: 3,
            cooldown_minutes: 15,
            require_approval_severity: IncidentSeverity::High,
            notify_channels: Vec::new(),
            updated_at: Utc::now(),
            updated_by: "system".to_string(),
        }
    }
}

/// Partial update for an auto-remediation setting
#[derive(Debug, Clone, Default)]
pub struct SettingPatch {
    pub enabled: Option<bool>,
    pub max_auto_attempts: Option<u32>,
    pub cooldown_minutes: Option<u32>,
    pub require_approval_severity: Option<IncidentSeverity>,
    pub notify_channels: Option<Vec<String>>,
    pub updated_by: Option<String>,
}

/// Outcome classification of a persisted action execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Executed,
    Failed,
}

/// Persisted record of one executed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub status: ActionStatus,
    pub command: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub requested_by: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
    pub execution_result: Option<serde_json::Value>,
    pub execution_time_ms: u64,
    pub metadata: Metadata,
}

/// Generate an external incident identifier: `INC-YYYYMMDD-XXXXXXXX`
pub fn generate_incident_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("INC-{}-{}", now.format("%Y%m%d"), suffix)
}
