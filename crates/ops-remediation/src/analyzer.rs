//! Incident analysis collaborator contract
//!
//! The orchestrator asks an analyzer for a playbook recommendation before
//! remediating. LLM-backed analyzers live outside this repository; the
//! in-tree [`RuleBasedAnalyzer`] is deterministic and always available.

use crate::playbooks::{self, Playbook};
use async_trait::async_trait;
use ops_common::{Metadata, Result, RiskLevel};
use ops_store::{Incident, IncidentSeverity};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A remediation recommendation for one incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub root_cause: String,
    pub severity_assessment: IncidentSeverity,
    /// None means no playbook fits and the incident needs a human
    pub recommended_playbook: Option<String>,
    pub playbook_params: Metadata,
    pub risk_assessment: RiskLevel,
    pub is_auto_safe: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub alternative_actions: Vec<String>,
    pub prevention_tips: Vec<String>,
}

/// Analysis collaborator
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, incident: &Incident, candidates: &[&Playbook]) -> Result<Recommendation>;
}

/// Deterministic analyzer that recommends the first applicable playbook
#[derive(Default)]
pub struct RuleBasedAnalyzer;

impl RuleBasedAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for RuleBasedAnalyzer {
    async fn analyze(&self, incident: &Incident, candidates: &[&Playbook]) -> Result<Recommendation> {
        let Some(playbook) = candidates.first() else {
            return Ok(Recommendation {
                root_cause: format!(
                    "No playbook covers incident type {}",
                    incident.incident_type.as_str()
                ),
                severity_assessment: incident.severity,
                recommended_playbook: None,
                playbook_params: Metadata::new(),
                risk_assessment: RiskLevel::Unknown,
                is_auto_safe: false,
                confidence: 0.3,
                reasoning: "No applicable playbook in the catalog".to_string(),
                alternative_actions: vec!["manual investigation".to_string()],
                prevention_tips: Vec::new(),
            });
        };

        let mut params = Metadata::new();
        if let Some(container) = &incident.container_name {
            params.insert("container_name".to_string(), json!(container));
        }
        params.insert("service_name".to_string(), json!(incident.service_name));

        Ok(Recommendation {
            root_cause: format!(
                "{} on service {}",
                incident.incident_type.as_str(),
                incident.service_name
            ),
            severity_assessment: incident.severity,
            recommended_playbook: Some(playbook.id.to_string()),
            playbook_params: params,
            risk_assessment: playbook.risk_level,
            is_auto_safe: playbook.auto_execute,
            confidence: 0.7,
            reasoning: format!(
                "{} is the first catalog playbook applicable to {}",
                playbook.name,
                incident.incident_type.as_str()
            ),
            alternative_actions: candidates
                .iter()
                .skip(1)
                .map(|p| p.id.to_string())
                .collect(),
            prevention_tips: Vec::new(),
        })
    }
}

/// Candidate playbooks for an incident, in catalog order
pub fn candidates_for(incident: &Incident) -> Vec<&'static Playbook> {
    playbooks::applicable_to(incident.incident_type)
}
