//! In-memory store implementation
//!
//! The default store for embedded use and tests. Each operation is its own
//! short critical section, mirroring the per-operation transaction scope of
//! a driver-backed store.

use crate::records::*;
use crate::{LearningUpdate, Store};
use async_trait::async_trait;
use chrono::Utc;
use ops_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

fn apply_patch(incident: &mut Incident, patch: IncidentPatch) {
    if let Some(playbook_id) = patch.playbook_id {
        incident.playbook_id = Some(playbook_id);
    }
    if let Some(params) = patch.playbook_params {
        incident.playbook_params = Some(params);
    }
    if let Some(result) = patch.playbook_result {
        incident.playbook_result = Some(result);
    }
    if let Some(auto) = patch.auto_remediated {
        incident.auto_remediated = auto;
    }
    if patch.increment_remediation_attempts {
        incident.remediation_attempts += 1;
    }
    if let Some(escalated_to) = patch.escalated_to {
        incident.escalated_to = Some(escalated_to);
    }
    if let Some(reason) = patch.escalation_reason {
        incident.escalation_reason = Some(reason);
    }
    if let Some(analysis) = patch.ai_analysis {
        incident.ai_analysis = Some(analysis);
    }
    if let Some(recommendations) = patch.ai_recommendations {
        incident.ai_recommendations = Some(recommendations);
    }
}

#[derive(Default)]
struct Tables {
    actions: Vec<ActionRecord>,
    incidents: HashMap<String, Incident>,
    learning: HashMap<String, LearningRecord>,
    settings: HashMap<(Option<String>, Option<String>), AutoRemediationSetting>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted action records (test helper)
    pub fn action_count(&self) -> usize {
        self.tables.read().actions.len()
    }

    /// All persisted action records (test helper)
    pub fn actions(&self) -> Vec<ActionRecord> {
        self.tables.read().actions.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_action(&self, record: ActionRecord) -> Result<String> {
        let id = record.id.clone();
        self.tables.write().actions.push(record);
        debug!(action_id = %id, "persisted action record");
        Ok(id)
    }

    async fn insert_incident(&self, new: NewIncident) -> Result<Incident> {
        let now = Utc::now();
        let incident = Incident {
            incident_id: generate_incident_id(now),
            incident_type: new.incident_type,
            severity: new.severity,
            status: IncidentStatus::Detected,
            host_id: new.host_id,
            service_name: new.service_name,
            container_name: new.container_name,
            title: new.title,
            description: new.description,
            detected_at: now,
            acknowledged_at: None,
            resolved_at: None,
            ai_analysis: None,
            ai_recommendations: None,
            playbook_id: None,
            playbook_params: None,
            playbook_result: None,
            auto_remediated: false,
            remediation_attempts: 0,
            escalated_to: None,
            escalation_reason: None,
            resolution_notes: None,
            trigger_source: new.trigger_source,
            trigger_details: new.trigger_details,
            related_incident_id: new.related_incident_id,
            created_by: "ops-engine".to_string(),
        };

        self.tables
            .write()
            .incidents
            .insert(incident.incident_id.clone(), incident.clone());
        debug!(incident_id = %incident.incident_id, "created incident");
        Ok(incident)
    }

    async fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>> {
        Ok(self.tables.read().incidents.get(incident_id).cloned())
    }

    async fn query_incidents(&self, filter: IncidentFilter) -> Result<Vec<Incident>> {
        let tables = self.tables.read();
        let mut incidents: Vec<Incident> = tables
            .incidents
            .values()
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.severity.map_or(true, |s| i.severity == s))
            .filter(|i| {
                filter
                    .service_name
                    .as_deref()
                    .map_or(true, |s| i.service_name == s)
            })
            .filter(|i| filter.include_resolved || i.status != IncidentStatus::Resolved)
            .cloned()
            .collect();

        incidents.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.detected_at.cmp(&a.detected_at))
        });
        if filter.limit > 0 {
            incidents.truncate(filter.limit);
        }
        Ok(incidents)
    }

    async fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        notes: Option<String>,
        patch: IncidentPatch,
    ) -> Result<Incident> {
        let mut tables = self.tables.write();
        let incident = tables
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| Error::Store(format!("incident not found: {}", incident_id)))?;

        if !incident.status.can_transition_to(status) {
            return Err(Error::Store(format!(
                "illegal incident transition {:?} -> {:?} for {}",
                incident.status, status, incident_id
            )));
        }

        incident.status = status;
        if status == IncidentStatus::Resolved {
            incident.resolved_at = Some(Utc::now());
        }
        if let Some(notes) = notes {
            incident.resolution_notes = Some(notes);
        }
        apply_patch(incident, patch);

        Ok(incident.clone())
    }

    async fn patch_incident(&self, incident_id: &str, patch: IncidentPatch) -> Result<Incident> {
        let mut tables = self.tables.write();
        let incident = tables
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| Error::Store(format!("incident not found: {}", incident_id)))?;
        apply_patch(incident, patch);
        Ok(incident.clone())
    }

    async fn upsert_learning_record(
        &self,
        initial: LearningRecord,
        update: LearningUpdate,
    ) -> Result<LearningRecord> {
        let mut tables = self.tables.write();
        let record = tables
            .learning
            .entry(initial.pattern_hash.clone())
            .and_modify(|existing| update(existing))
            .or_insert(initial);
        Ok(record.clone())
    }

    async fn get_learning_record(&self, pattern_hash: &str) -> Result<Option<LearningRecord>> {
        Ok(self.tables.read().learning.get(pattern_hash).cloned())
    }

    async fn list_learning_records(&self) -> Result<Vec<LearningRecord>> {
        Ok(self.tables.read().learning.values().cloned().collect())
    }

    async fn upsert_autoremediation_setting(
        &self,
        playbook_id: Option<String>,
        service_name: Option<String>,
        patch: SettingPatch,
    ) -> Result<AutoRemediationSetting> {
        let mut tables = self.tables.write();
        let key = (playbook_id.clone(), service_name.clone());
        let setting = tables.settings.entry(key).or_insert_with(|| {
            AutoRemediationSetting {
                playbook_id,
                service_name,
                ..Default::default()
            }
        });

        if let Some(enabled) = patch.enabled {
            setting.enabled = enabled;
        }
        if let Some(max) = patch.max_auto_attempts {
            setting.max_auto_attempts = max;
        }
        if let Some(cooldown) = patch.cooldown_minutes {
            setting.cooldown_minutes = cooldown;
        }
        if let Some(severity) = patch.require_approval_severity {
            setting.require_approval_severity = severity;
        }
        if let Some(channels) = patch.notify_channels {
            setting.notify_channels = channels;
        }
        setting.updated_at = Utc::now();
        setting.updated_by = patch.updated_by.unwrap_or_else(|| "system".to_string());

        Ok(setting.clone())
    }

    async fn list_autoremediation_settings(&self) -> Result<Vec<AutoRemediationSetting>> {
        Ok(self.tables.read().settings.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn incident_lifecycle_round_trip() {
        let store = MemoryStore::new();
        let incident = store
            .insert_incident(
                NewIncident::new(IncidentType::ContainerDown, "media", "media is down")
                    .severity(IncidentSeverity::High)
                    .container("media-1"),
            )
            .await
            .unwrap();

        assert_eq!(incident.status, IncidentStatus::Detected);

        let updated = store
            .update_incident_status(
                &incident.incident_id,
                IncidentStatus::Resolved,
                Some("restarted".to_string()),
                IncidentPatch::default(),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, IncidentStatus::Resolved);
        assert!(updated.resolved_at.is_some());
        assert_eq!(updated.resolution_notes.as_deref(), Some("restarted"));
    }

    #[tokio::test]
    async fn backwards_transition_is_refused() {
        let store = MemoryStore::new();
        let incident = store
            .insert_incident(NewIncident::new(
                IncidentType::DiskFull,
                "host",
                "disk is full",
            ))
            .await
            .unwrap();

        store
            .update_incident_status(
                &incident.incident_id,
                IncidentStatus::Resolved,
                None,
                IncidentPatch::default(),
            )
            .await
            .unwrap();

        let result = store
            .update_incident_status(
                &incident.incident_id,
                IncidentStatus::Remediating,
                None,
                IncidentPatch::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn query_filters_resolved_by_default() {
        let store = MemoryStore::new();
        let a = store
            .insert_incident(NewIncident::new(IncidentType::HighCpu, "svc-a", "cpu"))
            .await
            .unwrap();
        store
            .insert_incident(NewIncident::new(IncidentType::HighMemory, "svc-b", "mem"))
            .await
            .unwrap();

        store
            .update_incident_status(
                &a.incident_id,
                IncidentStatus::Resolved,
                None,
                IncidentPatch::default(),
            )
            .await
            .unwrap();

        let open = store.query_incidents(IncidentFilter::default()).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].service_name, "svc-b");

        let all = store
            .query_incidents(IncidentFilter {
                include_resolved: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn learning_upsert_applies_update_only_to_existing() {
        let store = MemoryStore::new();
        let initial = LearningRecord {
            pattern_hash: "a".repeat(64),
            incident_type: IncidentType::ContainerDown,
            service_name: Some("media".to_string()),
            symptoms: json!({"type": "container_down"}),
            successful_playbook: Some("container_restart".to_string()),
            success_count: 1,
            failure_count: 0,
            avg_resolution_time_seconds: None,
            first_occurrence: Utc::now(),
            last_occurrence: Utc::now(),
        };

        let created = store
            .upsert_learning_record(initial.clone(), Box::new(|r| r.success_count += 1))
            .await
            .unwrap();
        assert_eq!(created.success_count, 1);

        let updated = store
            .upsert_learning_record(initial, Box::new(|r| r.success_count += 1))
            .await
            .unwrap();
        assert_eq!(updated.success_count, 2);
    }
}
