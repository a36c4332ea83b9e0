//! Learning from incident outcomes
//!
//! Each resolved or failed remediation updates a learning record keyed by
//! a stable hash over the incident's symptom tuple, so future decisions
//! can prefer playbooks with the best empirical success rate.

use chrono::Utc;
use ops_common::Result;
use ops_store::{Incident, LearningRecord, Store};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Stable digest over `{service, trigger, type}`, truncated to 64 hex chars
pub fn pattern_hash(incident: &Incident) -> String {
    let symptoms = symptom_tuple(incident);
    let canonical = serde_json::to_string(&symptoms).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(64);
    hash
}

fn symptom_tuple(incident: &Incident) -> serde_json::Value {
    json!({
        "service": incident.service_name,
        "trigger": incident.trigger_source,
        "type": incident.incident_type.as_str(),
    })
}

/// Record one remediation outcome against the incident's pattern
pub async fn record_outcome(
    store: &dyn Store,
    incident: &Incident,
    playbook_id: &str,
    success: bool,
) -> Result<LearningRecord> {
    let hash = pattern_hash(incident);
    let now = Utc::now();
    let duration = incident.duration_seconds();

    let initial = LearningRecord {
        pattern_hash: hash.clone(),
        incident_type: incident.incident_type,
        service_name: Some(incident.service_name.clone()),
        symptoms: symptom_tuple(incident),
        successful_playbook: success.then(|| playbook_id.to_string()),
        success_count: u64::from(success),
        failure_count: u64::from(!success),
        avg_resolution_time_seconds: if success { duration } else { None },
        first_occurrence: now,
        last_occurrence: now,
    };

    let playbook_id = playbook_id.to_string();
    let record = store
        .upsert_learning_record(
            initial,
            Box::new(move |record| {
                if success {
                    record.success_count += 1;
                    record.successful_playbook = Some(playbook_id);
                } else {
                    record.failure_count += 1;
                }
                record.last_occurrence = now;

                if let Some(duration) = duration {
                    let total = record.success_count + record.failure_count;
                    record.avg_resolution_time_seconds =
                        Some(match record.avg_resolution_time_seconds {
                            Some(avg) => (avg * (total - 1) as f64 + duration) / total as f64,
                            None => duration,
                        });
                }
            }),
        )
        .await?;

    debug!(
        pattern = %hash,
        success,
        success_count = record.success_count,
        failure_count = record.failure_count,
        "updated learning record"
    );
    Ok(record)
}

/// Effectiveness summary for one playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookEffectiveness {
    pub success_rate: f64,
    pub total_uses: u64,
}

/// Aggregated learning statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_patterns: usize,
    pub total_resolutions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub playbook_effectiveness: HashMap<String, PlaybookEffectiveness>,
}

/// Aggregate statistics over every learning record in the store
pub async fn learning_stats(store: &dyn Store) -> Result<LearningStats> {
    let records = store.list_learning_records().await?;

    let success_count: u64 = records.iter().map(|r| r.success_count).sum();
    let failure_count: u64 = records.iter().map(|r| r.failure_count).sum();
    let total = success_count + failure_count;

    let mut playbook_effectiveness = HashMap::new();
    for record in &records {
        if let Some(playbook) = &record.successful_playbook {
            let uses = record.success_count + record.failure_count;
            playbook_effectiveness.insert(
                playbook.clone(),
                PlaybookEffectiveness {
                    success_rate: if uses > 0 {
                        record.success_count as f64 / uses as f64
                    } else {
                        0.0
                    },
                    total_uses: uses,
                },
            );
        }
    }

    Ok(LearningStats {
        total_patterns: records.len(),
        total_resolutions: total,
        success_count,
        failure_count,
        success_rate: if total > 0 {
            success_count as f64 / total as f64
        } else {
            0.0
        },
        playbook_effectiveness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_store::{IncidentSeverity, IncidentStatus, IncidentType, MemoryStore, NewIncident};

    async fn incident(store: &MemoryStore) -> Incident {
        store
            .insert_incident(
                NewIncident::new(IncidentType::ContainerDown, "media", "media down")
                    .severity(IncidentSeverity::High)
                    .trigger("health_monitor", Default::default()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn pattern_hash_is_stable_and_64_chars() {
        let store = MemoryStore::new();
        let incident = incident(&store).await;
        let a = pattern_hash(&incident);
        let b = pattern_hash(&incident);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn same_symptoms_share_a_pattern() {
        let store = MemoryStore::new();
        let first = incident(&store).await;
        let second = incident(&store).await;
        assert_ne!(first.incident_id, second.incident_id);
        assert_eq!(pattern_hash(&first), pattern_hash(&second));
    }

    #[tokio::test]
    async fn success_increments_only_success_count() {
        let store = MemoryStore::new();
        let incident = incident(&store).await;

        let record = record_outcome(&store, &incident, "container_restart", true)
            .await
            .unwrap();
        assert_eq!(record.success_count, 1);
        assert_eq!(record.failure_count, 0);

        let record = record_outcome(&store, &incident, "container_restart", true)
            .await
            .unwrap();
        assert_eq!(record.success_count, 2);
        assert_eq!(record.failure_count, 0);
        assert_eq!(
            record.successful_playbook.as_deref(),
            Some("container_restart")
        );
    }

    #[tokio::test]
    async fn rolling_mean_matches_arithmetic_mean() {
        let store = MemoryStore::new();
        let base = incident(&store).await;

        // Resolve three incidents of the same pattern with known durations
        let mut durations = Vec::new();
        for _ in 0..3 {
            let incident = store
                .insert_incident(
                    NewIncident::new(IncidentType::ContainerDown, "media", "media down")
                        .severity(IncidentSeverity::High)
                        .trigger("health_monitor", Default::default()),
                )
                .await
                .unwrap();
            let resolved = store
                .update_incident_status(
                    &incident.incident_id,
                    IncidentStatus::Resolved,
                    None,
                    Default::default(),
                )
                .await
                .unwrap();
            let duration = resolved.duration_seconds().unwrap();
            durations.push(duration);
            record_outcome(&store, &resolved, "container_restart", true)
                .await
                .unwrap();
        }

        let record = store
            .get_learning_record(&pattern_hash(&base))
            .await
            .unwrap()
            .unwrap();
        let mean: f64 = durations.iter().sum::<f64>() / durations.len() as f64;
        let avg = record.avg_resolution_time_seconds.unwrap();
        assert!((avg - mean).abs() < 1e-6, "avg {} != mean {}", avg, mean);
    }
}
