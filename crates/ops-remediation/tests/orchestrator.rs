//! End-to-end remediation flow tests over the in-memory store

use async_trait::async_trait;
use ops_common::{ExecutorConfig, Result};
use ops_executor::{MemoryAuditSink, SafeExecutor};
use ops_remediation::{
    pattern_hash, DetectedFailure, ExecutionRequest, FleetCommandResult, HostFleet,
    PlaybookOutcome, RemediationOrchestrator, RuleBasedAnalyzer,
};
use ops_store::{
    IncidentSeverity, IncidentStatus, IncidentType, MemoryStore, NewIncident, SettingPatch, Store,
};
use ops_validator::CommandValidator;
use std::sync::Arc;
use std::time::Duration;

struct FakeFleet {
    succeed: bool,
}

#[async_trait]
impl HostFleet for FakeFleet {
    async fn execute_command(
        &self,
        _host_id: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<FleetCommandResult> {
        Ok(FleetCommandResult {
            success: self.succeed,
            exit_code: Some(if self.succeed { 0 } else { 1 }),
            stdout: format!("ran: {}", command),
            stderr: String::new(),
        })
    }
}

fn orchestrator(store: Arc<MemoryStore>, fleet_succeeds: Option<bool>) -> RemediationOrchestrator {
    let validator = Arc::new(CommandValidator::new().unwrap());
    let executor = Arc::new(SafeExecutor::new(
        validator,
        ExecutorConfig {
            default_timeout_seconds: 5,
            max_executions_per_minute: 60,
            audit_log_path: "/tmp/unused-audit.log".into(),
        },
        Arc::new(MemoryAuditSink::new()),
    ));
    let base = RemediationOrchestrator::new(store, executor, Arc::new(RuleBasedAnalyzer::new()));
    match fleet_succeeds {
        Some(succeed) => base.with_fleet(Arc::new(FakeFleet { succeed })),
        None => base,
    }
}

async fn container_down_incident(orchestrator: &RemediationOrchestrator) -> String {
    orchestrator
        .create_incident(
            NewIncident::new(IncidentType::ContainerDown, "media", "media is down")
                .severity(IncidentSeverity::Medium)
                .container("media-1")
                .host("host-a")
                .trigger("health_monitor", Default::default()),
        )
        .await
        .unwrap()
        .incident_id
}

#[tokio::test]
async fn successful_playbook_resolves_and_learns() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));
    let incident_id = container_down_incident(&orchestrator).await;

    let outcome = orchestrator
        .remediate_incident(&incident_id, ExecutionRequest::default())
        .await
        .unwrap();

    match outcome {
        PlaybookOutcome::Executed {
            success,
            playbook_id,
            ..
        } => {
            assert!(success);
            assert_eq!(playbook_id, "container_restart");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let incident = store.get_incident(&incident_id).await.unwrap().unwrap();
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert!(incident.resolved_at.is_some());
    assert!(incident
        .resolution_notes
        .as_deref()
        .unwrap()
        .contains("Restart Container"));

    // Exactly one success, zero failures for this symptom pattern
    let record = store
        .get_learning_record(&pattern_hash(&incident))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.success_count, 1);
    assert_eq!(record.failure_count, 0);
    assert_eq!(record.successful_playbook.as_deref(), Some("container_restart"));
}

#[tokio::test]
async fn failed_playbook_marks_incident_failed_and_learns() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(false));
    let incident_id = container_down_incident(&orchestrator).await;

    let outcome = orchestrator
        .remediate_incident(&incident_id, ExecutionRequest::default())
        .await
        .unwrap();

    match outcome {
        PlaybookOutcome::Executed { success, .. } => assert!(!success),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let incident = store.get_incident(&incident_id).await.unwrap().unwrap();
    assert_eq!(incident.status, IncidentStatus::Failed);

    let record = store
        .get_learning_record(&pattern_hash(&incident))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.success_count, 0);
    assert_eq!(record.failure_count, 1);
}

#[tokio::test]
async fn unknown_playbook_escalates() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));
    let incident_id = container_down_incident(&orchestrator).await;

    let outcome = orchestrator
        .execute_playbook(
            &incident_id,
            Some("definitely_not_a_playbook"),
            Default::default(),
            ExecutionRequest::default(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, PlaybookOutcome::Escalated { .. }));
    let incident = store.get_incident(&incident_id).await.unwrap().unwrap();
    assert_eq!(incident.status, IncidentStatus::Escalated);
    assert_eq!(incident.escalated_to.as_deref(), Some("human_operator"));
}

#[tokio::test]
async fn confirmation_gated_playbook_refuses_without_token() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));
    let incident_id = orchestrator
        .create_incident(
            NewIncident::new(IncidentType::DiskFull, "host", "disk almost full")
                .severity(IncidentSeverity::High),
        )
        .await
        .unwrap()
        .incident_id;

    let outcome = orchestrator
        .execute_playbook(
            &incident_id,
            Some("clear_docker_cache"),
            Default::default(),
            ExecutionRequest::default(),
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        PlaybookOutcome::RequiresConfirmation { .. }
    ));
}

#[tokio::test]
async fn auto_execution_is_refused_for_manual_playbooks() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));
    let incident_id = orchestrator
        .create_incident(NewIncident::new(IncidentType::DiskFull, "host", "disk"))
        .await
        .unwrap()
        .incident_id;

    let outcome = orchestrator
        .execute_playbook(
            &incident_id,
            Some("clear_docker_cache"),
            Default::default(),
            ExecutionRequest {
                auto_execute: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(outcome, PlaybookOutcome::RequiresApproval { .. }));
}

#[tokio::test]
async fn severity_threshold_forces_approval_for_auto_runs() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));

    orchestrator
        .update_auto_remediation_setting(
            Some("container_restart".to_string()),
            None,
            SettingPatch {
                require_approval_severity: Some(IncidentSeverity::High),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let incident_id = orchestrator
        .create_incident(
            NewIncident::new(IncidentType::ContainerDown, "media", "media is down")
                .severity(IncidentSeverity::Critical)
                .container("media-1")
                .host("host-a"),
        )
        .await
        .unwrap()
        .incident_id;

    let outcome = orchestrator
        .execute_playbook(
            &incident_id,
            Some("container_restart"),
            Default::default(),
            ExecutionRequest {
                auto_execute: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(outcome, PlaybookOutcome::RequiresApproval { .. }));
}

#[tokio::test]
async fn dry_run_renders_the_concrete_command() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));
    let incident_id = container_down_incident(&orchestrator).await;

    let outcome = orchestrator
        .execute_playbook(
            &incident_id,
            Some("container_restart"),
            Default::default(),
            ExecutionRequest {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    match outcome {
        PlaybookOutcome::DryRun { would_execute, .. } => {
            assert_eq!(would_execute, "docker restart media-1");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn detected_failures_become_typed_incidents() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));

    let incidents = orchestrator
        .detect_and_create_incidents(vec![
            DetectedFailure {
                service_name: "media".to_string(),
                container_name: Some("media-1".to_string()),
                display_name: None,
                message: Some("container exited".to_string()),
                severity: IncidentSeverity::Medium,
                health_status: None,
                restart_count: 0,
                details: Default::default(),
            },
            DetectedFailure {
                service_name: "proxy".to_string(),
                container_name: Some("proxy-1".to_string()),
                display_name: None,
                message: None,
                severity: IncidentSeverity::High,
                health_status: Some("unhealthy".to_string()),
                restart_count: 0,
                details: Default::default(),
            },
            DetectedFailure {
                service_name: "db".to_string(),
                container_name: Some("db-1".to_string()),
                display_name: None,
                message: None,
                severity: IncidentSeverity::High,
                health_status: None,
                restart_count: 5,
                details: Default::default(),
            },
        ])
        .await;

    assert_eq!(incidents.len(), 3);
    assert_eq!(incidents[0].incident_type, IncidentType::ContainerDown);
    assert_eq!(incidents[1].incident_type, IncidentType::ContainerUnhealthy);
    assert_eq!(incidents[2].incident_type, IncidentType::ContainerCrashLoop);
    assert!(incidents
        .iter()
        .all(|i| i.trigger_source == "auto_detection"));
}

#[tokio::test]
async fn learning_stats_aggregate_across_patterns() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Some(true));

    for _ in 0..2 {
        let incident_id = container_down_incident(&orchestrator).await;
        orchestrator
            .remediate_incident(&incident_id, ExecutionRequest::default())
            .await
            .unwrap();
    }

    let stats = orchestrator.learning_stats().await.unwrap();
    assert_eq!(stats.total_patterns, 1);
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.failure_count, 0);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    assert!(stats.playbook_effectiveness.contains_key("container_restart"));
}
