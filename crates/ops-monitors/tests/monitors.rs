//! Monitor loop behavior over mock collaborators

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ops_common::{ExecutorConfig, Result};
use ops_executor::{ApprovalToken, ExecOptions, ExecutionMode, MemoryAuditSink, SafeExecutor};
use ops_monitors::probes::*;
use ops_monitors::{ContinuousOptimizer, HealthMonitor, SecurityLevel, SecurityScanner};
use ops_remediation::{RemediationOrchestrator, RuleBasedAnalyzer};
use ops_store::{IncidentFilter, IncidentSeverity, IncidentType, MemoryStore, Store};
use ops_validator::CommandValidator;
use parking_lot::Mutex;
use std::sync::Arc;

fn executor_with_sink() -> (Arc<SafeExecutor>, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    let executor = Arc::new(SafeExecutor::new(
        Arc::new(CommandValidator::new().unwrap()),
        ExecutorConfig {
            default_timeout_seconds: 5,
            max_executions_per_minute: 60,
            audit_log_path: "/tmp/unused-audit.log".into(),
        },
        sink.clone(),
    ));
    (executor, sink)
}

fn orchestrator(store: Arc<MemoryStore>, executor: Arc<SafeExecutor>) -> Arc<RemediationOrchestrator> {
    Arc::new(RemediationOrchestrator::new(
        store,
        executor,
        Arc::new(RuleBasedAnalyzer::new()),
    ))
}

fn container(name: &str, state: ContainerRunState) -> ContainerInfo {
    ContainerInfo {
        name: name.to_string(),
        image: format!("registry.local/{}:latest", name),
        state,
        health: None,
        exit_code: None,
        restart_count: 0,
        cpu_percent: Some(5.0),
        memory_percent: Some(20.0),
        memory_limit_mb: Some(256.0),
        created_at: Some(Utc::now()),
        port_bindings: Vec::new(),
    }
}

/// Container runtime double whose restarts go through a real executor,
/// the way the production docker runtime shells out
struct FakeRuntime {
    containers: Vec<ContainerInfo>,
    start_succeeds: bool,
    started: Mutex<Vec<String>>,
    executor: Arc<SafeExecutor>,
    reclaimable_gb: f64,
    dangling: usize,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self.containers.clone())
    }

    async fn start_container(&self, name: &str) -> Result<bool> {
        self.started.lock().push(name.to_string());
        let options = ExecOptions {
            approval: Some(ApprovalToken::new("health-monitor")),
            ..Default::default()
        };
        let record = self
            .executor
            .execute(&format!("echo starting {}", name), "monitor", options)
            .await;
        Ok(record.success && self.start_succeeds)
    }

    async fn dangling_images(&self) -> Result<Vec<ImageInfo>> {
        Ok((0..self.dangling)
            .map(|i| ImageInfo {
                id: format!("sha-{}", i),
                size: "120MB".to_string(),
                created_at: None,
            })
            .collect())
    }

    async fn reclaimable_storage_gb(&self) -> Result<f64> {
        Ok(self.reclaimable_gb)
    }
}

struct UpNetwork;

#[async_trait]
impl NetworkProbe for UpNetwork {
    async fn ping_external(&self) -> Result<bool> {
        Ok(true)
    }
    async fn resolve_known_host(&self) -> Result<bool> {
        Ok(true)
    }
}

struct FixedDisk(f64);

#[async_trait]
impl DiskProbe for FixedDisk {
    async fn usage(&self) -> Result<DiskUsage> {
        Ok(DiskUsage {
            usage_percent: self.0,
            available_gb: 10.0,
        })
    }
}

fn health_monitor(
    containers: Vec<ContainerInfo>,
    start_succeeds: bool,
    disk_percent: f64,
) -> (HealthMonitor, Arc<MemoryStore>, Arc<MemoryAuditSink>, Arc<FakeRuntime>) {
    let (executor, sink) = executor_with_sink();
    let store = Arc::new(MemoryStore::new());
    let runtime = Arc::new(FakeRuntime {
        containers,
        start_succeeds,
        started: Mutex::new(Vec::new()),
        executor: executor.clone(),
        reclaimable_gb: 0.0,
        dangling: 0,
    });
    let monitor = HealthMonitor::new(
        runtime.clone(),
        None,
        Arc::new(UpNetwork),
        Arc::new(FixedDisk(disk_percent)),
        orchestrator(store.clone(), executor),
    );
    (monitor, store, sink, runtime)
}

#[tokio::test]
async fn cleanly_exited_container_is_auto_restarted_without_incident() {
    let mut web = container("web-1", ContainerRunState::Exited);
    web.exit_code = Some(0);

    let (monitor, store, sink, runtime) = health_monitor(vec![web], true, 40.0);
    let snapshot = monitor.run_health_check().await;

    assert_eq!(snapshot.auto_restarts, 1);
    assert!(snapshot.incidents_created.is_empty());
    assert_eq!(runtime.started.lock().as_slice(), ["web-1"]);

    // No incident persisted; exactly one execute-mode audit record
    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    assert!(incidents.is_empty());
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mode, ExecutionMode::Execute);
    assert!(records[0].success);
}

#[tokio::test]
async fn crashed_container_escalates_to_an_incident() {
    let mut web = container("web-1", ContainerRunState::Exited);
    web.exit_code = Some(137);

    let (monitor, store, sink, runtime) = health_monitor(vec![web], true, 40.0);
    let snapshot = monitor.run_health_check().await;

    assert_eq!(snapshot.auto_restarts, 0);
    assert!(runtime.started.lock().is_empty());
    assert!(sink.is_empty());

    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.incident_type, IncidentType::ContainerDown);
    assert_eq!(incident.severity, IncidentSeverity::Medium);
    assert!(!incident.auto_remediated);
    assert_eq!(
        incident
            .trigger_details
            .get("requires_approval")
            .and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[tokio::test]
async fn unhealthy_and_hot_containers_raise_typed_incidents() {
    let mut sick = container("proxy", ContainerRunState::Running);
    sick.health = Some("unhealthy".to_string());
    let mut hot = container("transcoder", ContainerRunState::Running);
    hot.cpu_percent = Some(97.0);

    let (monitor, store, _sink, _runtime) = health_monitor(vec![sick, hot], true, 40.0);
    monitor.run_health_check().await;

    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    let types: Vec<IncidentType> = incidents.iter().map(|i| i.incident_type).collect();
    assert!(types.contains(&IncidentType::ContainerUnhealthy));
    assert!(types.contains(&IncidentType::HighCpu));
}

#[tokio::test]
async fn critical_disk_usage_raises_a_critical_incident() {
    let (monitor, store, _sink, _runtime) = health_monitor(Vec::new(), true, 95.0);
    monitor.run_health_check().await;

    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].incident_type, IncidentType::DiskFull);
    assert_eq!(incidents[0].severity, IncidentSeverity::Critical);
}

#[tokio::test]
async fn optimizer_classifies_provisioning_and_flags_reclaimable_storage() {
    let (executor, _sink) = executor_with_sink();
    let store = Arc::new(MemoryStore::new());

    let mut idle = container("idle-svc", ContainerRunState::Running);
    idle.cpu_percent = Some(1.0);
    idle.memory_percent = Some(2.0);
    idle.memory_limit_mb = Some(2048.0);

    let mut squeezed = container("db", ContainerRunState::Running);
    squeezed.cpu_percent = Some(40.0);
    squeezed.memory_percent = Some(92.0);
    squeezed.memory_limit_mb = Some(1024.0);

    let runtime = Arc::new(FakeRuntime {
        containers: vec![idle, squeezed],
        start_succeeds: true,
        started: Mutex::new(Vec::new()),
        executor: executor.clone(),
        reclaimable_gb: 8.0,
        dangling: 4,
    });

    let optimizer = ContinuousOptimizer::new(
        runtime,
        None,
        orchestrator(store.clone(), executor),
    );
    let snapshot = optimizer.run_analysis().await;

    assert_eq!(snapshot.over_provisioned.len(), 1);
    assert_eq!(snapshot.over_provisioned[0].name, "idle-svc");
    assert_eq!(snapshot.under_provisioned.len(), 1);
    assert_eq!(snapshot.under_provisioned[0].name, "db");
    assert_eq!(snapshot.dangling_images, 4);

    // Storage reclaim over 5GiB and the memory bump both require approval
    let approval_required: Vec<_> = snapshot
        .recommendations
        .iter()
        .filter(|r| r.requires_approval)
        .collect();
    assert_eq!(approval_required.len(), 2);

    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    let types: Vec<IncidentType> = incidents.iter().map(|i| i.incident_type).collect();
    assert!(types.contains(&IncidentType::HighMemory));
    assert!(types.contains(&IncidentType::DiskFull));

    assert!(optimizer.efficiency_trends().is_some());
}

struct FixedCerts(Vec<CertificateRecord>);

#[async_trait]
impl CertificateSource for FixedCerts {
    async fn certificates(&self) -> Result<Vec<CertificateRecord>> {
        Ok(self.0.clone())
    }
}

struct FixedAuthAudit(Vec<FailedLoginGroup>);

#[async_trait]
impl AuthAuditSource for FixedAuthAudit {
    async fn failed_logins_last_hour(&self) -> Result<Vec<FailedLoginGroup>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn security_scan_flags_certs_and_brute_force() {
    let (executor, _sink) = executor_with_sink();
    let store = Arc::new(MemoryStore::new());
    let runtime = Arc::new(FakeRuntime {
        containers: vec![container("proxy", ContainerRunState::Running)],
        start_succeeds: true,
        started: Mutex::new(Vec::new()),
        executor: executor.clone(),
        reclaimable_gb: 0.0,
        dangling: 0,
    });

    let certs = FixedCerts(vec![
        CertificateRecord {
            domain: "old.example.net".to_string(),
            expires_at: Utc::now() - ChronoDuration::days(2),
            auto_renew: false,
        },
        CertificateRecord {
            domain: "soon.example.net".to_string(),
            expires_at: Utc::now() + ChronoDuration::days(10),
            auto_renew: true,
        },
        CertificateRecord {
            domain: "fine.example.net".to_string(),
            expires_at: Utc::now() + ChronoDuration::days(200),
            auto_renew: true,
        },
    ]);
    let audit = FixedAuthAudit(vec![
        FailedLoginGroup {
            username: "admin".to_string(),
            source: "203.0.113.9".to_string(),
            attempts: 14,
            last_seen: Utc::now(),
        },
        FailedLoginGroup {
            username: "sam".to_string(),
            source: "198.51.100.4".to_string(),
            attempts: 5,
            last_seen: Utc::now(),
        },
    ]);

    let scanner = SecurityScanner::new(
        runtime,
        None,
        Some(Arc::new(certs)),
        Some(Arc::new(audit)),
        orchestrator(store.clone(), executor),
    );
    let snapshot = scanner.run_scan().await;

    assert_eq!(snapshot.expired_certificates, vec!["old.example.net"]);
    assert_eq!(snapshot.expiring_certificates, vec!["soon.example.net"]);
    assert_eq!(snapshot.suspicious_logins.len(), 2);
    assert!(snapshot.suspicious_logins.iter().any(|l| l.brute_force));

    let incidents = store.query_incidents(IncidentFilter::default()).await.unwrap();
    // Expired cert (critical), expiring cert (medium), brute force (critical)
    assert_eq!(incidents.len(), 3);
    assert!(incidents
        .iter()
        .any(|i| i.incident_type == IncidentType::SecurityAlert
            && i.severity == IncidentSeverity::Critical));

    // One expired (-10) and one expiring (-5) cert, one brute-force
    // source (-10), two suspicious sources (-2): 100 - 27 = 73
    let summary = scanner.security_summary().unwrap();
    assert_eq!(summary.certificates_expired, 1);
    assert_eq!(summary.certificates_expiring, 1);
    assert_eq!(summary.failed_logins, 2);
    assert_eq!(summary.suspicious_authentication, 1);
    assert_eq!(summary.open_ports, 0);
    assert_eq!(summary.security_score, 73);
    assert_eq!(summary.security_level, SecurityLevel::Good);
}
