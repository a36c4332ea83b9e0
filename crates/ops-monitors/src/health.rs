//! Continuous health monitoring and self-healing
//!
//! Each tick snapshots container, database, network and disk health,
//! attempts the one safe self-heal (restarting a cleanly exited
//! container) and raises incidents for everything else.

use crate::probes::{
    ContainerInfo, ContainerRuntime, ContainerRunState, DatabaseProbe, DiskProbe, DiskUsage,
    NetworkProbe,
};
use chrono::{DateTime, Utc};
use ops_common::Metadata;
use ops_remediation::RemediationOrchestrator;
use ops_store::{IncidentSeverity, IncidentType, NewIncident};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

const HISTORY_LIMIT: usize = 100;
const CPU_ALERT_PERCENT: f64 = 90.0;
const MEMORY_ALERT_PERCENT: f64 = 90.0;
const DISK_WARN_PERCENT: f64 = 80.0;
const DISK_CRITICAL_PERCENT: f64 = 90.0;

/// One problematic container observed during a check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerIssue {
    pub name: String,
    pub issue: String,
    pub exit_code: Option<i32>,
}

/// Snapshot of one complete health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub healthy: Vec<String>,
    pub unhealthy: Vec<ContainerIssue>,
    pub stopped: Vec<ContainerIssue>,
    pub restarting: Vec<String>,
    pub database_ok: Option<bool>,
    pub long_running_queries: usize,
    pub internet_ok: bool,
    pub dns_ok: bool,
    pub disk: Option<DiskUsage>,
    pub probe_errors: Vec<String>,
    pub auto_restarts: usize,
    pub incidents_created: Vec<String>,
}

impl HealthSnapshot {
    pub fn issues_detected(&self) -> usize {
        self.unhealthy.len() + self.stopped.len() + self.incidents_created.len()
    }
}

/// Condensed trend report for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    pub timestamp: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub containers_total: usize,
    pub containers_healthy: usize,
    pub containers_unhealthy: usize,
    pub containers_stopped: usize,
    pub database_ok: Option<bool>,
    pub internet_ok: bool,
    pub dns_ok: bool,
    pub disk_usage_percent: Option<f64>,
    pub issues_found: usize,
    pub checks_recorded: usize,
}

/// Periodic health monitor
pub struct HealthMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    database: Option<Arc<dyn DatabaseProbe>>,
    network: Arc<dyn NetworkProbe>,
    disk: Arc<dyn DiskProbe>,
    orchestrator: Arc<RemediationOrchestrator>,
    history: Mutex<VecDeque<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        database: Option<Arc<dyn DatabaseProbe>>,
        network: Arc<dyn NetworkProbe>,
        disk: Arc<dyn DiskProbe>,
        orchestrator: Arc<RemediationOrchestrator>,
    ) -> Self {
        Self {
            runtime,
            database,
            network,
            disk,
            orchestrator,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Run one complete health check tick
    pub async fn run_health_check(&self) -> HealthSnapshot {
        info!("starting health check");
        let mut snapshot = HealthSnapshot {
            timestamp: Utc::now(),
            healthy: Vec::new(),
            unhealthy: Vec::new(),
            stopped: Vec::new(),
            restarting: Vec::new(),
            database_ok: None,
            long_running_queries: 0,
            internet_ok: false,
            dns_ok: false,
            disk: None,
            probe_errors: Vec::new(),
            auto_restarts: 0,
            incidents_created: Vec::new(),
        };

        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "container probe failed");
                snapshot.probe_errors.push(format!("containers: {}", e));
                Vec::new()
            }
        };
        self.classify_containers(&containers, &mut snapshot);

        if let Some(database) = &self.database {
            match database.ping().await {
                Ok(ok) => snapshot.database_ok = Some(ok),
                Err(e) => {
                    snapshot.database_ok = Some(false);
                    snapshot.probe_errors.push(format!("database: {}", e));
                }
            }
            if snapshot.database_ok == Some(true) {
                match database.long_running_queries().await {
                    Ok(queries) => {
                        if !queries.is_empty() {
                            warn!(count = queries.len(), "long-running queries detected");
                        }
                        snapshot.long_running_queries = queries.len();
                    }
                    Err(_) => {
                        // Not permitted on this database; skip quietly
                    }
                }
            }
        }

        snapshot.internet_ok = self.network.ping_external().await.unwrap_or(false);
        snapshot.dns_ok = self.network.resolve_known_host().await.unwrap_or(false);

        match self.disk.usage().await {
            Ok(usage) => snapshot.disk = Some(usage),
            Err(e) => snapshot.probe_errors.push(format!("disk: {}", e)),
        }

        self.respond(&mut snapshot).await;

        let mut history = self.history.lock();
        history.push_back(snapshot.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        drop(history);

        info!(
            issues = snapshot.issues_detected(),
            auto_restarts = snapshot.auto_restarts,
            "health check complete"
        );
        snapshot
    }

    /// Trend report built from the latest snapshot
    pub fn system_summary(&self) -> SystemSummary {
        let history = self.history.lock();
        let latest = history.back();
        SystemSummary {
            timestamp: Utc::now(),
            last_check: latest.map(|s| s.timestamp),
            containers_total: latest
                .map(|s| s.healthy.len() + s.unhealthy.len() + s.stopped.len())
                .unwrap_or(0),
            containers_healthy: latest.map(|s| s.healthy.len()).unwrap_or(0),
            containers_unhealthy: latest.map(|s| s.unhealthy.len()).unwrap_or(0),
            containers_stopped: latest.map(|s| s.stopped.len()).unwrap_or(0),
            database_ok: latest.and_then(|s| s.database_ok),
            internet_ok: latest.map(|s| s.internet_ok).unwrap_or(false),
            dns_ok: latest.map(|s| s.dns_ok).unwrap_or(false),
            disk_usage_percent: latest.and_then(|s| s.disk.map(|d| d.usage_percent)),
            issues_found: latest.map(|s| s.issues_detected()).unwrap_or(0),
            checks_recorded: history.len(),
        }
    }

    fn classify_containers(&self, containers: &[ContainerInfo], snapshot: &mut HealthSnapshot) {
        for container in containers {
            match container.state {
                ContainerRunState::Running => {
                    if container.health.as_deref() == Some("unhealthy") {
                        snapshot.unhealthy.push(ContainerIssue {
                            name: container.name.clone(),
                            issue: "Container is unhealthy".to_string(),
                            exit_code: None,
                        });
                    } else if container.cpu_percent.unwrap_or(0.0) > CPU_ALERT_PERCENT {
                        snapshot.unhealthy.push(ContainerIssue {
                            name: container.name.clone(),
                            issue: format!(
                                "High CPU usage: {:.0}%",
                                container.cpu_percent.unwrap_or(0.0)
                            ),
                            exit_code: None,
                        });
                    } else if container.memory_percent.unwrap_or(0.0) > MEMORY_ALERT_PERCENT {
                        snapshot.unhealthy.push(ContainerIssue {
                            name: container.name.clone(),
                            issue: format!(
                                "High memory usage: {:.0}%",
                                container.memory_percent.unwrap_or(0.0)
                            ),
                            exit_code: None,
                        });
                    } else {
                        snapshot.healthy.push(container.name.clone());
                    }
                }
                ContainerRunState::Exited | ContainerRunState::Dead => {
                    snapshot.stopped.push(ContainerIssue {
                        name: container.name.clone(),
                        issue: "Container stopped".to_string(),
                        exit_code: container.exit_code,
                    });
                }
                ContainerRunState::Restarting => {
                    snapshot.restarting.push(container.name.clone());
                }
                ContainerRunState::Paused | ContainerRunState::Unknown => {}
            }
        }
    }

    async fn respond(&self, snapshot: &mut HealthSnapshot) {
        // Cleanly exited containers get one auto-restart attempt; anything
        // else becomes an incident
        for stopped in snapshot.stopped.clone() {
            if stopped.exit_code == Some(0) {
                info!(container = %stopped.name, "attempting container auto-restart");
                let restarted = self
                    .runtime
                    .start_container(&stopped.name)
                    .await
                    .unwrap_or(false);
                if restarted {
                    snapshot.auto_restarts += 1;
                    continue;
                }
                self.raise(
                    snapshot,
                    IncidentType::ContainerDown,
                    IncidentSeverity::Medium,
                    &stopped.name,
                    format!("Container {} stopped and auto-restart failed", stopped.name),
                    false,
                    json!({ "exit_code": stopped.exit_code }),
                )
                .await;
            } else {
                self.raise(
                    snapshot,
                    IncidentType::ContainerDown,
                    IncidentSeverity::Medium,
                    &stopped.name,
                    format!(
                        "Container {} crashed with exit code {}",
                        stopped.name,
                        stopped.exit_code.map_or("unknown".to_string(), |c| c.to_string())
                    ),
                    true,
                    json!({ "exit_code": stopped.exit_code }),
                )
                .await;
            }
        }

        for unhealthy in snapshot.unhealthy.clone() {
            let incident_type = if unhealthy.issue.contains("CPU") {
                IncidentType::HighCpu
            } else if unhealthy.issue.contains("memory") {
                IncidentType::HighMemory
            } else {
                IncidentType::ContainerUnhealthy
            };
            self.raise(
                snapshot,
                incident_type,
                IncidentSeverity::Medium,
                &unhealthy.name,
                format!("Container {} is unhealthy: {}", unhealthy.name, unhealthy.issue),
                true,
                json!({ "issue": unhealthy.issue }),
            )
            .await;
        }

        if snapshot.database_ok == Some(false) {
            self.raise(
                snapshot,
                IncidentType::ServiceDegraded,
                IncidentSeverity::Critical,
                "database",
                "Database connectivity check failed".to_string(),
                true,
                json!({}),
            )
            .await;
        }

        if !snapshot.internet_ok {
            self.raise(
                snapshot,
                IncidentType::NetworkIssue,
                IncidentSeverity::Critical,
                "network",
                "No internet connectivity".to_string(),
                false,
                json!({ "dns_ok": snapshot.dns_ok }),
            )
            .await;
        }

        if let Some(disk) = snapshot.disk {
            if disk.usage_percent > DISK_CRITICAL_PERCENT {
                self.raise(
                    snapshot,
                    IncidentType::DiskFull,
                    IncidentSeverity::Critical,
                    "storage",
                    format!("Disk usage critical: {:.0}%", disk.usage_percent),
                    true,
                    json!({ "usage_percent": disk.usage_percent }),
                )
                .await;
            } else if disk.usage_percent > DISK_WARN_PERCENT {
                warn!(usage = disk.usage_percent, "disk usage high");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn raise(
        &self,
        snapshot: &mut HealthSnapshot,
        incident_type: IncidentType,
        severity: IncidentSeverity,
        service: &str,
        title: String,
        requires_approval: bool,
        details: serde_json::Value,
    ) {
        let mut trigger_details = Metadata::new();
        trigger_details.insert("requires_approval".to_string(), json!(requires_approval));
        trigger_details.insert("details".to_string(), details);

        let mut new = NewIncident::new(incident_type, service, title)
            .severity(severity)
            .trigger("health_monitor", trigger_details);
        if matches!(
            incident_type,
            IncidentType::ContainerDown
                | IncidentType::ContainerUnhealthy
                | IncidentType::HighCpu
                | IncidentType::HighMemory
        ) {
            new = new.container(service);
        }

        match self.orchestrator.create_incident(new).await {
            Ok(incident) => snapshot.incidents_created.push(incident.incident_id),
            Err(e) => {
                error!(error = %e, service, "failed to create incident");
                snapshot.probe_errors.push(format!("incident: {}", e));
            }
        }
    }
}
