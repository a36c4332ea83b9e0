//! Continuous performance and storage optimization analysis

use crate::probes::{ContainerRuntime, ContainerRunState, DatabaseProbe};
use chrono::{DateTime, Utc};
use ops_common::Metadata;
use ops_remediation::RemediationOrchestrator;
use ops_store::{IncidentSeverity, IncidentType, NewIncident};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info};

const HISTORY_LIMIT: usize = 100;
const OVER_PROVISIONED_USAGE_PERCENT: f64 = 10.0;
const OVER_PROVISIONED_MIN_LIMIT_MB: f64 = 512.0;
const UNDER_PROVISIONED_MEMORY_PERCENT: f64 = 85.0;
const RECLAIM_APPROVAL_THRESHOLD_GB: f64 = 5.0;

/// A sizing observation about one container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningFinding {
    pub name: String,
    pub avg_usage_percent: f64,
    pub memory_percent: f64,
    pub memory_limit_mb: f64,
}

/// One optimization recommendation, priority 3 (nice to have) to 7 (urgent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: String,
    pub priority: u8,
    pub title: String,
    pub description: String,
    pub impact: String,
    pub requires_approval: bool,
}

/// Snapshot of one optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub containers_analyzed: usize,
    pub efficiency_score: f64,
    pub over_provisioned: Vec<ProvisioningFinding>,
    pub under_provisioned: Vec<ProvisioningFinding>,
    pub dangling_images: usize,
    pub reclaimable_gb: f64,
    pub slow_queries: usize,
    pub unindexed_tables: usize,
    pub recommendations: Vec<Recommendation>,
    pub incidents_created: Vec<String>,
    pub probe_errors: Vec<String>,
}

/// Efficiency trend report over the retained history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyTrends {
    pub current_efficiency: f64,
    pub average_efficiency: f64,
    pub trend: String,
    pub data_points: usize,
    pub over_provisioned_containers: usize,
    pub under_provisioned_containers: usize,
    pub reclaimable_gb: f64,
}

/// Periodic optimizer loop
pub struct ContinuousOptimizer {
    runtime: Arc<dyn ContainerRuntime>,
    database: Option<Arc<dyn DatabaseProbe>>,
    orchestrator: Arc<RemediationOrchestrator>,
    history: Mutex<VecDeque<OptimizationSnapshot>>,
}

impl ContinuousOptimizer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        database: Option<Arc<dyn DatabaseProbe>>,
        orchestrator: Arc<RemediationOrchestrator>,
    ) -> Self {
        Self {
            runtime,
            database,
            orchestrator,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Run one optimization analysis tick
    pub async fn run_analysis(&self) -> OptimizationSnapshot {
        info!("starting optimization analysis");
        let mut snapshot = OptimizationSnapshot {
            timestamp: Utc::now(),
            containers_analyzed: 0,
            efficiency_score: 0.0,
            over_provisioned: Vec::new(),
            under_provisioned: Vec::new(),
            dangling_images: 0,
            reclaimable_gb: 0.0,
            slow_queries: 0,
            unindexed_tables: 0,
            recommendations: Vec::new(),
            incidents_created: Vec::new(),
            probe_errors: Vec::new(),
        };

        self.analyze_resources(&mut snapshot).await;
        self.analyze_storage(&mut snapshot).await;
        self.analyze_database(&mut snapshot).await;
        self.recommend(&mut snapshot).await;

        let mut history = self.history.lock();
        history.push_back(snapshot.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        drop(history);

        info!(
            recommendations = snapshot.recommendations.len(),
            efficiency = snapshot.efficiency_score,
            "optimization analysis complete"
        );
        snapshot
    }

    /// Trend report over the retained snapshots
    pub fn efficiency_trends(&self) -> Option<EfficiencyTrends> {
        let history = self.history.lock();
        let latest = history.back()?;
        let scores: Vec<f64> = history.iter().map(|s| s.efficiency_score).collect();
        let average = scores.iter().sum::<f64>() / scores.len() as f64;

        Some(EfficiencyTrends {
            current_efficiency: latest.efficiency_score,
            average_efficiency: average,
            trend: if scores.len() > 1 && scores[scores.len() - 1] > scores[0] {
                "improving".to_string()
            } else {
                "stable".to_string()
            },
            data_points: scores.len(),
            over_provisioned_containers: latest.over_provisioned.len(),
            under_provisioned_containers: latest.under_provisioned.len(),
            reclaimable_gb: latest.reclaimable_gb,
        })
    }

    async fn analyze_resources(&self, snapshot: &mut OptimizationSnapshot) {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "container probe failed");
                snapshot.probe_errors.push(format!("containers: {}", e));
                return;
            }
        };

        let mut total_efficiency = 0.0;
        let mut running = 0usize;

        for container in containers {
            if container.state != ContainerRunState::Running {
                continue;
            }
            running += 1;

            let cpu = container.cpu_percent.unwrap_or(0.0);
            let memory = container.memory_percent.unwrap_or(0.0);
            let limit_mb = container.memory_limit_mb.unwrap_or(0.0);
            let avg_usage = (cpu + memory) / 2.0;
            total_efficiency += avg_usage.min(100.0);

            let finding = ProvisioningFinding {
                name: container.name.clone(),
                avg_usage_percent: avg_usage,
                memory_percent: memory,
                memory_limit_mb: limit_mb,
            };

            if avg_usage < OVER_PROVISIONED_USAGE_PERCENT && limit_mb > OVER_PROVISIONED_MIN_LIMIT_MB
            {
                snapshot.over_provisioned.push(finding);
            } else if memory > UNDER_PROVISIONED_MEMORY_PERCENT {
                snapshot.under_provisioned.push(finding);
            }
        }

        snapshot.containers_analyzed = running;
        if running > 0 {
            snapshot.efficiency_score = (total_efficiency / running as f64 * 100.0).round() / 100.0;
        }
    }

    async fn analyze_storage(&self, snapshot: &mut OptimizationSnapshot) {
        match self.runtime.dangling_images().await {
            Ok(images) => snapshot.dangling_images = images.len(),
            Err(e) => snapshot.probe_errors.push(format!("images: {}", e)),
        }
        match self.runtime.reclaimable_storage_gb().await {
            Ok(gb) => snapshot.reclaimable_gb = gb,
            Err(e) => snapshot.probe_errors.push(format!("storage: {}", e)),
        }
    }

    async fn analyze_database(&self, snapshot: &mut OptimizationSnapshot) {
        let Some(database) = &self.database else {
            return;
        };
        if !database.supports_statistics() {
            return;
        }

        match database.slow_queries().await {
            Ok(queries) => snapshot.slow_queries = queries.len(),
            Err(e) => snapshot.probe_errors.push(format!("slow queries: {}", e)),
        }
        match database.unindexed_tables().await {
            Ok(tables) => snapshot.unindexed_tables = tables.len(),
            Err(e) => snapshot.probe_errors.push(format!("unindexed tables: {}", e)),
        }
    }

    async fn recommend(&self, snapshot: &mut OptimizationSnapshot) {
        for finding in snapshot.over_provisioned.clone() {
            snapshot.recommendations.push(Recommendation {
                kind: "resource_optimization".to_string(),
                priority: 3,
                title: format!("Reduce memory limit for {}", finding.name),
                description: format!(
                    "Container {} uses only {:.1}% of its resources; its memory limit is {:.0}MB",
                    finding.name, finding.avg_usage_percent, finding.memory_limit_mb
                ),
                impact: "Free up system resources".to_string(),
                requires_approval: false,
            });
        }

        for finding in snapshot.under_provisioned.clone() {
            snapshot.recommendations.push(Recommendation {
                kind: "resource_optimization".to_string(),
                priority: 7,
                title: format!("Increase memory limit for {}", finding.name),
                description: format!(
                    "Container {} is at {:.1}% of its memory limit",
                    finding.name, finding.memory_percent
                ),
                impact: "Prevent OOM kills".to_string(),
                requires_approval: true,
            });
            self.raise(
                snapshot,
                IncidentType::HighMemory,
                IncidentSeverity::High,
                &finding.name,
                format!(
                    "Container {} is near its memory limit ({:.1}%)",
                    finding.name, finding.memory_percent
                ),
                json!({ "memory_percent": finding.memory_percent }),
            )
            .await;
        }

        if snapshot.slow_queries > 0 {
            snapshot.recommendations.push(Recommendation {
                kind: "database_optimization".to_string(),
                priority: 6,
                title: format!("Optimize {} slow database queries", snapshot.slow_queries),
                description: format!(
                    "{} statements have a mean execution time over one second",
                    snapshot.slow_queries
                ),
                impact: "Improve application performance".to_string(),
                requires_approval: false,
            });
        }

        if snapshot.reclaimable_gb > RECLAIM_APPROVAL_THRESHOLD_GB {
            snapshot.recommendations.push(Recommendation {
                kind: "storage_optimization".to_string(),
                priority: 5,
                title: format!(
                    "Clean up {:.1}GB of unused Docker data",
                    snapshot.reclaimable_gb
                ),
                description: format!(
                    "Pruning unused Docker resources could free {:.1}GB",
                    snapshot.reclaimable_gb
                ),
                impact: "Free disk space".to_string(),
                requires_approval: true,
            });
            self.raise(
                snapshot,
                IncidentType::DiskFull,
                IncidentSeverity::Medium,
                "storage",
                format!(
                    "{:.1}GB of reclaimable Docker storage detected",
                    snapshot.reclaimable_gb
                ),
                json!({ "reclaimable_gb": snapshot.reclaimable_gb }),
            )
            .await;
        }
    }

    async fn raise(
        &self,
        snapshot: &mut OptimizationSnapshot,
        incident_type: IncidentType,
        severity: IncidentSeverity,
        service: &str,
        title: String,
        details: serde_json::Value,
    ) {
        let mut trigger_details = Metadata::new();
        trigger_details.insert("requires_approval".to_string(), json!(true));
        trigger_details.insert("details".to_string(), details);

        let new = NewIncident::new(incident_type, service, title)
            .severity(severity)
            .trigger("optimizer", trigger_details);

        match self.orchestrator.create_incident(new).await {
            Ok(incident) => snapshot.incidents_created.push(incident.incident_id),
            Err(e) => {
                error!(error = %e, service, "failed to create incident");
                snapshot.probe_errors.push(format!("incident: {}", e));
            }
        }
    }
}
