//! Continuous security scanning

use crate::probes::{
    AuthAuditSource, CertificateSource, ContainerRuntime, ScanOutcome, VulnerabilityScanner,
};
use chrono::{DateTime, Duration, Utc};
use ops_common::Metadata;
use ops_remediation::RemediationOrchestrator;
use ops_store::{IncidentSeverity, IncidentType, NewIncident};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

const HISTORY_LIMIT: usize = 50;
const STALE_IMAGE_AGE_DAYS: i64 = 180;
const CERT_WARNING_WINDOW_DAYS: i64 = 30;
const SUSPICIOUS_LOGIN_ATTEMPTS: u32 = 3;
const BRUTE_FORCE_ATTEMPTS: u32 = 10;

/// A vulnerable or stale image finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerableImage {
    pub container: String,
    pub image: String,
    pub vulnerability_count: usize,
    pub detail: String,
}

/// One suspicious authentication source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousLogin {
    pub username: String,
    pub source: String,
    pub attempts: u32,
    pub brute_force: bool,
}

/// Coarse classification of the security score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl SecurityLevel {
    fn from_score(score: u32) -> Self {
        match score {
            0..=39 => SecurityLevel::Critical,
            40..=69 => SecurityLevel::Warning,
            70..=89 => SecurityLevel::Good,
            _ => SecurityLevel::Excellent,
        }
    }
}

/// Scored security posture built from the latest scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub last_scan: DateTime<Utc>,
    pub vulnerabilities_found: usize,
    pub vulnerable_containers: usize,
    pub certificates_expiring: usize,
    pub certificates_expired: usize,
    pub failed_logins: usize,
    pub suspicious_authentication: usize,
    pub open_ports: usize,
    /// 0-100, higher is better
    pub security_score: u32,
    pub security_level: SecurityLevel,
}

/// Snapshot of one security scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub timestamp: DateTime<Utc>,
    pub images_scanned: usize,
    pub vulnerable: Vec<VulnerableImage>,
    pub stale_images: Vec<VulnerableImage>,
    pub scan_failures: usize,
    pub expired_certificates: Vec<String>,
    pub expiring_certificates: Vec<String>,
    pub suspicious_logins: Vec<SuspiciousLogin>,
    pub exposed_ports: Vec<String>,
    pub incidents_created: Vec<String>,
    pub probe_errors: Vec<String>,
}

/// Periodic security scanner
pub struct SecurityScanner {
    runtime: Arc<dyn ContainerRuntime>,
    scanner: Option<Arc<dyn VulnerabilityScanner>>,
    certificates: Option<Arc<dyn CertificateSource>>,
    auth_audit: Option<Arc<dyn AuthAuditSource>>,
    orchestrator: Arc<RemediationOrchestrator>,
    history: Mutex<VecDeque<SecuritySnapshot>>,
}

impl SecurityScanner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        scanner: Option<Arc<dyn VulnerabilityScanner>>,
        certificates: Option<Arc<dyn CertificateSource>>,
        auth_audit: Option<Arc<dyn AuthAuditSource>>,
        orchestrator: Arc<RemediationOrchestrator>,
    ) -> Self {
        Self {
            runtime,
            scanner,
            certificates,
            auth_audit,
            orchestrator,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Run one complete security scan tick
    pub async fn run_scan(&self) -> SecuritySnapshot {
        info!("starting security scan");
        let mut snapshot = SecuritySnapshot {
            timestamp: Utc::now(),
            images_scanned: 0,
            vulnerable: Vec::new(),
            stale_images: Vec::new(),
            scan_failures: 0,
            expired_certificates: Vec::new(),
            expiring_certificates: Vec::new(),
            suspicious_logins: Vec::new(),
            exposed_ports: Vec::new(),
            incidents_created: Vec::new(),
            probe_errors: Vec::new(),
        };

        self.scan_images(&mut snapshot).await;
        self.check_certificates(&mut snapshot).await;
        self.monitor_authentication(&mut snapshot).await;

        let mut history = self.history.lock();
        history.push_back(snapshot.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        drop(history);

        info!(
            vulnerable = snapshot.vulnerable.len(),
            incidents = snapshot.incidents_created.len(),
            "security scan complete"
        );
        snapshot
    }

    pub fn last_scan(&self) -> Option<SecuritySnapshot> {
        self.history.lock().back().cloned()
    }

    /// Security posture report scored from the latest scan. Point
    /// deductions are capped per category: vulnerabilities up to 40,
    /// certificate issues up to 20, brute-force sources up to 20,
    /// exposed ports and failed logins up to 10 each.
    pub fn security_summary(&self) -> Option<SecuritySummary> {
        let history = self.history.lock();
        let latest = history.back()?;

        let vulnerabilities_found: usize =
            latest.vulnerable.iter().map(|v| v.vulnerability_count).sum();
        let vulnerable_containers = latest.vulnerable.len();
        let certificates_expiring = latest.expiring_certificates.len();
        let certificates_expired = latest.expired_certificates.len();
        let failed_logins = latest.suspicious_logins.len();
        let suspicious_authentication = latest
            .suspicious_logins
            .iter()
            .filter(|l| l.brute_force)
            .count();
        let open_ports = latest.exposed_ports.len();

        let mut score: i64 = 100;
        if vulnerabilities_found > 0 {
            score -= (vulnerabilities_found as i64 * 2).min(40);
        }
        let ssl_issues = certificates_expiring as i64 + certificates_expired as i64 * 2;
        score -= (ssl_issues * 5).min(20);
        score -= (suspicious_authentication as i64 * 10).min(20);
        score -= (open_ports as i64 * 2).min(10);
        score -= (failed_logins as i64).min(10);
        let security_score = score.max(0) as u32;

        Some(SecuritySummary {
            last_scan: latest.timestamp,
            vulnerabilities_found,
            vulnerable_containers,
            certificates_expiring,
            certificates_expired,
            failed_logins,
            suspicious_authentication,
            open_ports,
            security_score,
            security_level: SecurityLevel::from_score(security_score),
        })
    }

    async fn scan_images(&self, snapshot: &mut SecuritySnapshot) {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "container probe failed");
                snapshot.probe_errors.push(format!("containers: {}", e));
                return;
            }
        };

        for container in &containers {
            if container.image.is_empty() {
                continue;
            }
            snapshot.images_scanned += 1;

            let outcome = match &self.scanner {
                Some(scanner) => scanner
                    .scan_image(&container.image)
                    .await
                    .unwrap_or(ScanOutcome::Unavailable),
                None => ScanOutcome::Unavailable,
            };

            match outcome {
                ScanOutcome::Vulnerabilities(vulnerabilities) if !vulnerabilities.is_empty() => {
                    let count = vulnerabilities.len();
                    let severity = if count > 10 {
                        IncidentSeverity::Critical
                    } else {
                        IncidentSeverity::High
                    };
                    snapshot.vulnerable.push(VulnerableImage {
                        container: container.name.clone(),
                        image: container.image.clone(),
                        vulnerability_count: count,
                        detail: format!("{} high/critical vulnerabilities", count),
                    });
                    self.raise(
                        snapshot,
                        IncidentType::SecurityAlert,
                        severity,
                        &container.name,
                        format!(
                            "Image {} has {} high or critical vulnerabilities",
                            container.image, count
                        ),
                        json!({ "image": container.image, "count": count }),
                    )
                    .await;
                }
                ScanOutcome::Vulnerabilities(_) => {}
                ScanOutcome::Unavailable => {
                    // No scanner; fall back to the image-age heuristic
                    if let Some(created) = container.created_at {
                        let age_days = (Utc::now() - created).num_days();
                        if age_days > STALE_IMAGE_AGE_DAYS {
                            warn!(
                                image = %container.image,
                                age_days,
                                "image is old enough to be a security risk"
                            );
                            snapshot.stale_images.push(VulnerableImage {
                                container: container.name.clone(),
                                image: container.image.clone(),
                                vulnerability_count: 0,
                                detail: format!("Image is {} days old", age_days),
                            });
                        }
                    } else {
                        snapshot.scan_failures += 1;
                    }
                }
            }

            for binding in &container.port_bindings {
                if binding.contains("0.0.0.0") {
                    snapshot
                        .exposed_ports
                        .push(format!("{}: {}", container.name, binding));
                }
            }
        }
    }

    async fn check_certificates(&self, snapshot: &mut SecuritySnapshot) {
        let Some(certificates) = &self.certificates else {
            return;
        };
        let records = match certificates.certificates().await {
            Ok(records) => records,
            Err(e) => {
                snapshot.probe_errors.push(format!("certificates: {}", e));
                return;
            }
        };

        let now = Utc::now();
        let warning_threshold = now + Duration::days(CERT_WARNING_WINDOW_DAYS);

        for record in records {
            if record.expires_at < now {
                snapshot.expired_certificates.push(record.domain.clone());
                self.raise(
                    snapshot,
                    IncidentType::SslExpiring,
                    IncidentSeverity::Critical,
                    &record.domain,
                    format!("SSL certificate for {} has expired", record.domain),
                    json!({ "expires_at": record.expires_at, "auto_renew": record.auto_renew }),
                )
                .await;
            } else if record.expires_at < warning_threshold {
                snapshot.expiring_certificates.push(record.domain.clone());
                self.raise(
                    snapshot,
                    IncidentType::SslExpiring,
                    IncidentSeverity::Medium,
                    &record.domain,
                    format!(
                        "SSL certificate for {} expires in under {} days",
                        record.domain, CERT_WARNING_WINDOW_DAYS
                    ),
                    json!({ "expires_at": record.expires_at }),
                )
                .await;
            }
        }
    }

    async fn monitor_authentication(&self, snapshot: &mut SecuritySnapshot) {
        let Some(auth_audit) = &self.auth_audit else {
            return;
        };
        let groups = match auth_audit.failed_logins_last_hour().await {
            Ok(groups) => groups,
            Err(e) => {
                snapshot.probe_errors.push(format!("auth audit: {}", e));
                return;
            }
        };

        for group in groups {
            if group.attempts <= SUSPICIOUS_LOGIN_ATTEMPTS {
                continue;
            }
            let brute_force = group.attempts > BRUTE_FORCE_ATTEMPTS;
            snapshot.suspicious_logins.push(SuspiciousLogin {
                username: group.username.clone(),
                source: group.source.clone(),
                attempts: group.attempts,
                brute_force,
            });

            if brute_force {
                self.raise(
                    snapshot,
                    IncidentType::SecurityAlert,
                    IncidentSeverity::Critical,
                    "authentication",
                    format!(
                        "Possible brute force: {} failed logins for {} from {}",
                        group.attempts, group.username, group.source
                    ),
                    json!({
                        "username": group.username,
                        "source": group.source,
                        "attempts": group.attempts,
                    }),
                )
                .await;
            }
        }
    }

    async fn raise(
        &self,
        snapshot: &mut SecuritySnapshot,
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
            .trigger("security_scan", trigger_details);

        match self.orchestrator.create_incident(new).await {
            Ok(incident) => snapshot.incidents_created.push(incident.incident_id),
            Err(e) => {
                error!(error = %e, service, "failed to create incident");
                snapshot.probe_errors.push(format!("incident: {}", e));
            }
        }
    }
}
