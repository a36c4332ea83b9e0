//! The closed catalog of remediation playbooks

use ops_common::RiskLevel;
use ops_store::{IncidentSeverity, IncidentType};

/// A named remediation procedure
#[derive(Debug, Clone)]
pub struct Playbook {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub auto_execute: bool,
    pub requires_confirmation: bool,
    pub severity: IncidentSeverity,
    pub risk_level: RiskLevel,
    pub estimated_duration_seconds: u64,
    /// Command template; placeholders are rendered from incident fields
    /// and caller parameters
    pub command: &'static str,
    pub applicable_issues: &'static [IncidentType],
    pub rollback: &'static str,
}

static PLAYBOOKS: &[Playbook] = &[
    Playbook {
        id: "container_restart",
        name: "Restart Container",
        description: "Restart a Docker container to resolve issues",
        auto_execute: true,
        requires_confirmation: false,
        severity: IncidentSeverity::Low,
        risk_level: RiskLevel::Low,
        estimated_duration_seconds: 30,
        command: "docker restart {container_name}",
        applicable_issues: &[
            IncidentType::ContainerDown,
            IncidentType::ContainerUnhealthy,
            IncidentType::ContainerCrashLoop,
        ],
        rollback: "None required - container will restart automatically",
    },
    Playbook {
        id: "container_recreate",
        name: "Recreate Container",
        description: "Stop, remove, and recreate container from compose",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::Medium,
        risk_level: RiskLevel::Medium,
        estimated_duration_seconds: 120,
        command: "docker compose -f /opt/homelab/docker-compose.yml up -d {service_name}",
        applicable_issues: &[
            IncidentType::ContainerCrashLoop,
            IncidentType::ContainerUnhealthy,
        ],
        rollback: "docker logs {container_name}",
    },
    Playbook {
        id: "nas_remount",
        name: "Remount NAS Shares",
        description: "Remount stale NAS bind mounts",
        auto_execute: true,
        requires_confirmation: false,
        severity: IncidentSeverity::Medium,
        risk_level: RiskLevel::Low,
        estimated_duration_seconds: 60,
        command: "sudo /usr/local/bin/nas-bind-mounts.sh start",
        applicable_issues: &[IncidentType::NasStale],
        rollback: "sudo /usr/local/bin/nas-bind-mounts.sh stop",
    },
    Playbook {
        id: "clear_docker_cache",
        name: "Clear Docker Cache",
        description: "Prune unused Docker resources to free disk space",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::Medium,
        risk_level: RiskLevel::Medium,
        estimated_duration_seconds: 300,
        command: "docker system prune -f",
        applicable_issues: &[IncidentType::DiskFull, IncidentType::HighMemory],
        rollback: "None - data is permanently removed",
    },
    Playbook {
        id: "restart_systemd_service",
        name: "Restart Systemd Service",
        description: "Restart a systemd service on the host",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::High,
        risk_level: RiskLevel::High,
        estimated_duration_seconds: 60,
        command: "sudo systemctl restart {service_name}",
        applicable_issues: &[IncidentType::ServiceDegraded],
        rollback: "systemctl status {service_name}",
    },
    Playbook {
        id: "scale_container",
        name: "Scale Container Resources",
        description: "Adjust container memory/CPU limits",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::High,
        risk_level: RiskLevel::Medium,
        estimated_duration_seconds: 120,
        command: "docker update --memory={memory_limit} --cpus={cpu_limit} {container_name}",
        applicable_issues: &[IncidentType::HighCpu, IncidentType::HighMemory],
        rollback: "docker update --memory={old_memory} --cpus={old_cpu} {container_name}",
    },
    Playbook {
        id: "check_network",
        name: "Network Connectivity Check",
        description: "Diagnose network connectivity issues",
        auto_execute: true,
        requires_confirmation: false,
        severity: IncidentSeverity::Medium,
        risk_level: RiskLevel::Low,
        estimated_duration_seconds: 30,
        command: "docker network inspect {network_name}",
        applicable_issues: &[IncidentType::NetworkIssue],
        rollback: "None required",
    },
    Playbook {
        id: "renew_ssl",
        name: "Renew SSL Certificate",
        description: "Force renewal of SSL certificate via certbot",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::High,
        risk_level: RiskLevel::Medium,
        estimated_duration_seconds: 180,
        command: "sudo certbot renew --force-renewal",
        applicable_issues: &[IncidentType::SslExpiring],
        rollback: "Check /etc/letsencrypt/live for backup",
    },
    Playbook {
        id: "kvm_reset_gpu",
        name: "Reset GPU for KVM",
        description: "Unbind and rebind GPU for KVM passthrough",
        auto_execute: false,
        requires_confirmation: true,
        severity: IncidentSeverity::Critical,
        risk_level: RiskLevel::High,
        estimated_duration_seconds: 300,
        command: "sudo /usr/local/bin/reset-gpu.sh",
        applicable_issues: &[IncidentType::ServiceDegraded],
        rollback: "Reboot may be required",
    },
];

/// The full playbook catalog
pub fn all() -> &'static [Playbook] {
    PLAYBOOKS
}

/// Look up a playbook by id
pub fn get(id: &str) -> Option<&'static Playbook> {
    PLAYBOOKS.iter().find(|p| p.id == id)
}

/// Playbooks applicable to the given incident type
pub fn applicable_to(incident_type: IncidentType) -> Vec<&'static Playbook> {
    PLAYBOOKS
        .iter()
        .filter(|p| p.applicable_issues.contains(&incident_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_closed_and_complete() {
        assert_eq!(all().len(), 9);
        assert!(get("container_restart").is_some());
        assert!(get("made_up").is_none());
    }

    #[test]
    fn container_down_maps_to_restart_first() {
        let applicable = applicable_to(IncidentType::ContainerDown);
        assert_eq!(applicable[0].id, "container_restart");
        assert!(applicable[0].auto_execute);
    }

    #[test]
    fn destructive_playbooks_require_confirmation() {
        for id in ["clear_docker_cache", "restart_systemd_service", "kvm_reset_gpu"] {
            let playbook = get(id).unwrap();
            assert!(playbook.requires_confirmation, "{} must confirm", id);
            assert!(!playbook.auto_execute, "{} must not auto-execute", id);
        }
    }
}
