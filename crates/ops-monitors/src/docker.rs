//! Local probe implementations that shell through the safe executor
//!
//! The engine probes its own host the same way it remediates it: every
//! probe command goes through the one validated, rate-limited, audited
//! execution pipeline.

use crate::probes::*;
use async_trait::async_trait;
use chrono::Utc;
use ops_common::{Error, Result};
use ops_executor::{ApprovalToken, ExecOptions, SafeExecutor};
use std::sync::Arc;
use tracing::debug;

const INITIATOR: &str = "monitor";

async fn run(executor: &SafeExecutor, command: &str) -> Result<String> {
    let options = ExecOptions {
        approval: Some(ApprovalToken::new("health-monitor")),
        ..Default::default()
    };
    let record = executor.execute(command, INITIATOR, options).await;
    if record.success {
        Ok(record.stdout)
    } else {
        Err(Error::Collaborator(format!(
            "probe command failed ({}): {}",
            command,
            record.stderr.trim()
        )))
    }
}

/// Container runtime backed by the docker CLI
pub struct DockerCliRuntime {
    executor: Arc<SafeExecutor>,
}

impl DockerCliRuntime {
    pub fn new(executor: Arc<SafeExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let ps = run(&self.executor, "docker ps -a --format '{{json .}}'").await?;
        let mut containers: Vec<ContainerInfo> = ps.lines().filter_map(parse_ps_line).collect();

        // Merge one stats sample into the running containers
        if let Ok(stats) = run(
            &self.executor,
            "docker stats --no-stream --format '{{json .}}'",
        )
        .await
        {
            for line in stats.lines() {
                let Some((name, cpu, mem, limit)) = parse_stats_line(line) else {
                    continue;
                };
                if let Some(container) = containers.iter_mut().find(|c| c.name == name) {
                    container.cpu_percent = Some(cpu);
                    container.memory_percent = Some(mem);
                    container.memory_limit_mb = limit;
                }
            }
        }

        debug!(count = containers.len(), "listed containers");
        Ok(containers)
    }

    async fn start_container(&self, name: &str) -> Result<bool> {
        let command = format!("docker start {}", name);
        match run(&self.executor, &command).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn dangling_images(&self) -> Result<Vec<ImageInfo>> {
        let output = run(
            &self.executor,
            "docker images --filter dangling=true --format '{{json .}}'",
        )
        .await?;
        Ok(output.lines().filter_map(parse_image_line).collect())
    }

    async fn reclaimable_storage_gb(&self) -> Result<f64> {
        let output = run(&self.executor, "docker system df --format '{{json .}}'").await?;
        let mut total = 0.0;
        for line in output.lines() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            let reclaimable = value
                .get("Reclaimable")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            total += parse_leading_gb(reclaimable);
        }
        Ok(total)
    }
}

/// Disk probe backed by `df`
pub struct DfDiskProbe {
    executor: Arc<SafeExecutor>,
    mount: String,
}

impl DfDiskProbe {
    pub fn new(executor: Arc<SafeExecutor>, mount: impl Into<String>) -> Self {
        Self {
            executor,
            mount: mount.into(),
        }
    }
}

#[async_trait]
impl DiskProbe for DfDiskProbe {
    async fn usage(&self) -> Result<DiskUsage> {
        let output = run(&self.executor, &format!("df -h {}", self.mount)).await?;
        parse_df(&output)
            .ok_or_else(|| Error::Collaborator(format!("unparseable df output for {}", self.mount)))
    }
}

/// Network probe backed by `ping` and `nslookup`
pub struct PingNetworkProbe {
    executor: Arc<SafeExecutor>,
    external_address: String,
    known_host: String,
}

impl PingNetworkProbe {
    pub fn new(executor: Arc<SafeExecutor>) -> Self {
        Self {
            executor,
            external_address: "8.8.8.8".to_string(),
            known_host: "google.com".to_string(),
        }
    }
}

#[async_trait]
impl NetworkProbe for PingNetworkProbe {
    async fn ping_external(&self) -> Result<bool> {
        let command = format!("ping -c 1 -W 2 {}", self.external_address);
        Ok(run(&self.executor, &command).await.is_ok())
    }

    async fn resolve_known_host(&self) -> Result<bool> {
        let command = format!("nslookup {}", self.known_host);
        Ok(run(&self.executor, &command).await.is_ok())
    }
}

fn parse_ps_line(line: &str) -> Option<ContainerInfo> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let name = value.get("Names")?.as_str()?.to_string();
    let image = value
        .get("Image")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let state_raw = value.get("State").and_then(|v| v.as_str()).unwrap_or("");
    let status = value.get("Status").and_then(|v| v.as_str()).unwrap_or("");

    let state = match state_raw {
        "running" => ContainerRunState::Running,
        "exited" => ContainerRunState::Exited,
        "dead" => ContainerRunState::Dead,
        "restarting" => ContainerRunState::Restarting,
        "paused" => ContainerRunState::Paused,
        _ => ContainerRunState::Unknown,
    };

    let health = if status.contains("(healthy)") {
        Some("healthy".to_string())
    } else if status.contains("(unhealthy)") {
        Some("unhealthy".to_string())
    } else {
        None
    };

    let ports = value
        .get("Ports")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .split(", ")
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    Some(ContainerInfo {
        name,
        image,
        state,
        health,
        exit_code: parse_exit_code(status),
        restart_count: 0,
        cpu_percent: None,
        memory_percent: None,
        memory_limit_mb: None,
        created_at: None,
        port_bindings: ports,
    })
}

/// Pull the exit code out of a status like "Exited (137) 2 hours ago"
fn parse_exit_code(status: &str) -> Option<i32> {
    let rest = status.strip_prefix("Exited (")?;
    let end = rest.find(')')?;
    rest[..end].parse().ok()
}

fn parse_stats_line(line: &str) -> Option<(String, f64, f64, Option<f64>)> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let name = value.get("Name")?.as_str()?.to_string();
    let cpu = parse_percent(value.get("CPUPerc")?.as_str()?)?;
    let mem = parse_percent(value.get("MemPerc")?.as_str()?)?;
    let limit = value
        .get("MemUsage")
        .and_then(|v| v.as_str())
        .and_then(parse_mem_limit_mb);
    Some((name, cpu, mem, limit))
}

fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse().ok()
}

/// The limit side of "48.2MiB / 512MiB", in MiB
fn parse_mem_limit_mb(usage: &str) -> Option<f64> {
    let limit = usage.split('/').nth(1)?.trim();
    let digits: String = limit
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number: f64 = digits.parse().ok()?;
    let unit = &limit[digits.len()..];
    let mb = match unit {
        u if u.starts_with("GiB") || u.starts_with("GB") => number * 1024.0,
        u if u.starts_with("KiB") || u.starts_with("kB") => number / 1024.0,
        _ => number,
    };
    Some(mb)
}

fn parse_image_line(line: &str) -> Option<ImageInfo> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    Some(ImageInfo {
        id: value.get("ID")?.as_str()?.to_string(),
        size: value
            .get("Size")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        created_at: value
            .get("CreatedAt")
            .and_then(|v| v.as_str())
            .and_then(|raw| {
                // docker prints "2024-01-01 10:00:00 +0000 UTC"; the
                // trailing zone name is redundant with the offset
                let trimmed = raw.trim_end_matches(|c: char| c.is_ascii_alphabetic()).trim();
                chrono::DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S %z")
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
    })
}

/// The leading gigabyte figure of a reclaimable string like "4.5GB (50%)"
fn parse_leading_gb(raw: &str) -> f64 {
    let Some(index) = raw.find("GB") else {
        return 0.0;
    };
    raw[..index].trim().parse().unwrap_or(0.0)
}

fn parse_df(output: &str) -> Option<DiskUsage> {
    let line = output.lines().nth(1)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }
    let usage_percent: f64 = parts[4].trim_end_matches('%').parse().ok()?;
    let available_gb = parse_size_gb(parts[3]);
    Some(DiskUsage {
        usage_percent,
        available_gb,
    })
}

/// Convert a df human size like "12G", "512M" or "1.5T" to GiB
fn parse_size_gb(raw: &str) -> f64 {
    let digits: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number: f64 = digits.parse().unwrap_or(0.0);
    match raw.chars().last() {
        Some('T') => number * 1024.0,
        Some('M') => number / 1024.0,
        Some('K') => number / (1024.0 * 1024.0),
        _ => number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ps_json_line() {
        let line = r#"{"Names":"media-1","Image":"linuxserver/plex:latest","State":"exited","Status":"Exited (137) 2 hours ago","Ports":""}"#;
        let info = parse_ps_line(line).unwrap();
        assert_eq!(info.name, "media-1");
        assert_eq!(info.state, ContainerRunState::Exited);
        assert_eq!(info.exit_code, Some(137));
    }

    #[test]
    fn parses_health_from_status() {
        let line = r#"{"Names":"proxy","Image":"nginx","State":"running","Status":"Up 3 days (unhealthy)","Ports":"0.0.0.0:443->443/tcp"}"#;
        let info = parse_ps_line(line).unwrap();
        assert_eq!(info.health.as_deref(), Some("unhealthy"));
        assert_eq!(info.port_bindings, vec!["0.0.0.0:443->443/tcp"]);
    }

    #[test]
    fn parses_stats_line() {
        let line = r#"{"Name":"media-1","CPUPerc":"12.34%","MemPerc":"45.6%","MemUsage":"230MiB / 512MiB"}"#;
        let (name, cpu, mem, limit) = parse_stats_line(line).unwrap();
        assert_eq!(name, "media-1");
        assert!((cpu - 12.34).abs() < 1e-9);
        assert!((mem - 45.6).abs() < 1e-9);
        assert_eq!(limit, Some(512.0));
    }

    #[test]
    fn parses_df_output() {
        let output = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/sda1       100G   85G   15G  85% /\n";
        let usage = parse_df(output).unwrap();
        assert!((usage.usage_percent - 85.0).abs() < 1e-9);
        assert!((usage.available_gb - 15.0).abs() < 1e-9);
    }

    #[test]
    fn parses_reclaimable_storage() {
        assert!((parse_leading_gb("4.5GB (50%)") - 4.5).abs() < 1e-9);
        assert_eq!(parse_leading_gb("120MB (10%)"), 0.0);
    }

    #[test]
    fn parses_memory_limits_in_gib() {
        assert_eq!(parse_mem_limit_mb("1.2GiB / 2GiB"), Some(2048.0));
    }
}
