//! Collaborator contracts the monitor loops probe through
//!
//! Each trait models one external surface: the container runtime, the
//! database, the network, local disks, a vulnerability scanner, the
//! certificate inventory and the authentication audit log. All calls may
//! block on I/O; callers bound them with a deadline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::Result;
use serde::{Deserialize, Serialize};

/// Coarse container run state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRunState {
    Running,
    Exited,
    Dead,
    Restarting,
    Paused,
    Unknown,
}

/// Snapshot of one container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub state: ContainerRunState,
    /// Runtime health status when a healthcheck is configured
    pub health: Option<String>,
    pub exit_code: Option<i32>,
    pub restart_count: u32,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_limit_mb: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    /// Host-side bindings, e.g. "0.0.0.0:8080->80/tcp"
    pub port_bindings: Vec<String>,
}

/// A dangling or otherwise unused image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub size: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Container runtime collaborator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Attempt to start a stopped container; returns whether it started
    async fn start_container(&self, name: &str) -> Result<bool>;

    async fn dangling_images(&self) -> Result<Vec<ImageInfo>>;

    /// Estimated reclaimable storage in GiB
    async fn reclaimable_storage_gb(&self) -> Result<f64>;
}

/// A query running longer than the long-query threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongRunningQuery {
    pub pid: i64,
    pub duration_seconds: f64,
    pub query: String,
}

/// A statement with high mean execution time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub query: String,
    pub calls: u64,
    pub mean_time_ms: f64,
    pub total_time_ms: f64,
}

/// A sizeable table with no index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnindexedTable {
    pub schema: String,
    pub table: String,
    pub size: String,
}

/// Database collaborator
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// Trivial round-trip
    async fn ping(&self) -> Result<bool>;

    /// Queries active longer than five minutes; empty when not permitted
    async fn long_running_queries(&self) -> Result<Vec<LongRunningQuery>>;

    /// Whether statement statistics are available
    fn supports_statistics(&self) -> bool {
        false
    }

    /// Statements with mean execution time over one second
    async fn slow_queries(&self) -> Result<Vec<SlowQuery>>;

    async fn unindexed_tables(&self) -> Result<Vec<UnindexedTable>>;
}

/// Network collaborator
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Reachability of a known external address
    async fn ping_external(&self) -> Result<bool>;

    /// Resolution of a known hostname
    async fn resolve_known_host(&self) -> Result<bool>;
}

/// Disk usage snapshot for a mount
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskUsage {
    pub usage_percent: f64,
    pub available_gb: f64,
}

/// Disk collaborator
#[async_trait]
pub trait DiskProbe: Send + Sync {
    async fn usage(&self) -> Result<DiskUsage>;
}

/// One known vulnerability in an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub severity: String,
    pub package: String,
    pub fixed_version: Option<String>,
}

/// Outcome of scanning one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// The scanner ran; the list may be empty
    Vulnerabilities(Vec<Vulnerability>),
    /// No scanner is installed; callers fall back to heuristics
    Unavailable,
}

/// External vulnerability scanner collaborator
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    async fn scan_image(&self, image: &str) -> Result<ScanOutcome>;
}

/// One tracked certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
}

/// Certificate inventory collaborator
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn certificates(&self) -> Result<Vec<CertificateRecord>>;
}

/// Failed logins grouped per user and source over the last hour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedLoginGroup {
    pub username: String,
    pub source: String,
    pub attempts: u32,
    pub last_seen: DateTime<Utc>,
}

/// Authentication audit collaborator
#[async_trait]
pub trait AuthAuditSource: Send + Sync {
    async fn failed_logins_last_hour(&self) -> Result<Vec<FailedLoginGroup>>;
}
