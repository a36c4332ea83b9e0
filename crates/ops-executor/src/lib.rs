//! Safe command execution for the ops engine
//!
//! The safe executor is the single choke point for live execution: every
//! command is validated, rate limited and audited before a subprocess is
//! started, and every call emits exactly one audit record regardless of
//! outcome. The executor is thread-safe and runs each execution on the
//! caller's task; there is no internal worker pool.

pub mod audit;

pub use audit::{AuditRecord, AuditSink, FileAuditSink, MemoryAuditSink};

use chrono::{DateTime, Utc};
use metrics::counter;
use ops_common::ExecutorConfig;
use ops_validator::{CommandRisk, CommandValidator, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a terminated subprocess gets to exit before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Execution mode recorded on every result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Execute,
    ApprovalRequired,
}

/// Evidence that a human or the policy engine approved this execution
#[derive(Debug, Clone)]
pub struct ApprovalToken {
    pub granted_by: String,
}

impl ApprovalToken {
    pub fn new(granted_by: impl Into<String>) -> Self {
        Self {
            granted_by: granted_by.into(),
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub approval: Option<ApprovalToken>,
    pub cancel: CancellationToken,
}

/// Structured result of one executor call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub command: String,
    pub initiator: String,
    pub mode: ExecutionMode,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub risk: CommandRisk,
    pub requires_approval: bool,
    pub validator_message: String,
}

impl ExecutionRecord {
    /// True when the call was aborted by the caller's cancellation signal.
    /// Cancellation is not a failure of the remote operation and must not
    /// feed circuit-breaker state.
    pub fn was_cancelled(&self) -> bool {
        self.validator_message == "cancelled"
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
    WaitError(std::io::Error),
}

/// Rate-limited subprocess runner with an audit trail
pub struct SafeExecutor {
    validator: Arc<CommandValidator>,
    config: ExecutorConfig,
    sink: Arc<dyn AuditSink>,
    window: parking_lot::Mutex<Vec<Instant>>,
}

impl SafeExecutor {
    pub fn new(
        validator: Arc<CommandValidator>,
        config: ExecutorConfig,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator,
            config,
            sink,
            window: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Classify a command without running it
    pub fn validate(&self, command: &str) -> Verdict {
        self.validator.validate(command)
    }

    /// Validate only; no subprocess is started
    pub async fn dry_run(&self, command: &str, initiator: &str) -> ExecutionRecord {
        let started_at = Utc::now();
        let start = Instant::now();
        let verdict = self.validator.validate(command);

        let record = ExecutionRecord {
            command: command.to_string(),
            initiator: initiator.to_string(),
            mode: ExecutionMode::DryRun,
            success: verdict.allowed,
            exit_code: Some(if verdict.allowed { 0 } else { 1 }),
            stdout: format!("[DRY RUN] Command validation: {}", verdict.matched_rule),
            stderr: if verdict.allowed {
                String::new()
            } else {
                format!("VALIDATION FAILED: {}", verdict.matched_rule)
            },
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            risk: verdict.risk,
            requires_approval: verdict.requires_approval,
            validator_message: verdict.matched_rule,
        };

        audit::emit(self.sink.as_ref(), &record).await;
        info!(command, allowed = record.success, risk = %record.risk, "dry run");
        record
    }

    /// Execute a command with validation, rate limiting and a bounded
    /// lifetime. Emits exactly one audit record whatever happens.
    pub async fn execute(&self, command: &str, initiator: &str, options: ExecOptions) -> ExecutionRecord {
        let started_at = Utc::now();
        let start = Instant::now();
        let verdict = self.validator.validate(command);

        if !verdict.allowed {
            counter!("ops_executor_blocked_total").increment(1);
            let record = self.refusal(
                command,
                initiator,
                ExecutionMode::Execute,
                &verdict,
                format!("Command blocked by safety policy: {}", verdict.matched_rule),
                started_at,
                start,
            );
            audit::emit(self.sink.as_ref(), &record).await;
            warn!(command, reason = %verdict.matched_rule, "blocked command execution");
            return record;
        }

        if let Some(reason) = self.check_rate_limit() {
            counter!("ops_executor_rate_limited_total").increment(1);
            let mut record = self.refusal(
                command,
                initiator,
                ExecutionMode::Execute,
                &verdict,
                reason.clone(),
                started_at,
                start,
            );
            record.validator_message = reason;
            audit::emit(self.sink.as_ref(), &record).await;
            warn!(command, initiator, "execution rate limit exceeded");
            return record;
        }

        if verdict.requires_approval && options.approval.is_none() {
            let record = ExecutionRecord {
                command: command.to_string(),
                initiator: initiator.to_string(),
                mode: ExecutionMode::ApprovalRequired,
                success: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "This command requires approval before execution".to_string(),
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
                risk: verdict.risk,
                requires_approval: true,
                validator_message: "Approval required".to_string(),
            };
            audit::emit(self.sink.as_ref(), &record).await;
            info!(command, "command requires approval");
            return record;
        }

        self.window.lock().push(Instant::now());

        let timeout = options.timeout.unwrap_or(Duration::from_secs(self.config.default_timeout_seconds));
        let record = self
            .run_subprocess(command, initiator, &verdict, timeout, &options, started_at, start)
            .await;

        counter!("ops_executor_executions_total").increment(1);
        audit::emit(self.sink.as_ref(), &record).await;
        info!(
            command,
            exit_code = ?record.exit_code,
            success = record.success,
            duration_ms = record.duration_ms,
            "executed command"
        );
        record
    }

    fn refusal(
        &self,
        command: &str,
        initiator: &str,
        mode: ExecutionMode,
        verdict: &Verdict,
        stderr: String,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> ExecutionRecord {
        ExecutionRecord {
            command: command.to_string(),
            initiator: initiator.to_string(),
            mode,
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            risk: verdict.risk,
            requires_approval: verdict.requires_approval,
            validator_message: verdict.matched_rule.clone(),
        }
    }

    /// Sliding 60-second window over subprocess start timestamps,
    /// local to this executor instance.
    fn check_rate_limit(&self) -> Option<String> {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if window.len() >= self.config.max_executions_per_minute {
            Some(format!(
                "Rate limit exceeded: {} executions per minute",
                self.config.max_executions_per_minute
            ))
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subprocess(
        &self,
        command: &str,
        initiator: &str,
        verdict: &Verdict,
        timeout: Duration,
        options: &ExecOptions,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> ExecutionRecord {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env) = &options.env {
            cmd.envs(env);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionRecord {
                    command: command.to_string(),
                    initiator: initiator.to_string(),
                    mode: ExecutionMode::Execute,
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Execution error: {}", e),
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                    risk: verdict.risk,
                    requires_approval: verdict.requires_approval,
                    validator_message: format!("Error: {}", e),
                };
            }
        };

        let stdout_task = child.stdout.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::WaitError(e),
            },
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = options.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        if matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Cancelled) {
            terminate(&mut child).await;
        }

        let stdout = collect_pipe(stdout_task).await;
        let stderr = collect_pipe(stderr_task).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            WaitOutcome::Exited(status) => ExecutionRecord {
                command: command.to_string(),
                initiator: initiator.to_string(),
                mode: ExecutionMode::Execute,
                success: status.success(),
                exit_code: status.code(),
                stdout,
                stderr,
                started_at,
                duration_ms,
                risk: verdict.risk,
                requires_approval: verdict.requires_approval,
                validator_message: verdict.matched_rule.clone(),
            },
            WaitOutcome::TimedOut => ExecutionRecord {
                command: command.to_string(),
                initiator: initiator.to_string(),
                mode: ExecutionMode::Execute,
                success: false,
                exit_code: Some(124),
                stdout,
                stderr: format!("Timed out after {} seconds", timeout.as_secs()),
                started_at,
                duration_ms,
                risk: verdict.risk,
                requires_approval: verdict.requires_approval,
                validator_message: format!("Timeout after {}s", timeout.as_secs()),
            },
            WaitOutcome::Cancelled => ExecutionRecord {
                command: command.to_string(),
                initiator: initiator.to_string(),
                mode: ExecutionMode::Execute,
                success: false,
                exit_code: None,
                stdout,
                stderr: "cancelled".to_string(),
                started_at,
                duration_ms,
                risk: verdict.risk,
                requires_approval: verdict.requires_approval,
                validator_message: "cancelled".to_string(),
            },
            WaitOutcome::WaitError(e) => ExecutionRecord {
                command: command.to_string(),
                initiator: initiator.to_string(),
                mode: ExecutionMode::Execute,
                success: false,
                exit_code: None,
                stdout,
                stderr: format!("Execution error: {}", e),
                started_at,
                duration_ms,
                risk: verdict.risk,
                requires_approval: verdict.requires_approval,
                validator_message: format!("Error: {}", e),
            },
        }
    }
}

/// SIGTERM first, then SIGKILL after a short grace period
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

async fn collect_pipe(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(handle) => match handle.await {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_common::ExecutorConfig;

    fn executor_with_sink(limit: usize) -> (SafeExecutor, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let config = ExecutorConfig {
            default_timeout_seconds: 5,
            max_executions_per_minute: limit,
            audit_log_path: "/tmp/unused-audit.log".into(),
        };
        let validator = Arc::new(CommandValidator::new().unwrap());
        (
            SafeExecutor::new(validator, config, sink.clone()),
            sink,
        )
    }

    #[tokio::test]
    async fn executes_safe_command_and_audits_once() {
        let (executor, sink) = executor_with_sink(10);
        let record = executor
            .execute("echo hello", "test", ExecOptions::default())
            .await;

        assert!(record.success);
        assert_eq!(record.exit_code, Some(0));
        assert!(record.stdout.contains("hello"));
        assert_eq!(record.mode, ExecutionMode::Execute);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn blocked_command_never_spawns_and_audits_once() {
        let (executor, sink) = executor_with_sink(10);
        let record = executor
            .execute("rm -rf /", "test", ExecOptions::default())
            .await;

        assert!(!record.success);
        assert_eq!(record.risk, CommandRisk::Forbidden);
        assert!(record.stderr.contains("blocked by safety policy"));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn dry_run_starts_no_process_but_audits() {
        let (executor, sink) = executor_with_sink(10);
        let record = executor.dry_run("docker ps -a", "test").await;

        assert!(record.success);
        assert_eq!(record.mode, ExecutionMode::DryRun);
        assert!(record.stdout.contains("[DRY RUN]"));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn approval_required_without_token_bounces() {
        let (executor, sink) = executor_with_sink(10);
        let record = executor
            .execute("docker restart api", "test", ExecOptions::default())
            .await;

        assert!(!record.success);
        assert_eq!(record.mode, ExecutionMode::ApprovalRequired);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn approval_token_lets_gated_command_run() {
        let (executor, _sink) = executor_with_sink(10);
        // `docker restart` requires approval but docker is absent in the
        // test environment; the point is that the executor attempts it.
        let options = ExecOptions {
            approval: Some(ApprovalToken::new("operator")),
            ..Default::default()
        };
        let record = executor.execute("docker restart api", "test", options).await;
        assert_eq!(record.mode, ExecutionMode::Execute);
    }

    #[tokio::test]
    async fn rate_limit_refuses_after_window_fills() {
        let (executor, sink) = executor_with_sink(1);
        let first = executor
            .execute("echo one", "test", ExecOptions::default())
            .await;
        let second = executor
            .execute("echo two", "test", ExecOptions::default())
            .await;

        assert!(first.success);
        assert!(!second.success);
        assert!(second.stderr.contains("Rate limit exceeded"));
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_124() {
        let (executor, _sink) = executor_with_sink(10);
        let options = ExecOptions {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let record = executor
            .execute("tail -f /dev/null", "test", options)
            .await;

        assert!(!record.success);
        assert_eq!(record.exit_code, Some(124));
        assert!(record.stderr.contains("Timed out after"));
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure_of_the_command() {
        let (executor, sink) = executor_with_sink(10);
        let cancel = CancellationToken::new();
        let options = ExecOptions {
            cancel: cancel.clone(),
            ..Default::default()
        };

        let handle = tokio::spawn(async move {
            executor.execute("tail -f /dev/null", "test", options).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let record = handle.await.unwrap();
        assert!(!record.success);
        assert!(record.was_cancelled());
        assert_eq!(sink.len(), 1);
    }
}
