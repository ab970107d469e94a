//! Sandbox execution engine.
//!
//! This module provides the `SandboxEngine` trait and a Deno-based
//! implementation. Each run writes one self-contained program to a fresh
//! temporary file and executes it with no filesystem or environment access
//! and network access limited to the loopback RPC endpoint.

use async_trait::async_trait;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use codemode_core::config::SandboxSettings;
use codemode_core::{timeout_marker, ExecutionOutcome, ToolGroup};

use crate::program::{assemble_program, rpc_url};

/// How long to wait for output readers after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Sandbox Types
// =============================================================================

/// Configuration for the Deno sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Deno executable (default: "deno" on `PATH`).
    pub deno_path: String,
    /// Wall-clock limit when a run does not specify one.
    pub default_timeout: Duration,
    /// Host environment variables passed through to the child.
    pub pass_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            deno_path: settings.deno_path.clone(),
            default_timeout: Duration::from_millis(settings.timeout_ms),
            pass_env: settings.pass_env.clone(),
        }
    }
}

/// One snippet to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    /// Proxy objects to generate, one per group.
    pub groups: Vec<ToolGroup>,
    /// Address of the loopback RPC server.
    pub rpc_addr: SocketAddr,
    /// Overrides the configured default.
    pub timeout: Option<Duration>,
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox execution backends.
///
/// Every failure (spawn error, timeout, non-zero exit) folds into the
/// returned outcome; there is no separate error channel.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;

    /// Check if the backend can run anything at all.
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Deno Sandbox Implementation
// =============================================================================

/// Deno-based sandbox engine.
///
/// Runs generated programs with:
/// - No prompts, config files, npm or remote imports
/// - Network restricted to the RPC host:port
/// - No filesystem permissions
/// - A cleared environment
/// - Wall-clock timeout enforcement
pub struct DenoSandbox {
    config: SandboxConfig,
}

impl DenoSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The `deno run` invocation for a program file.
    pub fn command(&self, program: &Path, rpc_addr: SocketAddr) -> Command {
        let mut cmd = Command::new(&self.config.deno_path);
        cmd.arg("run")
            .arg("--quiet")
            .arg("--no-prompt")
            .arg("--no-config")
            .arg("--no-npm")
            .arg("--no-remote")
            .arg(format!("--allow-net={}", rpc_addr))
            .arg(program);

        cmd.env_clear();
        for name in &self.config.pass_env {
            if let Ok(value) = std::env::var(name) {
                cmd.env(name, value);
            }
        }
        cmd.env("NO_COLOR", "1");
        cmd
    }
}

impl Default for DenoSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl SandboxEngine for DenoSandbox {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let program = assemble_program(&rpc_url(request.rpc_addr), &request.groups, &request.code);

        let file = match write_program(&program) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(error = %e, "Failed to write sandbox program");
                return ExecutionOutcome::failed(format!("Failed to prepare sandbox program: {}", e));
            }
        };

        let started = Instant::now();
        let outcome = run_with_timeout(self.command(file.path(), request.rpc_addr), timeout).await;
        tracing::debug!(
            success = outcome.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox run finished"
        );

        if let Err(e) = file.close() {
            tracing::debug!(error = %e, "Failed to remove sandbox program");
        }
        outcome
    }

    async fn is_available(&self) -> bool {
        let mut version_check = Command::new(&self.config.deno_path);
        version_check
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        matches!(
            tokio::time::timeout(Duration::from_secs(10), version_check.status()).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

fn write_program(program: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("codemode-")
        .suffix(".ts")
        .tempfile()?;
    file.write_all(program.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Run a command under a wall-clock limit, capturing stdout and stderr
/// interleaved in arrival order.
///
/// On expiry the child is killed and the timeout marker is appended.
pub async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> ExecutionOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to start sandbox process");
            return ExecutionOutcome::failed(format!("Failed to start sandbox process: {}", e));
        }
    };

    let output = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(capture(stdout, output.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(capture(stderr, output.clone()));
    }

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    let (success, timed_out) = match waited {
        Ok(Ok(status)) => (status.success(), false),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to wait for sandbox process");
            (false, false)
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Sandbox run timed out");
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Failed to kill sandbox process");
            }
            (false, true)
        }
    };

    for reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            tracing::debug!("Output reader did not finish in time");
        }
    }

    let mut text = output
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    if timed_out {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&timeout_marker(timeout.as_millis() as u64));
    }

    ExecutionOutcome { success, output: text }
}

fn capture<R>(mut source: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut out) = sink.lock() {
                        out.extend_from_slice(&buf[..n]);
                    }
                }
            }
        }
    })
}

// =============================================================================
// Mock Sandbox (for testing)
// =============================================================================

/// Mock sandbox engine for unit tests.
///
/// Returns scripted outcomes in order and records every request.
#[derive(Default)]
pub struct MockSandbox {
    pub outcomes: Arc<tokio::sync::Mutex<Vec<ExecutionOutcome>>>,
    pub requests: Arc<tokio::sync::Mutex<Vec<ExecutionRequest>>>,
}

impl MockSandbox {
    /// Create a mock sandbox with predefined outcomes.
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Arc::new(tokio::sync::Mutex::new(outcomes)),
            requests: Default::default(),
        }
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        self.requests.lock().await.push(request);
        let mut outcomes = self.outcomes.lock().await;
        if outcomes.is_empty() {
            ExecutionOutcome::succeeded("[mock] executed")
        } else {
            outcomes.remove(0)
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            groups: Vec::new(),
            rpc_addr: "127.0.0.1:9".parse().unwrap(),
            timeout: None,
        }
    }

    #[test]
    fn test_deno_command_flags() {
        let sandbox = DenoSandbox::default();
        let cmd = sandbox.command(Path::new("/tmp/x.ts"), "127.0.0.1:4100".parse().unwrap());
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "deno");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "run",
                "--quiet",
                "--no-prompt",
                "--no-config",
                "--no-npm",
                "--no-remote",
                "--allow-net=127.0.0.1:4100",
                "/tmp/x.ts"
            ]
        );
        assert!(!args.iter().any(|a| a.starts_with("--allow-read") || a == "-A"));

        let envs: Vec<_> = std_cmd
            .get_envs()
            .filter_map(|(k, v)| v.map(|_| k.to_string_lossy().into_owned()))
            .collect();
        assert!(envs.iter().all(|k| ["PATH", "HOME", "DENO_DIR", "NO_COLOR"].contains(&k.as_str())));
        assert!(envs.contains(&"NO_COLOR".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_outcome() {
        let sandbox = DenoSandbox::new(SandboxConfig {
            deno_path: "/nonexistent/deno-binary".to_string(),
            ..Default::default()
        });
        let outcome = sandbox.execute(request("console.log(1)")).await;
        assert!(!outcome.success);
        assert!(outcome.output.contains("Failed to start sandbox process"));
        assert!(!sandbox.is_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_and_marks() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo started; exec sleep 30");

        let started = Instant::now();
        let outcome = run_with_timeout(cmd, Duration::from_millis(300)).await;

        assert!(!outcome.success);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.output.starts_with("started\n"));
        assert!(outcome
            .output
            .ends_with("[Execution terminated after exceeding timeout of 300ms]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_combined_output_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");

        let outcome = run_with_timeout(cmd, Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.output.contains("out\n"));
        assert!(outcome.output.contains("err\n"));

        let mut ok = Command::new("sh");
        ok.arg("-c").arg("printf done");
        let outcome = run_with_timeout(ok, Duration::from_secs(5)).await;
        assert_eq!(outcome, ExecutionOutcome::succeeded("done"));
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let mock = MockSandbox::new(vec![ExecutionOutcome::failed("boom")]);
        assert_eq!(mock.execute(request("a")).await, ExecutionOutcome::failed("boom"));
        assert!(mock.execute(request("b")).await.success);
        assert_eq!(mock.requests.lock().await.len(), 2);
    }
}
