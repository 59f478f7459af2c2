//! Container driver: a thin wrapper over the host container runtime.
//!
//! Workers are launched through the `docker` CLI. The fixed contract: the
//! image runs a dev server on TCP 4173 serving `/app`, the session work
//! directory is bind-mounted there read-write, and the container removes
//! itself on stop. Everything is best-effort and tolerant of repeats:
//! "no such container" during stop means the goal is already met.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info};

pub mod mock;

pub use mock::MockRuntime;

/// Port the dev server listens on inside every worker container.
pub const WORKER_INTERNAL_PORT: u16 = 4173;

/// Everything needed to launch one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub session_id: String,
    pub image: String,
    /// Host port the container's dev-server port is bound to.
    pub host_port: u16,
    pub workdir: PathBuf,
    pub network: String,
    pub memory_mib: u64,
    pub cpu_percent: u64,
    /// 0 disables the storage quota flag.
    pub disk_mib: u64,
    pub dns: Option<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a worker; returns the runtime-assigned container id.
    async fn create_and_start(&self, spec: &WorkerSpec) -> anyhow::Result<String>;

    /// Graceful stop (5 s) followed by the runtime's forceful kill. Absence
    /// of the container is success.
    async fn stop(&self, container_id: &str) -> anyhow::Result<()>;

    /// Most recent `tail` lines of combined stdout/stderr, optionally only
    /// those after `since`.
    async fn logs(
        &self,
        container_id: &str,
        tail: usize,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<String>>;
}

pub struct DockerDriver;

impl DockerDriver {
    pub fn new() -> Self {
        Self
    }

    /// Full `docker run` argument list for a worker. Pure so the flag set is
    /// testable without a daemon.
    pub fn run_args(spec: &WorkerSpec, created_at: DateTime<Utc>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-d".into(),
            "--name".into(),
            format!("greenroom-{}", spec.session_id),
            // Workers are only reachable through the gateway's proxy.
            "-p".into(),
            format!("127.0.0.1:{}:{}", spec.host_port, WORKER_INTERNAL_PORT),
            "-v".into(),
            format!("{}:/app:rw", spec.workdir.display()),
        ];

        // Resource envelope. Swap is pinned to the memory cap so the worker
        // cannot spill past it; the soft reservation sits at half the cap.
        args.extend([
            "--memory".into(),
            format!("{}m", spec.memory_mib),
            "--memory-swap".into(),
            format!("{}m", spec.memory_mib),
            "--memory-reservation".into(),
            format!("{}m", spec.memory_mib / 2),
            "--cpu-period".into(),
            "100000".into(),
            "--cpu-quota".into(),
            format!("{}", spec.cpu_percent * 1000),
            "--cpu-shares".into(),
            "256".into(),
            "--pids-limit".into(),
            "64".into(),
            "--blkio-weight".into(),
            "300".into(),
        ]);
        if spec.disk_mib > 0 {
            args.extend([
                "--storage-opt".into(),
                format!("size={}m", spec.disk_mib),
            ]);
        }

        // Security profile: minimal capabilities, the dev server still needs
        // a writable root.
        args.extend([
            "--cap-drop".into(),
            "ALL".into(),
            "--cap-add".into(),
            "CHOWN".into(),
            "--cap-add".into(),
            "SETUID".into(),
            "--cap-add".into(),
            "SETGID".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--oom-kill-disable=false".into(),
            "--network".into(),
            spec.network.clone(),
        ]);
        if let Some(dns) = &spec.dns {
            args.extend(["--dns".into(), dns.clone()]);
        }

        args.extend([
            "-e".into(),
            format!("GREENROOM_SESSION_ID={}", spec.session_id),
            "-e".into(),
            "VITE_TELEMETRY_DISABLED=1".into(),
            "-e".into(),
            "NPM_CONFIG_OFFLINE=true".into(),
        ]);

        // Labels for external reconciliation of leaked containers.
        args.extend([
            "-l".into(),
            format!("greenroom.session={}", spec.session_id),
            "-l".into(),
            "greenroom.service=greenroom-gateway".into(),
            "-l".into(),
            format!("greenroom.created={}", created_at.to_rfc3339()),
        ]);

        args.extend([
            "--health-cmd".into(),
            format!("curl -sf http://localhost:{WORKER_INTERNAL_PORT}/ || exit 1"),
            "--health-interval".into(),
            "10s".into(),
            "--health-timeout".into(),
            "5s".into(),
            "--health-retries".into(),
            "3".into(),
            "--health-start-period".into(),
            "30s".into(),
        ]);

        args.push(spec.image.clone());
        args
    }
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_missing_container(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    lowered.contains("no such container") || lowered.contains("is not running")
}

#[async_trait]
impl ContainerRuntime for DockerDriver {
    async fn create_and_start(&self, spec: &WorkerSpec) -> anyhow::Result<String> {
        let args = Self::run_args(spec, Utc::now());
        let output = Command::new("docker").args(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker run failed: {}", stderr.trim());
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            anyhow::bail!("docker run returned no container id");
        }
        info!(
            session_id = %spec.session_id,
            container_id = %container_id,
            port = spec.host_port,
            "worker container started"
        );
        Ok(container_id)
    }

    async fn stop(&self, container_id: &str) -> anyhow::Result<()> {
        let output = Command::new("docker")
            .args(["stop", "-t", "5", container_id])
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                debug!(container_id, "container already gone on stop");
                return Ok(());
            }
            anyhow::bail!("docker stop failed: {}", stderr.trim());
        }
        info!(container_id, "worker container stopped");
        Ok(())
    }

    async fn logs(
        &self,
        container_id: &str,
        tail: usize,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<String>> {
        let tail_arg = tail.to_string();
        // --timestamps lets the two capture streams be merged back into the
        // order the dev server actually wrote them.
        let mut args = vec!["logs", "--timestamps", "--tail", tail_arg.as_str()];
        let since_arg;
        if let Some(since) = since {
            since_arg = since.to_rfc3339();
            args.extend(["--since", since_arg.as_str()]);
        }
        args.push(container_id);

        let output = Command::new("docker").args(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Ok(vec![]);
            }
            anyhow::bail!("docker logs failed: {}", stderr.trim());
        }

        Ok(merge_stamped(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// Merge the stdout and stderr capture streams into one chronological log.
/// Docker's RFC3339Nano prefixes are fixed-width, so a lexicographic sort is
/// a time sort; the prefix is stripped from the returned lines.
fn merge_stamped(stdout: &str, stderr: &str) -> Vec<String> {
    let mut stamped: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    stamped.sort();
    stamped
        .into_iter()
        .map(|line| match line.split_once(' ') {
            Some((_, rest)) => rest.to_string(),
            None => line.to_string(),
        })
        .collect()
}
