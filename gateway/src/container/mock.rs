//! In-process runtime for local development and tests.
//!
//! Selected with `GATEWAY_MOCK_RUNTIME=true`: no containers are launched and
//! readiness is probed against whatever already listens on the allocated
//! port (or skipped entirely in tests). Keeps the full session lifecycle
//! exercisable on machines without a container runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ContainerRuntime, WorkerSpec};

#[derive(Default)]
pub struct MockRuntime {
    fail_start: AtomicBool,
    pub started: Mutex<Vec<WorkerSpec>>,
    pub stopped: Mutex<Vec<String>>,
    pub log_lines: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_and_start` calls fail, for cleanup-path tests.
    pub fn fail_next_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn stopped_count(&self) -> usize {
        self.stopped.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_and_start(&self, spec: &WorkerSpec) -> anyhow::Result<String> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("mock runtime: start refused");
        }
        self.started.lock().unwrap().push(spec.clone());
        Ok(format!("mock-{}", spec.session_id))
    }

    async fn stop(&self, container_id: &str) -> anyhow::Result<()> {
        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn logs(
        &self,
        _container_id: &str,
        tail: usize,
        _since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<String>> {
        let lines = self.log_lines.lock().unwrap();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].to_vec())
    }
}
