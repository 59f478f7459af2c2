//! Session manager: owns the live-session map, the port pool, and the
//! container/workdir lifecycle.
//!
//! Locking model: the map itself (`DashMap`) is only touched for insert,
//! remove, and handle lookup. All mutation happens under a per-session
//! `tokio::sync::Mutex`, so container and file I/O never block unrelated
//! sessions and never hold a map shard.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use shared_types::{HubEvent, SessionStatus, SessionSummary};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::container::{ContainerRuntime, WorkerSpec};
use crate::error::GatewayError;
use crate::events::EventHub;

pub mod ports;
pub mod templates;
pub mod workdir;

use ports::PortAllocator;

/// Identity that created a session. Immutable for the session's lifetime;
/// evaluated on every access.
#[derive(Debug, Clone)]
pub struct Owner {
    pub user_id: String,
    pub org_id: Option<String>,
    pub email: Option<String>,
}

pub struct Session {
    pub id: String,
    pub project_id: String,
    pub owner: Owner,
    pub container_id: Option<String>,
    pub port: Option<u16>,
    pub iframe_url: String,
    /// Normalized path → content, the worker's view of the project.
    pub files: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub logs: VecDeque<String>,
    pub error: Option<String>,
    pub status: SessionStatus,
    pub workdir: PathBuf,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            iframe_url: self.iframe_url.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// 128-bit opaque session token, hex-encoded.
fn mint_token() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

pub struct SessionManager {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
    hub: Arc<EventHub>,
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    ports: PortAllocator,
    /// Serializes admission (cap check + port grab + map insert) so
    /// concurrent creates cannot overshoot the session cap.
    admission: Mutex<()>,
    probe: reqwest::Client,
}

impl SessionManager {
    pub fn new(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        hub: Arc<EventHub>,
    ) -> anyhow::Result<Arc<Self>> {
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Arc::new(Self {
            ports: PortAllocator::new(config.port_range_start, config.port_range_end),
            config,
            runtime,
            hub,
            sessions: DashMap::new(),
            admission: Mutex::new(()),
            probe,
        }))
    }

    /// Sessions currently holding resources. Entries are removed at
    /// `stopped`, so map size is the live count.
    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn ports_in_use(&self) -> usize {
        self.ports.in_use()
    }

    fn handle(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn set_status(&self, session: &mut Session, next: SessionStatus) {
        if !session.status.may_advance_to(next) {
            // A skipped transition is a bug in the caller; the machine state
            // stays as-is rather than entering an undefined path.
            error!(
                session_id = %session.id,
                from = %session.status,
                to = %next,
                "illegal status transition ignored"
            );
            return;
        }
        session.status = next;
        self.hub.broadcast(
            &session.id,
            HubEvent::SessionStatus {
                session_id: session.id.clone(),
                status: next,
                error: session.error.clone(),
            },
        );
    }

    /// Create a session: allocate a port, materialize files, launch the
    /// worker, wait for readiness. Fully unwound on any failure.
    pub async fn create(
        &self,
        owner: Owner,
        project_id: String,
        files: HashMap<String, String>,
    ) -> Result<SessionSummary, GatewayError> {
        // Validate the file map before allocating anything: a 400 must not
        // consume a port or touch the container runtime.
        let mut normalized = HashMap::with_capacity(files.len());
        for (path, content) in files {
            normalized.insert(workdir::normalize_path(&path)?, content);
        }
        templates::apply_scaffold(&mut normalized, &project_id);

        let id = mint_token();
        let (port, handle) = {
            let _admission = self.admission.lock().await;
            if self.live_count() >= self.config.max_sessions {
                return Err(GatewayError::MaxSessions);
            }
            let port = self.ports.allocate().ok_or(GatewayError::NoPorts)?;
            let now = Utc::now();
            let session = Session {
                iframe_url: format!(
                    "{}/preview/{}",
                    self.config.public_url.trim_end_matches('/'),
                    id
                ),
                workdir: self.config.work_root.join(&id),
                id: id.clone(),
                project_id,
                owner,
                container_id: None,
                port: Some(port),
                files: normalized,
                created_at: now,
                last_activity_at: now,
                logs: VecDeque::new(),
                error: None,
                status: SessionStatus::Pending,
            };
            let handle = Arc::new(Mutex::new(session));
            self.sessions.insert(id.clone(), Arc::clone(&handle));
            (port, handle)
        };

        let mut session = handle.lock().await;
        match self.start_worker(&mut session, port).await {
            Ok(()) => {
                info!(session_id = %id, port, "session running");
                Ok(session.summary())
            }
            Err(cause) => {
                session.error = Some(cause.clone());
                self.set_status(&mut session, SessionStatus::Error);
                self.set_status(&mut session, SessionStatus::Stopping);
                self.cleanup(&mut session).await;
                self.set_status(&mut session, SessionStatus::Stopped);
                drop(session);
                self.sessions.remove(&id);
                Err(GatewayError::StartFailed(cause))
            }
        }
    }

    /// Steps 3–6 of the create pipeline. Returns a user-safe cause on
    /// failure; the underlying error goes to the log only.
    async fn start_worker(&self, session: &mut Session, port: u16) -> Result<(), String> {
        if let Err(e) = workdir::materialize(&session.workdir, &session.files).await {
            warn!(session_id = %session.id, "workdir materialization failed: {e}");
            return Err("failed to write project files".to_string());
        }

        self.set_status(session, SessionStatus::Starting);

        let spec = WorkerSpec {
            session_id: session.id.clone(),
            image: self.config.worker_image.clone(),
            host_port: port,
            workdir: session.workdir.clone(),
            network: self.config.container_network.clone(),
            memory_mib: self.config.container_memory_mib,
            cpu_percent: self.config.container_cpu_percent,
            disk_mib: self.config.container_disk_mib,
            dns: self.config.container_dns.clone(),
        };
        match self.runtime.create_and_start(&spec).await {
            Ok(container_id) => session.container_id = Some(container_id),
            Err(e) => {
                warn!(session_id = %session.id, "container start failed: {e}");
                return Err("container failed to start".to_string());
            }
        }

        if !self.wait_ready(port).await {
            warn!(session_id = %session.id, port, "worker readiness timed out");
            return Err("container failed to become ready".to_string());
        }

        self.set_status(session, SessionStatus::Running);
        Ok(())
    }

    /// Poll the worker until it answers HTTP. Any status ≤ 500 counts as
    /// ready: a 404 just means the dev server's routing is not configured
    /// yet, the process itself is up.
    async fn wait_ready(&self, port: u16) -> bool {
        if self.config.mock_runtime {
            return true;
        }
        let url = format!("http://127.0.0.1:{port}/");
        let deadline = tokio::time::Instant::now() + self.config.ready_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            match self.probe.get(&url).send().await {
                Ok(res) if res.status().as_u16() <= 500 => return true,
                _ => tokio::time::sleep(Duration::from_millis(250)).await,
            }
        }
    }

    /// Best-effort resource teardown. Each step tolerates absence so the
    /// path can run more than once per session.
    async fn cleanup(&self, session: &mut Session) {
        if let Some(container_id) = session.container_id.take() {
            if let Err(e) = self.runtime.stop(&container_id).await {
                debug!(%container_id, "container stop during cleanup: {e}");
            }
        }
        if let Some(port) = session.port.take() {
            self.ports.release(port);
        }
        workdir::remove(&session.workdir).await;
    }

    /// Stop a session and reclaim its resources. Unknown ids and repeated
    /// stops succeed quietly; callers race the reaper all the time.
    pub async fn stop(&self, id: &str) -> Result<(), GatewayError> {
        let Some(handle) = self.handle(id) else {
            return Ok(());
        };
        let mut session = handle.lock().await;
        if matches!(
            session.status,
            SessionStatus::Stopping | SessionStatus::Stopped
        ) {
            return Ok(());
        }
        self.set_status(&mut session, SessionStatus::Stopping);
        self.cleanup(&mut session).await;
        self.set_status(&mut session, SessionStatus::Stopped);
        info!(session_id = %id, "session stopped");
        drop(session);
        self.sessions.remove(id);
        Ok(())
    }

    /// Write one file into a running session. The worker's own file watcher
    /// picks the change up and fires HMR; the gateway never synthesizes HMR
    /// messages.
    pub async fn patch_file(
        &self,
        id: &str,
        path: &str,
        content: String,
    ) -> Result<(), GatewayError> {
        let handle = self.handle(id).ok_or(GatewayError::NotFound("session"))?;
        let mut session = handle.lock().await;
        if session.status != SessionStatus::Running {
            return Err(GatewayError::Conflict(format!(
                "session is {}",
                session.status
            )));
        }
        let relative = workdir::normalize_path(path)?;
        workdir::write_file(&session.workdir, &relative, &content)
            .await
            .map_err(GatewayError::Internal)?;
        session.files.insert(relative, content);
        session.touch();
        Ok(())
    }

    /// Tail the worker's combined output, refreshing the session's ring.
    /// Without a container handle (or when the runtime balks) the ring is
    /// served as-is.
    pub async fn logs(
        &self,
        id: &str,
        since: Option<DateTime<Utc>>,
        tail: usize,
    ) -> Result<Vec<String>, GatewayError> {
        let handle = self.handle(id).ok_or(GatewayError::NotFound("session"))?;
        let mut session = handle.lock().await;
        let Some(container_id) = session.container_id.clone() else {
            return Ok(session.logs.iter().cloned().collect());
        };
        match self.runtime.logs(&container_id, tail, since).await {
            Ok(lines) => {
                session.logs.clear();
                for line in &lines {
                    if session.logs.len() == self.config.log_ring_cap {
                        session.logs.pop_front();
                    }
                    session.logs.push_back(line.clone());
                    self.hub.broadcast(
                        &session.id,
                        HubEvent::SessionLog {
                            session_id: session.id.clone(),
                            line: line.clone(),
                        },
                    );
                }
                Ok(lines)
            }
            Err(e) => {
                warn!(session_id = %id, "log fetch failed, serving ring: {e}");
                Ok(session.logs.iter().cloned().collect())
            }
        }
    }

    /// Activity keep-alive. Returns false for unknown sessions.
    pub async fn ping(&self, id: &str) -> bool {
        match self.handle(id) {
            Some(handle) => {
                handle.lock().await.touch();
                true
            }
            None => false,
        }
    }

    /// Proxy-side port resolution. Deliberately does not require `running`:
    /// a `starting` session with an open port may already receive traffic.
    pub async fn port_of(&self, id: &str) -> Option<u16> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.touch();
        session.port
    }

    pub async fn owner_of(&self, id: &str) -> Option<Owner> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        Some(session.owner.clone())
    }

    pub async fn summary_of(&self, id: &str) -> Option<SessionSummary> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        Some(session.summary())
    }

    pub async fn list_for(&self, user_id: &str) -> Vec<SessionSummary> {
        let handles: Vec<Arc<Mutex<Session>>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut summaries = Vec::new();
        for handle in handles {
            let session = handle.lock().await;
            if session.owner.user_id == user_id {
                summaries.push(session.summary());
            }
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// One reaper sweep: stop every running session idle past the timeout.
    pub async fn reap(&self, now: DateTime<Utc>) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let Some(handle) = self.handle(&id) else {
                continue;
            };
            let stale = {
                let session = handle.lock().await;
                session.status == SessionStatus::Running
                    && now
                        .signed_duration_since(session.last_activity_at)
                        .to_std()
                        .map(|idle| idle > self.config.session_timeout)
                        .unwrap_or(false)
            };
            if stale {
                warn!(session_id = %id, "session idle timeout, stopping");
                if let Err(e) = self.stop(&id).await {
                    warn!(session_id = %id, "idle reap failed: {e}");
                }
            }
        }
    }

    /// Background task: periodic idle reaping.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.reap_interval);
        interval.tick().await; // first tick is immediate; skip it
        loop {
            interval.tick().await;
            self.reap(Utc::now()).await;
        }
    }

    /// Shutdown path: reclaim every container and port before exit.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(session_id = %id, "stop during shutdown failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MockRuntime;

    fn test_config(work_root: PathBuf) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            public_url: "http://localhost:8787".into(),
            cors_origins: vec![],
            max_body_bytes: 1024 * 1024,
            rate_limit_per_minute: 100,
            max_sessions: 4,
            session_timeout: Duration::from_millis(200),
            reap_interval: Duration::from_millis(50),
            port_range_start: 4300,
            port_range_end: 4302,
            work_root,
            worker_image: "greenroom/worker:latest".into(),
            container_network: "greenroom-net".into(),
            container_memory_mib: 256,
            container_cpu_percent: 25,
            container_disk_mib: 0,
            container_dns: None,
            ready_timeout: Duration::from_millis(100),
            log_ring_cap: 8,
            policy_api_url: "http://localhost:9400".into(),
            policy_service_key: None,
            dev_allow_anonymous: true,
            mock_runtime: true,
        }
    }

    struct Fixture {
        manager: Arc<SessionManager>,
        runtime: Arc<MockRuntime>,
        _root: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path().to_path_buf());
        tweak(&mut config);
        let runtime = Arc::new(MockRuntime::new());
        let hub = Arc::new(EventHub::new());
        let manager =
            SessionManager::new(config, Arc::clone(&runtime) as Arc<dyn ContainerRuntime>, hub)
                .unwrap();
        Fixture {
            manager,
            runtime,
            _root: root,
        }
    }

    fn owner(user: &str) -> Owner {
        Owner {
            user_id: user.into(),
            org_id: None,
            email: None,
        }
    }

    fn one_file() -> HashMap<String, String> {
        let mut files = HashMap::new();
        files.insert("src/app.ts".to_string(), "export const x = 1".to_string());
        files
    }

    #[tokio::test]
    async fn create_reaches_running_and_materializes_scaffold() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap();

        assert_eq!(summary.status, SessionStatus::Running);
        assert!(summary.iframe_url.ends_with(&format!("/preview/{}", summary.id)));
        assert_eq!(summary.id.len(), 32);
        assert_eq!(f.manager.live_count(), 1);
        assert_eq!(f.manager.ports_in_use(), 1);
        assert_eq!(f.runtime.started_count(), 1);

        // Client file plus the filled-in scaffold are on disk.
        let workdir = f._root.path().join(&summary.id);
        assert!(workdir.join("src/app.ts").exists());
        assert!(workdir.join("package.json").exists());
        assert!(workdir.join("vite.config.ts").exists());
    }

    #[tokio::test]
    async fn empty_file_map_is_fine() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "blank".into(), HashMap::new())
            .await
            .unwrap();
        let workdir = f._root.path().join(&summary.id);
        assert!(workdir.join("index.html").exists());
    }

    #[tokio::test]
    async fn invalid_path_rejected_before_any_allocation() {
        let f = fixture();
        let mut files = HashMap::new();
        files.insert("../escape.ts".to_string(), "nope".to_string());
        let err = f
            .manager
            .create(owner("u1"), "demo".into(), files)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(f.manager.live_count(), 0);
        assert_eq!(f.manager.ports_in_use(), 0);
        assert_eq!(f.runtime.started_count(), 0);
    }

    #[tokio::test]
    async fn start_failure_unwinds_port_workdir_and_map() {
        let f = fixture();
        f.runtime.fail_next_start(true);
        let err = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StartFailed(_)));
        assert_eq!(err.to_string(), "preview failed to start: container failed to start");
        assert_eq!(f.manager.live_count(), 0);
        assert_eq!(f.manager.ports_in_use(), 0);
        // Workdir was materialized then removed by cleanup.
        let leftovers: Vec<_> = std::fs::read_dir(f._root.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn session_cap_is_enforced() {
        let f = fixture_with(|c| c.max_sessions = 1);
        f.manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        let err = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MaxSessions));
    }

    #[tokio::test]
    async fn port_exhaustion_is_distinct_from_the_cap() {
        let f = fixture_with(|c| {
            c.max_sessions = 10;
            c.port_range_start = 4200;
            c.port_range_end = 4200;
        });
        f.manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        let err = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoPorts));
        assert_eq!(err.to_string(), "no available ports");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_everything() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap();

        f.manager.stop(&summary.id).await.unwrap();
        f.manager.stop(&summary.id).await.unwrap();

        assert_eq!(f.manager.live_count(), 0);
        assert_eq!(f.manager.ports_in_use(), 0);
        assert_eq!(f.runtime.stopped_count(), 1);
        assert!(f.manager.summary_of(&summary.id).await.is_none());
        assert!(!f._root.path().join(&summary.id).exists());
    }

    #[tokio::test]
    async fn concurrent_stops_agree() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        let a = f.manager.stop(&summary.id);
        let b = f.manager.stop(&summary.id);
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();
        assert_eq!(f.manager.live_count(), 0);
        assert_eq!(f.runtime.stopped_count(), 1);
    }

    #[tokio::test]
    async fn patch_updates_disk_and_activity() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap();
        let before = f.manager.summary_of(&summary.id).await.unwrap().last_activity_at;

        f.manager
            .patch_file(&summary.id, "/src/app.ts", "export const x = 2".into())
            .await
            .unwrap();

        let workdir = f._root.path().join(&summary.id);
        let on_disk = std::fs::read_to_string(workdir.join("src/app.ts")).unwrap();
        assert_eq!(on_disk, "export const x = 2");
        let after = f.manager.summary_of(&summary.id).await.unwrap().last_activity_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn patch_requires_running() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap();
        f.manager.stop(&summary.id).await.unwrap();

        let err = f
            .manager
            .patch_file(&summary.id, "src/app.ts", "x".into())
            .await
            .unwrap_err();
        // Stopped sessions leave the map entirely.
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn patch_during_stopping_conflicts() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), one_file())
            .await
            .unwrap();
        {
            let handle = f.manager.handle(&summary.id).unwrap();
            let mut session = handle.lock().await;
            f.manager.set_status(&mut session, SessionStatus::Stopping);
        }
        let err = f
            .manager
            .patch_file(&summary.id, "src/app.ts", "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(err.to_string(), "session is stopping");
    }

    #[tokio::test]
    async fn status_broadcasts_reach_subscribers() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path().to_path_buf());
        let runtime = Arc::new(MockRuntime::new());
        let hub = Arc::new(EventHub::new());
        let manager = SessionManager::new(
            config,
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            Arc::clone(&hub),
        )
        .unwrap();

        let summary = manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        hub.subscribe(&summary.id, 1, tx);

        manager.stop(&summary.id).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let HubEvent::SessionStatus { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![SessionStatus::Stopping, SessionStatus::Stopped]
        );
    }

    #[tokio::test]
    async fn ping_known_and_unknown() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        assert!(f.manager.ping(&summary.id).await);
        assert!(!f.manager.ping("deadbeefdeadbeefdeadbeefdeadbeef").await);
    }

    #[tokio::test]
    async fn reaper_stops_exactly_the_stale() {
        let f = fixture();
        let stale = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        let fresh = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        f.manager.ping(&fresh.id).await;
        f.manager.reap(Utc::now()).await;

        assert!(f.manager.summary_of(&stale.id).await.is_none());
        assert!(f.manager.summary_of(&fresh.id).await.is_some());
    }

    #[tokio::test]
    async fn logs_pull_from_the_runtime() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        f.runtime
            .log_lines
            .lock()
            .unwrap()
            .extend(["line 1".to_string(), "line 2".to_string()]);

        let lines = f.manager.logs(&summary.id, None, 100).await.unwrap();
        assert_eq!(lines, vec!["line 1".to_string(), "line 2".to_string()]);
    }

    #[tokio::test]
    async fn logs_without_container_serve_the_ring() {
        let f = fixture();
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        {
            let handle = f.manager.handle(&summary.id).unwrap();
            let mut session = handle.lock().await;
            session.container_id = None;
            session.logs.push_back("ring line".to_string());
        }
        let lines = f.manager.logs(&summary.id, None, 100).await.unwrap();
        assert_eq!(lines, vec!["ring line".to_string()]);
    }

    #[tokio::test]
    async fn log_ring_is_capped() {
        let f = fixture_with(|c| c.log_ring_cap = 3);
        let summary = f
            .manager
            .create(owner("u1"), "demo".into(), HashMap::new())
            .await
            .unwrap();
        {
            let mut lines = f.runtime.log_lines.lock().unwrap();
            for i in 0..10 {
                lines.push(format!("line {i}"));
            }
        }
        f.manager.logs(&summary.id, None, 100).await.unwrap();

        let handle = f.manager.handle(&summary.id).unwrap();
        let session = handle.lock().await;
        assert_eq!(session.logs.len(), 3);
        assert_eq!(session.logs.back().map(String::as_str), Some("line 9"));
    }

    #[tokio::test]
    async fn list_filters_by_owner() {
        let f = fixture();
        f.manager
            .create(owner("u1"), "a".into(), HashMap::new())
            .await
            .unwrap();
        f.manager
            .create(owner("u2"), "b".into(), HashMap::new())
            .await
            .unwrap();

        let mine = f.manager.list_for("u1").await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].project_id, "a");
    }

    #[tokio::test]
    async fn tokens_are_opaque_and_unique() {
        let a = mint_token();
        let b = mint_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
