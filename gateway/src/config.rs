use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway listens on
    pub host: String,
    /// Port the gateway listens on
    pub port: u16,
    /// Public base URL used to build iframe URLs
    pub public_url: String,
    /// CORS origin allowlist; empty means mirror the request origin (dev)
    pub cors_origins: Vec<String>,
    /// Request body cap for /api routes (bytes)
    pub max_body_bytes: usize,
    /// Per-IP request budget for /api routes
    pub rate_limit_per_minute: u32,
    /// Global cap on live sessions
    pub max_sessions: usize,
    /// Idle threshold after which the reaper stops a session
    pub session_timeout: Duration,
    /// How often the reaper scans
    pub reap_interval: Duration,
    /// Inclusive host-port range handed to workers
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Root directory for per-session work directories
    pub work_root: PathBuf,
    /// Worker container image reference
    pub worker_image: String,
    /// Named bridge network workers attach to
    pub container_network: String,
    /// Worker memory cap (MiB)
    pub container_memory_mib: u64,
    /// Worker CPU quota as a percentage of one core
    pub container_cpu_percent: u64,
    /// Worker disk quota (MiB); 0 disables the storage-opt flag
    pub container_disk_mib: u64,
    /// Optional DNS resolver pinned inside workers
    pub container_dns: Option<String>,
    /// Budget for the worker readiness probe
    pub ready_timeout: Duration,
    /// Per-session log ring capacity
    pub log_ring_cap: usize,
    /// Policy store base URL
    pub policy_api_url: String,
    /// Service credential sent to the policy store
    pub policy_service_key: Option<String>,
    /// Development-only anonymous bypass flag
    pub dev_allow_anonymous: bool,
    /// Use the in-process mock runtime instead of docker (local development)
    pub mock_runtime: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            host: env_str("GATEWAY_HOST", "0.0.0.0"),
            port: env_parse("GATEWAY_PORT", 8787)?,
            public_url: env_str("GATEWAY_PUBLIC_URL", "http://localhost:8787"),
            cors_origins: std::env::var("GATEWAY_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_body_bytes: env_parse("GATEWAY_MAX_BODY_BYTES", 10 * 1024 * 1024)?,
            rate_limit_per_minute: env_parse("GATEWAY_RATE_LIMIT_PER_MINUTE", 100)?,
            max_sessions: env_parse("GATEWAY_MAX_SESSIONS", 20)?,
            session_timeout: Duration::from_millis(env_parse(
                "GATEWAY_SESSION_TIMEOUT_MS",
                300_000,
            )?),
            reap_interval: Duration::from_millis(env_parse("GATEWAY_REAP_INTERVAL_MS", 30_000)?),
            port_range_start: env_parse("GATEWAY_PORT_RANGE_START", 4300)?,
            port_range_end: env_parse("GATEWAY_PORT_RANGE_END", 4399)?,
            work_root: std::env::var("GATEWAY_WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("greenroom-sessions")),
            worker_image: env_str("GATEWAY_WORKER_IMAGE", "greenroom/worker:latest"),
            container_network: env_str("GATEWAY_CONTAINER_NETWORK", "greenroom-net"),
            container_memory_mib: env_parse("GATEWAY_CONTAINER_MEMORY_MIB", 256)?,
            container_cpu_percent: env_parse("GATEWAY_CONTAINER_CPU_PERCENT", 25)?,
            container_disk_mib: env_parse("GATEWAY_CONTAINER_DISK_MIB", 0)?,
            container_dns: std::env::var("GATEWAY_CONTAINER_DNS").ok(),
            ready_timeout: Duration::from_millis(env_parse("GATEWAY_READY_TIMEOUT_MS", 30_000)?),
            log_ring_cap: env_parse("GATEWAY_LOG_RING_CAP", 500)?,
            policy_api_url: env_str("POLICY_API_URL", "http://localhost:9400"),
            policy_service_key: std::env::var("POLICY_SERVICE_KEY").ok(),
            dev_allow_anonymous: env_parse("GATEWAY_DEV_ALLOW_ANONYMOUS", false)?,
            mock_runtime: env_parse("GATEWAY_MOCK_RUNTIME", false)?,
        };

        if config.port_range_start > config.port_range_end {
            anyhow::bail!(
                "GATEWAY_PORT_RANGE_START ({}) exceeds GATEWAY_PORT_RANGE_END ({})",
                config.port_range_start,
                config.port_range_end
            );
        }

        Ok(config)
    }

    /// The anonymous bypass only engages on loopback/unspecified listeners.
    /// A stray env var on a production host must not open the gateway.
    pub fn dev_bypass_active(&self) -> bool {
        if !self.dev_allow_anonymous {
            return false;
        }
        matches!(
            self.host.as_str(),
            "127.0.0.1" | "localhost" | "::1" | "0.0.0.0" | "::"
        )
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
