use std::net::SocketAddr;
use std::time::Duration;

/// Default gRPC address the master listens on and workers dial.
pub const DEFAULT_MASTER_PORT: u16 = 50051;

/// Configuration for the master process.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Address the gRPC server binds to
    pub listen_addr: SocketAddr,
    /// Address for the read-only HTTP dashboard, if enabled
    pub dashboard_addr: Option<SocketAddr>,
    /// Tear down a connection that sends nothing for this long.
    /// `None` means only a transport disconnect evicts a worker.
    pub worker_idle_timeout_ms: Option<u64>,
    /// Capacity of each connection's outbound message buffer
    pub outbound_buffer: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_MASTER_PORT)),
            dashboard_addr: None,
            worker_idle_timeout_ms: None,
            outbound_buffer: 32,
        }
    }
}

impl MasterConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.worker_idle_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.worker_idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for a worker process connecting to the master.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master endpoint (use http:// scheme)
    pub master_addr: String,
    /// Explicit worker identity. Defaults to `<hostname>-<pid>`.
    pub worker_id: Option<String>,
    pub hostname: String,
    /// Declared capacity ceiling reported at registration
    pub max_concurrency: u32,
    /// Interval between status updates
    pub status_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: format!("http://127.0.0.1:{}", DEFAULT_MASTER_PORT),
            worker_id: None,
            hostname: local_hostname(),
            max_concurrency: 10,
            status_interval_ms: 5000,
        }
    }
}

impl WorkerConfig {
    pub fn new(master_addr: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_status_interval_ms(mut self, interval_ms: u64) -> Self {
        self.status_interval_ms = interval_ms;
        self
    }

    /// The identity this worker registers under.
    pub fn resolved_worker_id(&self) -> String {
        match &self.worker_id {
            Some(id) => id.clone(),
            // pid keeps several workers on one host distinct
            None => format!("{}-{}", self.hostname, std::process::id()),
        }
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
