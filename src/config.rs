use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default wall-clock budget for one test case run.
pub const DEFAULT_TIMEOUT_SECS: u64 = 4;

/// Engine-wide configuration, read once at startup and shared read-only by
/// every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall clock timeout applied to each interpreter run
    pub timeout: Duration,
    /// Parent directory for per-evaluation sandboxes
    pub workspace_base: PathBuf,
    /// Explicit Scilab interpreter (otherwise `scilab-cli` from PATH)
    pub scilab_path: Option<PathBuf>,
    /// Resource limits applied to interpreter processes
    pub limits: ResourceLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            workspace_base: std::env::temp_dir().join("grader-sandboxes"),
            scilab_path: None,
            limits: ResourceLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `GRADER_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "GRADER_TIMEOUT_SECS") {
            if secs == 0 {
                warn!("[CONFIG] GRADER_TIMEOUT_SECS must be positive, keeping default");
            } else {
                config.timeout = Duration::from_secs(secs);
            }
        }
        if let Some(base) = non_empty(&lookup, "GRADER_WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(base);
        }
        if let Some(path) = non_empty(&lookup, "GRADER_SCILAB_PATH") {
            config.scilab_path = Some(PathBuf::from(path));
        }
        if let Some(mb) = parse_var::<usize, _>(&lookup, "GRADER_MEMORY_MB") {
            config.limits.memory_mb = mb;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "GRADER_CPU_SECONDS") {
            config.limits.cpu_seconds = secs;
        }

        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workspace_base(mut self, base: PathBuf) -> Self {
        self.workspace_base = base;
        self
    }

    pub fn with_scilab_path(mut self, path: PathBuf) -> Self {
        self.scilab_path = Some(path);
        self
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup, key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[CONFIG] Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

/// Resource limits for interpreter processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum address space in MB
    pub memory_mb: usize,
    /// Maximum CPU time in seconds
    pub cpu_seconds: u64,
    /// Maximum number of threads for numeric libraries
    pub max_threads: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cpu_seconds: 30,
            max_threads: 2,
        }
    }
}
