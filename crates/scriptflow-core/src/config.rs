use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8700;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes per attempt
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 5 * 1024 * 1024; // per stream
pub const DEFAULT_MANUAL_ACQUIRE_WAIT_MS: u64 = 3_000;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Top-level config (scriptflow.toml + SCRIPTFLOW_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptflowConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Process execution limits and interpreter selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Global cap on concurrently running scripts (manual + scheduled).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Byte budget for each of stdout and stderr.
    #[serde(default = "default_output_cap_bytes")]
    pub output_cap_bytes: usize,
    /// How long a manual trigger waits for a free slot before giving up.
    #[serde(default = "default_manual_acquire_wait_ms")]
    pub manual_acquire_wait_ms: u64,
    /// Parent directory of the per-attempt working directories.
    #[serde(default = "default_work_root")]
    pub work_root: String,
    /// Keep working directories after the attempt finishes (debugging aid).
    #[serde(default)]
    pub keep_working_dirs: bool,
    #[serde(default = "default_python_executable")]
    pub python_executable: String,
    /// Optional virtualenv; its interpreter takes precedence over
    /// `python_executable` when it exists.
    #[serde(default)]
    pub python_env: Option<String>,
    /// Interpreter for `.sh` / `.bat` scripts on Unix.
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            manual_acquire_wait_ms: DEFAULT_MANUAL_ACQUIRE_WAIT_MS,
            work_root: default_work_root(),
            keep_working_dirs: false,
            python_executable: default_python_executable(),
            python_env: None,
            shell: default_shell(),
        }
    }
}

impl RunnerConfig {
    /// Interpreter used for Python scripts, honouring `python_env`.
    pub fn python_interpreter(&self) -> String {
        if let Some(ref env) = self.python_env {
            let unix = std::path::Path::new(env).join("bin").join("python");
            if unix.exists() {
                return unix.to_string_lossy().into_owned();
            }
            let windows = std::path::Path::new(env).join("Scripts").join("python.exe");
            if windows.exists() {
                return windows.to_string_lossy().into_owned();
            }
        }
        self.python_executable.clone()
    }
}

/// Retry and auto-disable policy for recurring schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Upper bound on a single sleep of the scheduling loop, so wall-clock
    /// jumps are picked up.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_sleep_secs: default_max_sleep_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal execution records older than this are pruned.
    #[serde(default = "default_retention_days")]
    pub days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_output_cap_bytes() -> usize {
    DEFAULT_OUTPUT_CAP_BYTES
}
fn default_manual_acquire_wait_ms() -> u64 {
    DEFAULT_MANUAL_ACQUIRE_WAIT_MS
}
fn default_python_executable() -> String {
    "python3".to_string()
}
fn default_shell() -> String {
    "bash".to_string()
}
fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}
fn default_max_sleep_secs() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    30
}
fn default_prune_interval_secs() -> u64 {
    3_600
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_db_path() -> String {
    format!("{}/.scriptflow/scriptflow.db", home_dir())
}
fn default_work_root() -> String {
    format!("{}/.scriptflow/work", home_dir())
}

impl ScriptflowConfig {
    /// Load config from a TOML file with SCRIPTFLOW_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `SCRIPTFLOW_RUNNER__MAX_CONCURRENT=4`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(ScriptflowConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SCRIPTFLOW_").split("__"))
            .extract()
            .map_err(|e| crate::error::ScriptflowError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    format!("{}/.scriptflow/scriptflow.toml", home_dir())
}
