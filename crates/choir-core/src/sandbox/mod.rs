//! Sandbox lifecycle: create/destroy/checkpoint/restore/exec plus background
//! processes and port proxies, behind a provider-agnostic capability trait.
//!
//! Providers are interchangeable: the local runner executes subprocesses in a
//! per-sandbox workspace directory; the hosted runner drives a remote sandbox
//! API with the same semantics. The core never branches on provider type.

pub mod hosted;
pub mod local;
pub mod provider;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox api error: {0}")]
    Api(String),

    #[error("sandbox api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown sandbox '{0}'")]
    UnknownSandbox(String),

    #[error("unknown checkpoint '{0}'")]
    UnknownCheckpoint(String),

    #[error("unknown process '{0}'")]
    UnknownProcess(String),

    #[error("command requires a sandbox handle")]
    MissingHandle,

    #[error("sandbox config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

// ─── Config and handle types ─────────────────────────────────────────────────

/// Resource caps requested for a sandbox. `None` leaves the provider default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxResources {
    pub cpu_cores: Option<f64>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxNetworkPolicy {
    pub allow_internet: bool,
}

impl Default for SandboxNetworkPolicy {
    fn default() -> Self {
        Self {
            allow_internet: true,
        }
    }
}

/// Everything a provider needs to provision a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub user_id: String,
    pub workspace_id: String,
    /// Default working directory for commands inside the sandbox.
    pub workspace_root: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resources: SandboxResources,
    #[serde(default)]
    pub network_policy: SandboxNetworkPolicy,
}

/// A provisioned sandbox. Persisted to disk per user so the handle survives
/// process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub sandbox_id: String,
    pub config: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxCheckpoint {
    pub checkpoint_id: String,
    pub created_at: String,
    pub label: Option<String>,
}

/// One command execution request.
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    pub command: Vec<String>,
    pub timeout_seconds: u64,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub sandbox: Option<SandboxHandle>,
}

impl SandboxCommand {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout_seconds: 300,
            cwd: None,
            env: None,
            sandbox: None,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxHandle) -> Self {
        self.sandbox = Some(sandbox);
        self
    }
}

/// Outcome of a sandbox command. Timeouts surface as
/// `return_code == 124, timed_out == true` from every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxExec {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub timed_out: bool,
}

/// Exit code reported for timed-out commands.
pub const TIMEOUT_RETURN_CODE: i32 = 124;

// ─── Capability trait ────────────────────────────────────────────────────────

/// Provider-agnostic sandbox capability set.
///
/// Contracts:
/// - `workspace_root` is the default working directory for `run`.
/// - `destroy` is idempotent; destroying an unknown sandbox succeeds.
/// - `restore` fails with [`SandboxError::UnknownCheckpoint`] for unknown
///   checkpoint ids.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn create(&self, config: SandboxConfig) -> Result<SandboxHandle>;

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()>;

    async fn checkpoint(
        &self,
        handle: &SandboxHandle,
        label: Option<&str>,
    ) -> Result<SandboxCheckpoint>;

    async fn restore(&self, handle: &SandboxHandle, checkpoint_id: &str) -> Result<()>;

    async fn run(&self, command: SandboxCommand) -> Result<SandboxExec>;

    /// Start a background process; returns an opaque process id.
    async fn start_process(&self, handle: &SandboxHandle, command: Vec<String>) -> Result<String>;

    async fn stop_process(&self, handle: &SandboxHandle, process_id: &str) -> Result<()>;

    /// Expose a sandbox port, returning a reachable URL.
    async fn open_proxy(&self, handle: &SandboxHandle, port: u16) -> Result<String>;
}
