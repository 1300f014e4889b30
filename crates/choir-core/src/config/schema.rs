//! TOML configuration schema.
//!
//! All sections have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.choird/config.toml`:
//! ```toml
//! [store]
//! user_id = "local"
//!
//! [stream]
//! enabled = false
//!
//! [sandbox]
//! provider = "local"
//! allow_internet = true
//!
//! [agent]
//! model = "claude-sonnet-4-5"
//! max_turns = 20
//!
//! [gateway]
//! bind = "127.0.0.1:8787"
//! max_prompt_chars = 20000
//! ```

use serde::{Deserialize, Serialize};

// ─── StoreSettings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite database. Defaults to `<data_dir>/state.sqlite`.
    pub db_path: Option<String>,
    /// Per-user namespace for events and sandbox state.
    pub user_id: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            user_id: "local".to_owned(),
        }
    }
}

// ─── StreamSettings ──────────────────────────────────────────────────────────

/// External event-stream mirror toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StreamSettings {
    /// Whether appended events are mirrored to the in-process broadcast
    /// stream (and any attached external publisher).
    pub enabled: bool,
}

// ─── SandboxSettings ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxSettings {
    /// Sandbox provider: `"local"` (subprocess) or `"hosted"` (remote API).
    pub provider: String,
    /// Workspace root mounted into the sandbox; defaults to the repo root.
    pub workspace_root: Option<String>,
    /// Whether sandboxed commands may reach the internet.
    pub allow_internet: bool,
    /// Keep the sandbox alive after adjudication (debugging aid).
    pub keep_on_exit: bool,
    /// Resource caps; `None` leaves the provider default in place.
    pub cpu_cores: Option<f64>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
    /// Directory for per-handle metadata (`config.json`, `checkpoints.json`).
    pub meta_dir: Option<String>,
    /// Hosted provider endpoint and credentials.
    pub api_base: Option<String>,
    pub api_token: Option<String>,
    pub api_timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_owned(),
            workspace_root: None,
            allow_internet: true,
            keep_on_exit: false,
            cpu_cores: None,
            memory_mb: None,
            disk_mb: None,
            meta_dir: None,
            api_base: None,
            api_token: None,
            api_timeout_secs: 60,
        }
    }
}

// ─── AgentSettings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Model identifier handed to the provider.
    pub model: String,
    /// Maximum tokens per LLM response.
    pub max_tokens: u32,
    /// Hard upper bound on tool-use loop turns.
    pub max_turns: usize,
    /// Override for the agent system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_owned(),
            max_tokens: 4096,
            max_turns: 20,
            system_prompt: None,
        }
    }
}

// ─── VerifierSettings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifierSettings {
    /// Path to the verifier catalog. Defaults to `config/verifiers.yaml`
    /// relative to the repo root.
    pub catalog_path: Option<String>,
    /// Content-addressed artifact directory. Defaults to
    /// `.context/artifacts` relative to the repo root.
    pub artifact_root: Option<String>,
    /// Per-verifier timeout when the catalog entry does not set one.
    pub default_timeout_secs: u64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            catalog_path: None,
            artifact_root: None,
            default_timeout_secs: 300,
        }
    }
}

// ─── GatewaySettings ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    /// Listen address for the HTTP/WS gateway.
    pub bind: String,
    /// Allowed CORS origins; `*` disables credentialed requests.
    pub cors_origins: Vec<String>,
    /// Maximum accepted prompt size in characters.
    pub max_prompt_chars: usize,
    /// Sliding rate-limit window for prompts, seconds.
    pub rate_window_secs: u64,
    /// Maximum prompts accepted per window per session.
    pub max_prompts_per_window: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_owned(),
            cors_origins: vec!["http://localhost:5173".to_owned()],
            max_prompt_chars: 20_000,
            rate_window_secs: 10,
            max_prompts_per_window: 5,
        }
    }
}

// ─── GitSettings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitSettings {
    /// Repository root for checkpoint/revert; defaults to the working
    /// directory.
    pub repo_root: Option<String>,
    /// Ignore file consulted by checkpoints.
    pub ignore_file: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            repo_root: None,
            ignore_file: ".choirignore".to_owned(),
        }
    }
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.choird/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreSettings,
    pub stream: StreamSettings,
    pub sandbox: SandboxSettings,
    pub agent: AgentSettings,
    pub verifiers: VerifierSettings,
    pub gateway: GatewaySettings,
    pub git: GitSettings,
}
