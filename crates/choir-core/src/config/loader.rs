//! TOML configuration loading with environment overrides.
//!
//! Loading order:
//! 1. Parse `~/.choird/config.toml` (or the path in `CHOIR_CONFIG`)
//! 2. Apply `CHOIR_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Return the default config file path: `~/.choird/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".choird").join("config.toml"))
}

/// Default data directory for the database and sandbox metadata:
/// `~/.choird`.
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".choird"))
        .unwrap_or_else(|| PathBuf::from(".choird"))
}

/// Load [`AppConfig`] from `path`, falling back to defaults when the file is
/// missing, then applying environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from `CHOIR_CONFIG` or the default path.
pub fn load_default_config() -> AppConfig {
    let path = env::var("CHOIR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

fn env_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Apply `CHOIR_*` (and compatible `WS_*`/`CORS_*`) environment overrides.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("CHOIR_DB_PATH") {
        config.store.db_path = Some(v);
    }
    if let Ok(v) = env::var("CHOIROS_USER_ID") {
        config.store.user_id = v;
    }
    if let Ok(v) = env::var("CHOIR_STREAM_ENABLED") {
        config.stream.enabled = env_bool(&v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_PROVIDER") {
        config.sandbox.provider = v.trim().to_lowercase();
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_WORKSPACE_ROOT") {
        config.sandbox.workspace_root = Some(v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_ALLOW_INTERNET") {
        config.sandbox.allow_internet = env_bool(&v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_KEEP") {
        config.sandbox.keep_on_exit = env_bool(&v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_CPU_CORES") {
        config.sandbox.cpu_cores = v.parse().ok();
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_MEMORY_MB") {
        config.sandbox.memory_mb = v.parse().ok();
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_DISK_MB") {
        config.sandbox.disk_mb = v.parse().ok();
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_API_BASE") {
        config.sandbox.api_base = Some(v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_API_TOKEN") {
        config.sandbox.api_token = Some(v);
    }
    if let Ok(v) = env::var("CHOIR_SANDBOX_API_TIMEOUT") {
        if let Ok(secs) = v.parse::<u64>() {
            config.sandbox.api_timeout_secs = secs;
        }
    }
    if let Ok(v) = env::var("CHOIR_GATEWAY_BIND") {
        config.gateway.bind = v;
    }
    if let Ok(v) = env::var("CORS_ALLOW_ORIGINS") {
        config.gateway.cors_origins = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }
    if let Ok(v) = env::var("WS_MAX_PROMPT_CHARS") {
        if let Ok(n) = v.parse::<usize>() {
            config.gateway.max_prompt_chars = n;
        }
    }
    if let Ok(v) = env::var("WS_RATE_WINDOW_SECONDS") {
        if let Ok(n) = v.parse::<u64>() {
            config.gateway.rate_window_secs = n;
        }
    }
    if let Ok(v) = env::var("WS_MAX_PROMPTS_PER_WINDOW") {
        if let Ok(n) = v.parse::<usize>() {
            config.gateway.max_prompts_per_window = n;
        }
    }
    if let Ok(v) = env::var("CHOIR_VERIFIERS_CONFIG") {
        config.verifiers.catalog_path = Some(v);
    }
    if let Ok(v) = env::var("CHOIR_ARTIFACT_ROOT") {
        config.verifiers.artifact_root = Some(v);
    }
    if let Ok(v) = env::var("CHOIR_AGENT_MODEL") {
        config.agent.model = v;
    }
    if let Ok(v) = env::var("CHOIR_REPO_ROOT") {
        config.git.repo_root = Some(v);
    }
}

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are effectively single-threaded per var.
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[sandbox]
provider = "hosted"
api_base = "https://sandboxes.example.dev"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.sandbox.provider, "hosted");
        assert_eq!(
            config.sandbox.api_base.as_deref(),
            Some("https://sandboxes.example.dev")
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.gateway.max_prompt_chars, 20_000);
        assert_eq!(config.agent.max_turns, 20);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_override_sandbox_provider() {
        let key = "CHOIR_SANDBOX_PROVIDER";
        // SAFETY: no other thread reads this var during the test.
        unsafe {
            env::set_var(key, "Hosted");
        }
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.sandbox.provider, "hosted");
    }

    #[test]
    fn env_override_prompt_cap() {
        let key = "WS_MAX_PROMPT_CHARS";
        // SAFETY: no other thread reads this var during the test.
        unsafe {
            env::set_var(key, "1234");
        }
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.gateway.max_prompt_chars, 1234);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let key = "CORS_ALLOW_ORIGINS";
        // SAFETY: no other thread reads this var during the test.
        unsafe {
            env::set_var(key, "http://a.test , http://b.test");
        }
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.gateway.cors_origins, vec!["http://a.test", "http://b.test"]);
    }
}
