//! Sandbox provider selection and config assembly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SandboxSettings;

use super::hosted::HostedSandboxRunner;
use super::local::LocalSandboxRunner;
use super::{
    Result, SandboxConfig, SandboxError, SandboxNetworkPolicy, SandboxResources, SandboxRunner,
};

/// Instantiate the runner named by `settings.provider`. The core never
/// branches on provider type past this point.
pub fn sandbox_runner_from(
    settings: &SandboxSettings,
    default_meta_dir: PathBuf,
) -> Result<Arc<dyn SandboxRunner>> {
    match settings.provider.as_str() {
        "local" | "" => {
            let meta_root = settings
                .meta_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or(default_meta_dir);
            Ok(Arc::new(LocalSandboxRunner::new(meta_root)))
        }
        "hosted" => {
            let api_base = settings.api_base.as_deref().ok_or_else(|| {
                SandboxError::Config("sandbox.api_base is required for the hosted provider".into())
            })?;
            Ok(Arc::new(HostedSandboxRunner::new(
                api_base,
                settings.api_token.clone(),
                settings.api_timeout_secs,
            )?))
        }
        other => Err(SandboxError::Config(format!(
            "unknown sandbox provider '{other}'"
        ))),
    }
}

/// Build the per-run sandbox config from settings plus run identity.
pub fn build_sandbox_config(
    user_id: &str,
    workspace_id: &str,
    settings: &SandboxSettings,
    default_workspace_root: &str,
) -> SandboxConfig {
    let workspace_root = settings
        .workspace_root
        .clone()
        .unwrap_or_else(|| default_workspace_root.to_string());

    SandboxConfig {
        user_id: user_id.to_string(),
        workspace_id: workspace_id.to_string(),
        workspace_root,
        env: HashMap::new(),
        resources: SandboxResources {
            cpu_cores: settings.cpu_cores,
            memory_mb: settings.memory_mb,
            disk_mb: settings.disk_mb,
        },
        network_policy: SandboxNetworkPolicy {
            allow_internet: settings.allow_internet,
        },
    }
}
