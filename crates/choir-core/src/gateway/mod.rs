//! HTTP/WS gateway: the control surface plus the `/agent` WebSocket.

pub mod daemon;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use dashmap::DashMap;

use crate::ai::provider::LlmProvider;
use crate::config::AppConfig;
use crate::git::GitOps;
use crate::history::FileHistory;
use crate::orchestrator::RunOrchestrator;
use crate::sandbox::{SandboxHandle, SandboxRunner};
use crate::store::EventStore;
use crate::tools::ToolRegistry;

/// Shared state for every gateway handler.
pub struct AppState {
    pub store: Arc<EventStore>,
    pub history: Arc<FileHistory>,
    pub git: Arc<GitOps>,
    pub sandbox_runner: Arc<dyn SandboxRunner>,
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub config: AppConfig,
    /// Live sandbox handles created through the control surface, by id.
    pub sandboxes: DashMap<String, SandboxHandle>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error(transparent)]
    Verifier(#[from] crate::verify::VerifierError),

    #[error("bootstrap io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire the whole supervisor from configuration: store, mirror, tools, git,
/// sandbox provider, verifier runner and orchestrator.
pub fn build_state(
    config: AppConfig,
    provider: Arc<dyn LlmProvider>,
) -> Result<SharedState, BootstrapError> {
    use std::path::PathBuf;

    let data_dir = crate::config::default_data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let db_path = config
        .store
        .db_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("state.sqlite"));
    let mut store = EventStore::open(&db_path, config.store.user_id.clone())?;
    if config.stream.enabled {
        store = store.with_mirror(Arc::new(crate::events::mirror::BroadcastMirror::new()));
    }
    let store = Arc::new(store);

    let repo_root = config
        .git
        .repo_root
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let git = Arc::new(GitOps::new(repo_root.clone(), config.git.ignore_file.clone()));

    let sandbox_runner = crate::sandbox::provider::sandbox_runner_from(
        &config.sandbox,
        data_dir.join("sandboxes"),
    )?;

    let history = Arc::new(FileHistory::new());
    let registry = Arc::new(crate::tools::standard_registry(
        repo_root.clone(),
        repo_root.join("logs"),
        store.clone(),
        history.clone(),
        git.clone(),
    ));

    let catalog_path = config
        .verifiers
        .catalog_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join("config").join("verifiers.yaml"));
    let catalog = match crate::verify::VerifierCatalog::load(&catalog_path) {
        Ok(catalog) => catalog,
        Err(err) => {
            tracing::warn!(%err, "verifier catalog unavailable, using empty catalog");
            crate::verify::VerifierCatalog::default()
        }
    };

    let artifact_root = config
        .verifiers
        .artifact_root
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join(".context").join("artifacts"));
    let artifacts = crate::verify::ArtifactStore::new(artifact_root)?;
    let verifier_runner = Arc::new(crate::verify::VerifierRunner::new(
        artifacts,
        sandbox_runner.clone(),
    ));

    let orchestrator = Arc::new(RunOrchestrator::new(
        store.clone(),
        verifier_runner,
        sandbox_runner.clone(),
        git.clone(),
        catalog,
        config.sandbox.clone(),
        config.verifiers.default_timeout_secs,
    ));

    Ok(Arc::new(AppState {
        store,
        history,
        git,
        sandbox_runner,
        provider,
        registry,
        orchestrator,
        config,
        sandboxes: DashMap::new(),
    }))
}
