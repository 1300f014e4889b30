//! The agent's tool surface.
//!
//! Every tool returns a structured value; mutating tools emit events so the
//! log captures each side effect.

pub mod file_ops;
pub mod git_tools;
pub mod registry;
pub mod shell;
pub mod traits;

use std::path::PathBuf;
use std::sync::Arc;

use crate::git::GitOps;
use crate::history::FileHistory;
use crate::store::EventStore;

pub use registry::ToolRegistry;
pub use traits::{Tool, ToolResult};

/// Build the standard registry: read_file, write_file, edit_file, bash,
/// git_checkpoint, git_status.
pub fn standard_registry(
    workspace_root: PathBuf,
    log_dir: PathBuf,
    store: Arc<EventStore>,
    history: Arc<FileHistory>,
    git: Arc<GitOps>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(file_ops::ReadFileTool::new(workspace_root.clone())));
    registry.register(Arc::new(file_ops::WriteFileTool::new(
        workspace_root.clone(),
        store.clone(),
        history.clone(),
    )));
    registry.register(Arc::new(file_ops::EditFileTool::new(
        workspace_root.clone(),
        store.clone(),
        history,
    )));
    registry.register(Arc::new(shell::BashTool::new(workspace_root, log_dir)));
    registry.register(Arc::new(git_tools::GitCheckpointTool::new(
        git.clone(),
        store,
    )));
    registry.register(Arc::new(git_tools::GitStatusTool::new(git)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn standard_registry_has_six_tools() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let history = Arc::new(FileHistory::new());
        let git = Arc::new(GitOps::new(dir.path().to_path_buf(), ".choirignore"));
        let registry = standard_registry(
            dir.path().to_path_buf(),
            dir.path().join("logs"),
            store,
            history,
            git,
        );
        assert_eq!(registry.len(), 6);
        let names: Vec<String> = registry.definitions().iter().map(|d| d.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                "bash",
                "edit_file",
                "git_checkpoint",
                "git_status",
                "read_file",
                "write_file"
            ]
        );
    }
}
