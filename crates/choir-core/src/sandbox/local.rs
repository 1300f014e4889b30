//! Local sandbox provider.
//!
//! A sandbox is a workspace directory plus per-handle metadata under
//! `<meta_root>/<sandbox_id>/` (`config.json`, `checkpoints.json`).
//! Checkpoints copy the workspace tree into the metadata directory; restore
//! copies it back. Commands run as host subprocesses with the workspace as
//! their default working directory — isolation here is scoping, not
//! containment; the hosted provider supplies hard isolation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::{Child, Command};

use crate::util;

use super::{
    Result, SandboxCheckpoint, SandboxCommand, SandboxConfig, SandboxError, SandboxExec,
    SandboxHandle, SandboxRunner, TIMEOUT_RETURN_CODE,
};

pub struct LocalSandboxRunner {
    meta_root: PathBuf,
    processes: DashMap<String, Child>,
}

impl LocalSandboxRunner {
    pub fn new(meta_root: PathBuf) -> Self {
        Self {
            meta_root,
            processes: DashMap::new(),
        }
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> PathBuf {
        self.meta_root.join(sandbox_id)
    }

    fn checkpoints_file(&self, sandbox_id: &str) -> PathBuf {
        self.sandbox_dir(sandbox_id).join("checkpoints.json")
    }

    fn checkpoint_dir(&self, sandbox_id: &str, checkpoint_id: &str) -> PathBuf {
        self.sandbox_dir(sandbox_id)
            .join("checkpoints")
            .join(checkpoint_id)
    }

    async fn load_checkpoints(&self, sandbox_id: &str) -> Result<Vec<SandboxCheckpoint>> {
        let path = self.checkpoints_file(sandbox_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn save_checkpoints(
        &self,
        sandbox_id: &str,
        checkpoints: &[SandboxCheckpoint],
    ) -> Result<()> {
        let raw = serde_json::to_string_pretty(checkpoints)
            .map_err(|e| SandboxError::Config(e.to_string()))?;
        tokio::fs::write(self.checkpoints_file(sandbox_id), raw).await?;
        Ok(())
    }
}

/// Recursive directory copy, skipping the destination if it is nested inside
/// the source.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if dst.starts_with(&from) {
                continue;
            }
            copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to)?;
        }
        // Symlinks and special files are not carried across checkpoints.
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[async_trait]
impl SandboxRunner for LocalSandboxRunner {
    async fn create(&self, config: SandboxConfig) -> Result<SandboxHandle> {
        let sandbox_id = format!("sb-{}", uuid::Uuid::new_v4());
        let dir = self.sandbox_dir(&sandbox_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(&config.workspace_root).await?;

        let handle = SandboxHandle {
            sandbox_id: sandbox_id.clone(),
            config,
        };
        let raw = serde_json::to_string_pretty(&handle)
            .map_err(|e| SandboxError::Config(e.to_string()))?;
        tokio::fs::write(dir.join("config.json"), raw).await?;
        tracing::debug!(sandbox_id, "local sandbox created");
        Ok(handle)
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        let dir = self.sandbox_dir(&handle.sandbox_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SandboxError::Io(e)),
        }
        tracing::debug!(sandbox_id = %handle.sandbox_id, "local sandbox destroyed");
        Ok(())
    }

    async fn checkpoint(
        &self,
        handle: &SandboxHandle,
        label: Option<&str>,
    ) -> Result<SandboxCheckpoint> {
        let checkpoint_id = format!("ckpt-{}", uuid::Uuid::new_v4());
        let src = PathBuf::from(&handle.config.workspace_root);
        let dst = self.checkpoint_dir(&handle.sandbox_id, &checkpoint_id);
        let copy_src = src.clone();
        let copy_dst = dst.clone();
        tokio::task::spawn_blocking(move || copy_tree(&copy_src, &copy_dst))
            .await
            .map_err(|e| SandboxError::Api(format!("checkpoint task panicked: {e}")))??;

        let checkpoint = SandboxCheckpoint {
            checkpoint_id,
            created_at: util::utc_now(),
            label: label.map(str::to_owned),
        };
        let mut checkpoints = self.load_checkpoints(&handle.sandbox_id).await?;
        checkpoints.push(checkpoint.clone());
        self.save_checkpoints(&handle.sandbox_id, &checkpoints)
            .await?;
        Ok(checkpoint)
    }

    async fn restore(&self, handle: &SandboxHandle, checkpoint_id: &str) -> Result<()> {
        let src = self.checkpoint_dir(&handle.sandbox_id, checkpoint_id);
        if !src.is_dir() {
            return Err(SandboxError::UnknownCheckpoint(checkpoint_id.to_string()));
        }
        let dst = PathBuf::from(&handle.config.workspace_root);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dst)?;
            clear_dir(&dst)?;
            copy_tree(&src, &dst)
        })
        .await
        .map_err(|e| SandboxError::Api(format!("restore task panicked: {e}")))??;
        Ok(())
    }

    async fn run(&self, command: SandboxCommand) -> Result<SandboxExec> {
        let program = command
            .command
            .first()
            .ok_or_else(|| SandboxError::Config("empty command".to_string()))?
            .clone();

        let mut cmd = Command::new(&program);
        cmd.args(&command.command[1..]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let cwd = command.cwd.clone().or_else(|| {
            command
                .sandbox
                .as_ref()
                .map(|h| PathBuf::from(&h.config.workspace_root))
        });
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(handle) = &command.sandbox {
            cmd.envs(&handle.config.env);
        }
        if let Some(env) = &command.env {
            cmd.envs(env);
        }

        let child = cmd.spawn()?;
        let timeout = Duration::from_secs(command.timeout_seconds);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(SandboxExec {
                    return_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped.
                Ok(SandboxExec {
                    return_code: TIMEOUT_RETURN_CODE,
                    stdout: String::new(),
                    stderr: "TIMEOUT".to_string(),
                    timed_out: true,
                })
            }
        }
    }

    async fn start_process(&self, handle: &SandboxHandle, command: Vec<String>) -> Result<String> {
        let program = command
            .first()
            .ok_or_else(|| SandboxError::Config("empty command".to_string()))?
            .clone();
        let mut cmd = Command::new(&program);
        cmd.args(&command[1..]);
        cmd.current_dir(&handle.config.workspace_root);
        cmd.envs(&handle.config.env);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.kill_on_drop(true);
        let child = cmd.spawn()?;
        let process_id = format!("proc-{}", uuid::Uuid::new_v4());
        self.processes.insert(process_id.clone(), child);
        Ok(process_id)
    }

    async fn stop_process(&self, _handle: &SandboxHandle, process_id: &str) -> Result<()> {
        let (_, mut child) = self
            .processes
            .remove(process_id)
            .ok_or_else(|| SandboxError::UnknownProcess(process_id.to_string()))?;
        let _ = child.kill().await;
        Ok(())
    }

    async fn open_proxy(&self, _handle: &SandboxHandle, port: u16) -> Result<String> {
        // Local sandboxes share the host network; the "proxy" is direct.
        Ok(format!("http://127.0.0.1:{port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> LocalSandboxRunner {
        LocalSandboxRunner::new(dir.path().join("meta"))
    }

    fn config(dir: &TempDir) -> SandboxConfig {
        SandboxConfig {
            user_id: "local".to_string(),
            workspace_id: "run-1".to_string(),
            workspace_root: dir.path().join("work").display().to_string(),
            env: HashMap::new(),
            resources: Default::default(),
            network_policy: Default::default(),
        }
    }

    #[tokio::test]
    async fn create_persists_handle_metadata() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        let meta = dir
            .path()
            .join("meta")
            .join(&handle.sandbox_id)
            .join("config.json");
        assert!(meta.is_file());
        let raw = std::fs::read_to_string(meta).unwrap();
        let parsed: SandboxHandle = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, handle);
    }

    #[tokio::test]
    async fn run_uses_workspace_root_as_default_cwd() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        let exec = runner
            .run(SandboxCommand::new(vec!["pwd".to_string()]).with_sandbox(handle.clone()))
            .await
            .unwrap();
        assert_eq!(exec.return_code, 0);
        assert!(
            exec.stdout.trim().ends_with("work"),
            "stdout was {:?}",
            exec.stdout
        );
    }

    #[tokio::test]
    async fn run_times_out_with_124() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let exec = runner
            .run(
                SandboxCommand::new(vec!["sleep".to_string(), "5".to_string()]).with_timeout(1),
            )
            .await
            .unwrap();
        assert!(exec.timed_out);
        assert_eq!(exec.return_code, TIMEOUT_RETURN_CODE);
    }

    #[tokio::test]
    async fn checkpoint_then_restore_round_trips_files() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        let work = PathBuf::from(&handle.config.workspace_root);
        std::fs::write(work.join("a.txt"), "before").unwrap();

        let checkpoint = runner.checkpoint(&handle, Some("baseline")).await.unwrap();
        std::fs::write(work.join("a.txt"), "after").unwrap();
        std::fs::write(work.join("extra.txt"), "junk").unwrap();

        runner
            .restore(&handle, &checkpoint.checkpoint_id)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(work.join("a.txt")).unwrap(), "before");
        assert!(!work.join("extra.txt").exists());
    }

    #[tokio::test]
    async fn restore_unknown_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        let err = runner.restore(&handle, "ckpt-missing").await.unwrap_err();
        assert!(matches!(err, SandboxError::UnknownCheckpoint(_)));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        runner.destroy(&handle).await.unwrap();
        runner.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn start_then_stop_process() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let handle = runner.create(config(&dir)).await.unwrap();
        let pid = runner
            .start_process(&handle, vec!["sleep".to_string(), "30".to_string()])
            .await
            .unwrap();
        runner.stop_process(&handle, &pid).await.unwrap();
        let err = runner.stop_process(&handle, &pid).await.unwrap_err();
        assert!(matches!(err, SandboxError::UnknownProcess(_)));
    }
}
