//! Git operations: checkpoints, reverts, status.
//!
//! Checkpoints stage only paths that survive the `.choirignore` filter; an
//! ignore-only dirty tree is a successful no-op. Reverts require the target
//! to be an ancestor of HEAD and take a timestamped backup branch before the
//! hard reset.

pub mod ignore;

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;

use crate::store::EventStore;

use ignore::IgnoreRules;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {op} failed: {stderr}")]
    Command { op: String, stderr: String },

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub type Result<T> = std::result::Result<T, GitError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GitStatus {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
    pub clean: bool,
}

impl GitStatus {
    /// All changed paths, working-tree order.
    pub fn changed_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        paths.extend(self.modified.iter().cloned());
        paths.extend(self.added.iter().cloned());
        paths.extend(self.deleted.iter().cloned());
        paths.extend(self.untracked.iter().cloned());
        paths
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub date: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointOutcome {
    pub success: bool,
    pub message: String,
    pub commit_sha: Option<String>,
    pub staged: Vec<String>,
    pub ignored: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertOutcome {
    pub success: bool,
    pub sha: String,
    pub dry_run: bool,
    pub backup_branch: Option<String>,
    pub diff_preview: Option<String>,
    pub error: Option<String>,
}

pub struct GitOps {
    repo_root: PathBuf,
    ignore_file: String,
}

impl GitOps {
    pub fn new(repo_root: PathBuf, ignore_file: impl Into<String>) -> Self {
        Self {
            repo_root,
            ignore_file: ignore_file.into(),
        }
    }

    pub fn repo_root(&self) -> &PathBuf {
        &self.repo_root
    }

    async fn git(&self, args: &[&str]) -> Result<(i32, String, String)> {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    pub async fn head_sha(&self) -> Result<Option<String>> {
        let (code, stdout, _) = self.git(&["rev-parse", "HEAD"]).await?;
        if code == 0 {
            Ok(Some(stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn status(&self) -> Result<GitStatus> {
        let (code, stdout, stderr) = self
            .git(&["status", "--porcelain", "--untracked-files=all"])
            .await?;
        if code != 0 {
            return Err(GitError::Command {
                op: "status".to_string(),
                stderr,
            });
        }
        let mut status = GitStatus::default();
        let mut lines = 0;
        for line in stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            lines += 1;
            let flags: Vec<char> = line[..2].chars().collect();
            let path = line[3..].to_string();
            if flags[0] == 'M' || flags[1] == 'M' {
                status.modified.push(path);
            } else if flags[0] == 'A' {
                status.added.push(path);
            } else if flags[0] == 'D' || flags[1] == 'D' {
                status.deleted.push(path);
            } else if flags[0] == '?' {
                status.untracked.push(path);
            }
        }
        status.clean = lines == 0;
        Ok(status)
    }

    pub async fn log(&self, count: usize) -> Result<Vec<CommitInfo>> {
        let count_arg = format!("-{count}");
        let (code, stdout, _) = self
            .git(&["log", &count_arg, "--pretty=format:%H|%s|%aI|%an"])
            .await?;
        if code != 0 {
            return Ok(Vec::new());
        }
        let mut commits = Vec::new();
        for line in stdout.lines() {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            if parts.len() == 4 {
                commits.push(CommitInfo {
                    sha: parts[0].to_string(),
                    message: parts[1].to_string(),
                    date: parts[2].to_string(),
                    author: parts[3].to_string(),
                });
            }
        }
        Ok(commits)
    }

    /// Create a checkpoint: filter the dirty tree through `.choirignore`,
    /// stage what survives, commit. An ignore-only or clean tree succeeds
    /// without advancing HEAD.
    pub async fn checkpoint(
        &self,
        message: Option<String>,
        store: &EventStore,
    ) -> Result<CheckpointOutcome> {
        let message = message.unwrap_or_else(|| {
            let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
            let last_seq = store.latest_seq().unwrap_or(0);
            format!("checkpoint: {timestamp} (event seq {last_seq})")
        });

        let status = self.status().await?;
        let changed = status.changed_paths();
        let rules = IgnoreRules::load(&self.repo_root, &self.ignore_file);
        let (staged, ignored) = rules.partition(&changed);
        let staged: Vec<String> = staged.into_iter().map(str::to_owned).collect();
        let ignored: Vec<String> = ignored.into_iter().map(str::to_owned).collect();

        if staged.is_empty() {
            return Ok(CheckpointOutcome {
                success: true,
                message: "Nothing to commit, working tree clean".to_string(),
                commit_sha: self.head_sha().await?,
                staged,
                ignored,
                error: None,
            });
        }

        let mut add_args = vec!["add", "--"];
        add_args.extend(staged.iter().map(String::as_str));
        let (code, _, stderr) = self.git(&add_args).await?;
        if code != 0 {
            return Ok(CheckpointOutcome {
                success: false,
                message,
                commit_sha: None,
                staged,
                ignored,
                error: Some(format!("git add failed: {stderr}")),
            });
        }

        let (code, _, stderr) = self.git(&["commit", "-m", &message]).await?;
        if code != 0 {
            return Ok(CheckpointOutcome {
                success: false,
                message,
                commit_sha: None,
                staged,
                ignored,
                error: Some(format!("git commit failed: {stderr}")),
            });
        }

        let commit_sha = self.head_sha().await?;
        if let Some(sha) = &commit_sha {
            store.record_checkpoint(sha, Some(&message))?;
        }

        Ok(CheckpointOutcome {
            success: true,
            message,
            commit_sha,
            staged,
            ignored,
            error: None,
        })
    }

    /// Revert the working tree to `sha`.
    ///
    /// The sha must be reachable from HEAD. A dry run only reports the diff
    /// summary; a real revert records a timestamped backup branch before the
    /// hard reset.
    pub async fn revert(&self, sha: &str, dry_run: bool) -> Result<RevertOutcome> {
        let (code, _, _) = self.git(&["merge-base", "--is-ancestor", sha, "HEAD"]).await?;
        if code != 0 {
            return Ok(RevertOutcome {
                success: false,
                sha: sha.to_string(),
                dry_run,
                backup_branch: None,
                diff_preview: None,
                error: Some(format!("{sha} is not an ancestor of HEAD")),
            });
        }

        let (_, diff, _) = self.git(&["diff", "--stat", sha, "HEAD"]).await?;
        let diff_preview = Some(diff.trim_end().to_string());

        if dry_run {
            return Ok(RevertOutcome {
                success: true,
                sha: sha.to_string(),
                dry_run,
                backup_branch: None,
                diff_preview,
                error: None,
            });
        }

        let backup_branch = format!(
            "backup-before-revert-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        let (code, _, stderr) = self.git(&["branch", &backup_branch, "HEAD"]).await?;
        if code != 0 {
            return Ok(RevertOutcome {
                success: false,
                sha: sha.to_string(),
                dry_run,
                backup_branch: None,
                diff_preview,
                error: Some(format!("backup branch failed: {stderr}")),
            });
        }

        let (code, _, stderr) = self.git(&["reset", "--hard", sha]).await?;
        if code != 0 {
            return Ok(RevertOutcome {
                success: false,
                sha: sha.to_string(),
                dry_run,
                backup_branch: Some(backup_branch),
                diff_preview,
                error: Some(format!("git reset failed: {stderr}")),
            });
        }

        Ok(RevertOutcome {
            success: true,
            sha: sha.to_string(),
            dry_run,
            backup_branch: Some(backup_branch),
            diff_preview,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo(dir: &TempDir) -> GitOps {
        let ops = GitOps::new(dir.path().to_path_buf(), ".choirignore");
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "dev@example.test"],
            vec!["config", "user.name", "dev"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            let (code, _, stderr) = ops.git(&args).await.unwrap();
            assert_eq!(code, 0, "git {args:?} failed: {stderr}");
        }
        std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
        ops.git(&["add", "-A"]).await.unwrap();
        ops.git(&["commit", "-q", "-m", "seed"]).await.unwrap();
        ops
    }

    #[tokio::test]
    async fn status_classifies_changes() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        std::fs::write(dir.path().join("README.md"), "changed\n").unwrap();
        std::fs::write(dir.path().join("new.txt"), "new\n").unwrap();
        let status = ops.status().await.unwrap();
        assert!(!status.clean);
        assert_eq!(status.modified, vec!["README.md"]);
        assert_eq!(status.untracked, vec!["new.txt"]);
    }

    #[tokio::test]
    async fn checkpoint_stages_only_unignored_paths() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        let store = EventStore::in_memory("local").unwrap();

        std::fs::write(dir.path().join(".choirignore"), "*.log\n.choirignore\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("a.log"), "noise\n").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "useful\n").unwrap();

        let outcome = ops.checkpoint(None, &store).await.unwrap();
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert!(outcome.commit_sha.is_some());
        assert_eq!(outcome.staged, vec!["src/b.txt"]);
        // git lists untracked paths sorted; both noise files are filtered.
        assert_eq!(outcome.ignored, vec![".choirignore", "a.log"]);

        // The noise file stays untracked.
        let status = ops.status().await.unwrap();
        assert!(status.untracked.contains(&"a.log".to_string()));
        // The checkpoint landed in the store.
        assert!(store.last_checkpoint().unwrap().is_some());
    }

    #[tokio::test]
    async fn checkpoint_on_ignore_only_tree_does_not_advance_head() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        let store = EventStore::in_memory("local").unwrap();
        let head_before = ops.head_sha().await.unwrap();

        std::fs::write(dir.path().join(".choirignore"), "*.log\n.choirignore\n").unwrap();
        std::fs::write(dir.path().join("a.log"), "noise\n").unwrap();

        let outcome = ops.checkpoint(None, &store).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.message.contains("Nothing to commit"));
        assert_eq!(outcome.commit_sha, head_before);
        assert_eq!(ops.head_sha().await.unwrap(), head_before);
    }

    #[tokio::test]
    async fn revert_dry_run_reports_diff_without_reset() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        let store = EventStore::in_memory("local").unwrap();
        let base = ops.head_sha().await.unwrap().unwrap();

        std::fs::write(dir.path().join("README.md"), "v2\n").unwrap();
        ops.checkpoint(Some("v2".to_string()), &store).await.unwrap();

        let outcome = ops.revert(&base, true).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.dry_run);
        assert!(outcome.backup_branch.is_none());
        assert!(outcome.diff_preview.unwrap().contains("README.md"));
        // HEAD unchanged.
        assert_ne!(ops.head_sha().await.unwrap().unwrap(), base);
    }

    #[tokio::test]
    async fn revert_resets_and_records_backup_branch() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        let store = EventStore::in_memory("local").unwrap();
        let base = ops.head_sha().await.unwrap().unwrap();

        std::fs::write(dir.path().join("README.md"), "v2\n").unwrap();
        ops.checkpoint(Some("v2".to_string()), &store).await.unwrap();

        let outcome = ops.revert(&base, false).await.unwrap();
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert!(outcome.backup_branch.is_some());
        assert_eq!(ops.head_sha().await.unwrap().unwrap(), base);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "seed\n"
        );
    }

    #[tokio::test]
    async fn revert_rejects_non_ancestor() {
        let dir = TempDir::new().unwrap();
        let ops = init_repo(&dir).await;
        let outcome = ops
            .revert("0000000000000000000000000000000000000000", false)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not an ancestor"));
    }
}
