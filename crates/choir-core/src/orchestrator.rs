//! Run orchestration: execute → verify → adjudicate.
//!
//! One run drives an executor inside a sandbox, plans verifiers from the
//! paths the executor touched, runs them, and then either promotes the work
//! (repo checkpoint + sandbox checkpoint + commit request) or rolls both the
//! repository and the sandbox back to the last known-good state. The sandbox
//! is destroyed on every exit path unless the keep flag is set.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::config::SandboxSettings;
use crate::events::EventSource;
use crate::git::GitOps;
use crate::mood::Mood;
use crate::sandbox::{SandboxHandle, SandboxRunner, provider::build_sandbox_config};
use crate::store::{EventStore, Run, RunStatus, RunUpdate, WorkItemStatus, WorkItemUpdate};
use crate::util;
use crate::verify::{
    VerifierCatalog, VerifierPlan, VerifierResult, VerifierRunner, build_verifier_specs,
    select_verifier_plan,
};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Verifier(#[from] crate::verify::VerifierError),

    #[error(transparent)]
    Git(#[from] crate::git::GitError),
}

/// What the executor reports back. Exceptions inside executors are expected
/// to be converted into `Failed` by the executor itself or its wrapper; the
/// orchestrator routes on the variant.
#[derive(Debug, Clone)]
pub enum ExecutorOutcome {
    Ok,
    Failed { reason: String },
}

/// The work performed during a run, handed the freshly created run row.
pub type Executor = Box<dyn FnOnce(Run) -> BoxFuture<'static, ExecutorOutcome> + Send>;

/// Notified after a failed adjudication has rolled the state back.
/// The dev-server manager of the full system sits behind this seam.
pub trait RollbackSink: Send + Sync {
    fn notify(&self, run_id: &str);
}

/// Default sink: log and move on.
pub struct LoggingRollbackSink;

impl RollbackSink for LoggingRollbackSink {
    fn notify(&self, run_id: &str) {
        tracing::info!(run_id, "rollback completed");
    }
}

/// Outcome of one orchestrated run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: Run,
    pub plan: VerifierPlan,
    pub results: Vec<VerifierResult>,
    pub rollback: Option<Value>,
}

impl RunOutcome {
    /// The `verification` frame sent to clients on every terminal state.
    pub fn verification_frame(&self) -> Value {
        let mut frame = json!({
            "run": self.run,
            "verifier_plan": self.plan,
            "results": self.results.iter().map(|r| json!({
                "id": r.verifier_id,
                "status": r.status.as_str(),
            })).collect::<Vec<_>>(),
        });
        if let Some(rollback) = &self.rollback {
            frame["rollback"] = rollback.clone();
        }
        frame
    }
}

pub struct RunOrchestrator {
    store: Arc<EventStore>,
    verifier_runner: Arc<VerifierRunner>,
    sandbox_runner: Arc<dyn SandboxRunner>,
    git: Arc<GitOps>,
    catalog: VerifierCatalog,
    sandbox_settings: SandboxSettings,
    default_verifier_timeout: u64,
    rollback_sink: Arc<dyn RollbackSink>,
}

impl RunOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<EventStore>,
        verifier_runner: Arc<VerifierRunner>,
        sandbox_runner: Arc<dyn SandboxRunner>,
        git: Arc<GitOps>,
        catalog: VerifierCatalog,
        sandbox_settings: SandboxSettings,
        default_verifier_timeout: u64,
    ) -> Self {
        Self {
            store,
            verifier_runner,
            sandbox_runner,
            git,
            catalog,
            sandbox_settings,
            default_verifier_timeout,
            rollback_sink: Arc::new(LoggingRollbackSink),
        }
    }

    pub fn with_rollback_sink(mut self, sink: Arc<dyn RollbackSink>) -> Self {
        self.rollback_sink = sink;
        self
    }

    fn sandbox_checkpoint_key(&self) -> String {
        format!("sandbox_checkpoint:{}", self.store.user_id())
    }

    async fn ensure_last_good_checkpoint(&self) -> Result<(), OrchestratorError> {
        if self.store.get_last_good_checkpoint()?.is_some() {
            return Ok(());
        }
        if let Some(head) = self.git.head_sha().await? {
            self.store.set_last_good_checkpoint(&head)?;
        }
        Ok(())
    }

    /// Provision the sandbox, restoring the user's last sandbox checkpoint
    /// when one exists. Failures are recorded as observations, never fatal.
    async fn create_sandbox(&self, run_id: &str) -> Result<Option<SandboxHandle>, OrchestratorError> {
        let config = build_sandbox_config(
            self.store.user_id(),
            run_id,
            &self.sandbox_settings,
            &self.git.repo_root().display().to_string(),
        );
        let handle = match self.sandbox_runner.create(config).await {
            Ok(handle) => handle,
            Err(err) => {
                self.store.add_run_note(
                    run_id,
                    "note.observation",
                    json!({"event": "sandbox.create", "result": {"success": false, "error": err.to_string()}}),
                )?;
                return Ok(None);
            }
        };
        self.store.add_run_note(
            run_id,
            "note.observation",
            json!({"event": "sandbox.create", "sandbox_id": handle.sandbox_id}),
        )?;

        if let Some(checkpoint_id) = self.store.get_sync_state(&self.sandbox_checkpoint_key())? {
            let result = match self.sandbox_runner.restore(&handle, &checkpoint_id).await {
                Ok(()) => json!({"success": true, "checkpoint_id": checkpoint_id}),
                Err(err) => {
                    json!({"success": false, "checkpoint_id": checkpoint_id, "error": err.to_string()})
                }
            };
            self.store.add_run_note(
                run_id,
                "note.observation",
                json!({"event": "sandbox.restore", "result": result}),
            )?;
        }
        Ok(Some(handle))
    }

    async fn destroy_sandbox(&self, handle: Option<SandboxHandle>) {
        let Some(handle) = handle else {
            return;
        };
        if self.sandbox_settings.keep_on_exit {
            tracing::debug!(sandbox_id = %handle.sandbox_id, "keeping sandbox on exit");
            return;
        }
        if let Err(err) = self.sandbox_runner.destroy(&handle).await {
            tracing::warn!(sandbox_id = %handle.sandbox_id, %err, "sandbox destroy failed");
        }
    }

    /// Drive one run to a terminal state.
    #[tracing::instrument(name = "orchestrator.run", skip_all, fields(work_item = %work_item_id, mood = %mood_seed))]
    pub async fn run(
        &self,
        work_item_id: &str,
        executor: Executor,
        mood_seed: Mood,
    ) -> Result<RunOutcome, OrchestratorError> {
        let run = self.store.create_run(work_item_id, Some(mood_seed), RunStatus::Running)?;
        self.store.update_run(
            &run.id,
            RunUpdate {
                started_at: Some(util::utc_now()),
                ..Default::default()
            },
        )?;
        if self.store.get_work_item(work_item_id)?.is_some() {
            self.store.update_work_item(
                work_item_id,
                WorkItemUpdate {
                    status: Some(WorkItemStatus::InProgress),
                    ..Default::default()
                },
            )?;
        }
        let start_seq = self.store.latest_seq()?;
        self.ensure_last_good_checkpoint().await?;

        self.store.add_run_note(
            &run.id,
            "note.status",
            json!({"status": "running", "mood": mood_seed.as_str(), "stage": "execute"}),
        )?;

        let sandbox = self.create_sandbox(&run.id).await?;
        let result = self
            .run_inner(&run, work_item_id, executor, mood_seed, start_seq, sandbox.as_ref())
            .await;
        // Release sandbox resources on every exit path.
        self.destroy_sandbox(sandbox).await;
        result
    }

    async fn run_inner(
        &self,
        run: &Run,
        work_item_id: &str,
        executor: Executor,
        mood_seed: Mood,
        start_seq: i64,
        sandbox: Option<&SandboxHandle>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let run_id = run.id.clone();

        let outcome = executor(run.clone()).await;
        if let ExecutorOutcome::Failed { reason } = &outcome {
            self.store.add_run_note(
                &run_id,
                "note.hyperthesis",
                json!({"error": reason, "bound": "re-run with isolated executor"}),
            )?;
        }

        // Touched paths are taken strictly after start_seq so concurrent
        // unrelated events do not contaminate the plan.
        let touched_paths = self.store.touched_paths(start_seq)?;
        let work_item = self.store.get_work_item(work_item_id)?;
        let (required_verifiers, risk_tier) = match &work_item {
            Some(item) => (item.required_verifiers.clone(), item.risk_tier.clone()),
            None => (Vec::new(), None),
        };

        let plan = select_verifier_plan(
            &touched_paths,
            Some(mood_seed),
            &required_verifiers,
            risk_tier.as_deref(),
            &self.catalog,
        );
        tracing::debug!(plan_id = %plan.plan_id, verifiers = ?plan.verifier_ids, "verifier plan selected");
        let specs = build_verifier_specs(
            &plan.verifier_ids,
            &self.catalog,
            self.default_verifier_timeout,
            None,
        );

        if let ExecutorOutcome::Failed { .. } = outcome {
            self.store.update_run(
                &run_id,
                RunUpdate {
                    status: Some(RunStatus::Failed),
                    mood: Some(Mood::Skeptical),
                    finished_at: Some(util::utc_now()),
                    ..Default::default()
                },
            )?;
            self.store.add_run_note(
                &run_id,
                "note.status",
                json!({"status": "failed", "mood": "SKEPTICAL", "stage": "verify"}),
            )?;
            let rollback = self.rollback(&run_id, sandbox).await?;
            if work_item.is_some() {
                self.store.update_work_item(
                    work_item_id,
                    WorkItemUpdate {
                        status: Some(WorkItemStatus::Failed),
                        ..Default::default()
                    },
                )?;
            }
            let run = self.must_get_run(&run_id)?;
            return Ok(RunOutcome {
                run,
                plan,
                results: Vec::new(),
                rollback: Some(rollback),
            });
        }

        self.store.update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Verifying),
                ..Default::default()
            },
        )?;
        self.store.add_run_note(
            &run_id,
            "note.status",
            json!({"status": "verifying", "mood": mood_seed.as_str(), "stage": "verify"}),
        )?;

        let mut results = Vec::new();
        for spec in &specs {
            let result = self.verifier_runner.run(spec, sandbox).await?;
            self.store
                .add_run_verification(&run_id, result.attestation.clone())?;
            results.push(result);
        }

        let all_passed = results.iter().all(|r| r.status.passed());
        let final_status = if all_passed {
            RunStatus::Verified
        } else {
            RunStatus::Failed
        };
        self.store.update_run(
            &run_id,
            RunUpdate {
                status: Some(final_status),
                mood: Some(Mood::Skeptical),
                finished_at: Some(util::utc_now()),
                ..Default::default()
            },
        )?;
        self.store.add_run_note(
            &run_id,
            "note.status",
            json!({"status": final_status.as_str(), "mood": "SKEPTICAL", "stage": "adjudicate"}),
        )?;

        let mut rollback = None;
        if all_passed {
            self.promote(&run_id, &plan, &results, sandbox).await?;
            if work_item.is_some() {
                self.store.update_work_item(
                    work_item_id,
                    WorkItemUpdate {
                        status: Some(WorkItemStatus::Done),
                        ..Default::default()
                    },
                )?;
            }
        } else {
            rollback = Some(self.rollback(&run_id, sandbox).await?);
            if work_item.is_some() {
                self.store.update_work_item(
                    work_item_id,
                    WorkItemUpdate {
                        status: Some(WorkItemStatus::Failed),
                        ..Default::default()
                    },
                )?;
            }
        }

        let run = self.must_get_run(&run_id)?;
        Ok(RunOutcome {
            run,
            plan,
            results,
            rollback,
        })
    }

    /// Verified: checkpoint the repository, advance the last-good pointer,
    /// snapshot the sandbox, and emit the commit request.
    async fn promote(
        &self,
        run_id: &str,
        plan: &VerifierPlan,
        results: &[VerifierResult],
        sandbox: Option<&SandboxHandle>,
    ) -> Result<(), OrchestratorError> {
        let checkpoint = self
            .git
            .checkpoint(Some(format!("verified checkpoint: run {run_id}")), &self.store)
            .await?;
        if checkpoint.success {
            if let Some(sha) = &checkpoint.commit_sha {
                self.store.set_last_good_checkpoint(sha)?;
            }
        }
        self.store.add_run_note(
            run_id,
            "note.observation",
            json!({"event": "checkpoint", "result": checkpoint}),
        )?;

        if let Some(handle) = sandbox {
            match self
                .sandbox_runner
                .checkpoint(handle, Some(&format!("run {run_id} verified")))
                .await
            {
                Ok(sandbox_checkpoint) => {
                    self.store.set_sync_state(
                        &self.sandbox_checkpoint_key(),
                        &sandbox_checkpoint.checkpoint_id,
                    )?;
                    self.store.add_run_note(
                        run_id,
                        "note.observation",
                        json!({"event": "sandbox.checkpoint", "result": sandbox_checkpoint}),
                    )?;
                }
                Err(err) => {
                    self.store.add_run_note(
                        run_id,
                        "note.observation",
                        json!({"event": "sandbox.checkpoint", "error": err.to_string()}),
                    )?;
                }
            }
        }

        self.store.add_commit_request(
            run_id,
            json!({
                "verifier_plan": plan,
                "verifier_results": results.iter().map(|r| r.attestation.clone()).collect::<Vec<_>>(),
                "status": "ready_for_review",
            }),
        )?;
        Ok(())
    }

    /// Failed: revert the repository to the last-good checkpoint, restore the
    /// sandbox to its last checkpoint, notify the sink.
    async fn rollback(
        &self,
        run_id: &str,
        sandbox: Option<&SandboxHandle>,
    ) -> Result<Value, OrchestratorError> {
        let last_good = self.store.get_last_good_checkpoint()?;
        let revert_result = match &last_good {
            Some(sha) => Some(self.git.revert(sha, false).await?),
            None => None,
        };
        self.store.add_run_note(
            run_id,
            "note.observation",
            json!({"event": "rollback", "last_good": last_good, "result": revert_result}),
        )?;

        let mut sandbox_restore = None;
        if let Some(handle) = sandbox {
            if let Some(checkpoint_id) = self.store.get_sync_state(&self.sandbox_checkpoint_key())? {
                let result = match self.sandbox_runner.restore(handle, &checkpoint_id).await {
                    Ok(()) => json!({"success": true, "checkpoint_id": checkpoint_id}),
                    Err(err) => {
                        json!({"success": false, "checkpoint_id": checkpoint_id, "error": err.to_string()})
                    }
                };
                self.store.add_run_note(
                    run_id,
                    "note.observation",
                    json!({"event": "sandbox.restore", "result": result}),
                )?;
                sandbox_restore = Some(result);
            }
        }

        self.rollback_sink.notify(run_id);
        Ok(json!({
            "last_good": last_good,
            "result": revert_result,
            "sandbox_restore": sandbox_restore,
        }))
    }

    fn must_get_run(&self, run_id: &str) -> Result<Run, OrchestratorError> {
        Ok(self
            .store
            .get_run(run_id)?
            .ok_or_else(|| crate::store::StoreError::NotFound(format!("run {run_id}")))?)
    }
}

/// Record an AHDB observation receipt for a run, used by executors that keep
/// semantic state.
pub fn record_ahdb_delta(
    store: &EventStore,
    run_id: &str,
    delta: Value,
) -> Result<i64, crate::store::StoreError> {
    store.append(
        "receipt.ahdb.delta",
        json!({"delta": delta, "run_id": run_id}),
        EventSource::System,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::local::LocalSandboxRunner;
    use crate::store::NewWorkItem;
    use crate::verify::ArtifactStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: std::path::PathBuf,
        store: Arc<EventStore>,
        orchestrator: RunOrchestrator,
    }

    async fn git(repo: &std::path::Path, args: &[&str]) {
        let status = tokio::process::Command::new("git")
            .args(args)
            .current_dir(repo)
            .status()
            .await
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    async fn fixture(catalog_yaml: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q"]).await;
        git(&repo, &["config", "user.email", "dev@example.test"]).await;
        git(&repo, &["config", "user.name", "dev"]).await;
        std::fs::write(repo.join("README.md"), "seed\n").unwrap();
        git(&repo, &["add", "-A"]).await;
        git(&repo, &["commit", "-q", "-m", "seed"]).await;

        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let sandbox_runner: Arc<dyn SandboxRunner> =
            Arc::new(LocalSandboxRunner::new(dir.path().join("meta")));
        let artifacts = ArtifactStore::new(dir.path().join("artifacts")).unwrap();
        let verifier_runner = Arc::new(VerifierRunner::new(artifacts, sandbox_runner.clone()));
        let git_ops = Arc::new(GitOps::new(repo.clone(), ".choirignore"));
        let catalog: VerifierCatalog = serde_yaml::from_str(catalog_yaml).unwrap();
        let sandbox_settings = SandboxSettings {
            workspace_root: Some(dir.path().join("work").display().to_string()),
            ..Default::default()
        };

        let orchestrator = RunOrchestrator::new(
            store.clone(),
            verifier_runner,
            sandbox_runner,
            git_ops,
            catalog,
            sandbox_settings,
            60,
        );
        Fixture {
            _dir: dir,
            repo,
            store,
            orchestrator,
        }
    }

    fn touching_executor(store: Arc<EventStore>, repo: std::path::PathBuf) -> Executor {
        Box::new(move |_run| {
            Box::pin(async move {
                std::fs::create_dir_all(repo.join("src")).unwrap();
                std::fs::write(repo.join("src/a.txt"), "agent output\n").unwrap();
                store.log_file_write("src/a.txt", b"agent output\n").unwrap();
                ExecutorOutcome::Ok
            })
        })
    }

    const PASSING_CATALOG: &str = r#"
verifiers:
  - id: V1
    command: "sh -c 'exit 0'"
    moods: [CALM]
    scopes: ["src/*.txt"]
"#;

    const FAILING_CATALOG: &str = r#"
verifiers:
  - id: V1
    command: "sh -c 'exit 2'"
    moods: [CALM]
    scopes: ["src/*.txt"]
"#;

    #[tokio::test]
    async fn happy_verify_promotes_and_updates_last_good() {
        let f = fixture(PASSING_CATALOG).await;
        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "touch a file".to_string(),
                ..Default::default()
            })
            .unwrap();

        let outcome = f
            .orchestrator
            .run(
                &item.id,
                touching_executor(f.store.clone(), f.repo.clone()),
                Mood::Calm,
            )
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Verified);
        assert_eq!(outcome.plan.verifier_ids, vec!["V1"]);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].status.passed());

        // The commit request exists and the last-good pointer moved to the
        // new verified commit.
        let requests = f.store.commit_requests(&outcome.run.id).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload["status"], "ready_for_review");
        let git_ops = GitOps::new(f.repo.clone(), ".choirignore");
        let head = git_ops.head_sha().await.unwrap().unwrap();
        assert_eq!(f.store.get_last_good_checkpoint().unwrap().unwrap(), head);

        // Work item resolved.
        let item = f.store.get_work_item(&item.id).unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Done);

        // Terminal note exists with the adjudicate stage.
        let notes = f.store.run_notes(&outcome.run.id).unwrap();
        assert!(notes.iter().any(|n| {
            n.note_type == "note.status"
                && n.body["stage"] == "adjudicate"
                && n.body["status"] == "verified"
        }));
    }

    #[tokio::test]
    async fn verifier_failure_rolls_back_without_commit_request() {
        let f = fixture(FAILING_CATALOG).await;
        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "touch a file".to_string(),
                ..Default::default()
            })
            .unwrap();
        let git_ops = GitOps::new(f.repo.clone(), ".choirignore");
        let base = git_ops.head_sha().await.unwrap().unwrap();

        let outcome = f
            .orchestrator
            .run(
                &item.id,
                touching_executor(f.store.clone(), f.repo.clone()),
                Mood::Calm,
            )
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert_eq!(outcome.run.mood, Some(Mood::Skeptical));
        assert!(f.store.commit_requests(&outcome.run.id).unwrap().is_empty());
        // Repo back at the previous last-good.
        assert_eq!(git_ops.head_sha().await.unwrap().unwrap(), base);
        assert_eq!(f.store.get_last_good_checkpoint().unwrap().unwrap(), base);
        // The rollback record made it into the outcome.
        let rollback = outcome.rollback.unwrap();
        assert_eq!(rollback["last_good"], base.as_str());

        let item = f.store.get_work_item(&item.id).unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_required_verifier_yields_trivial_verification() {
        let f = fixture(PASSING_CATALOG).await;
        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "no touches".to_string(),
                required_verifiers: vec!["V-UNKNOWN".to_string()],
                ..Default::default()
            })
            .unwrap();

        let noop: Executor = Box::new(|_run| Box::pin(async { ExecutorOutcome::Ok }));
        let outcome = f.orchestrator.run(&item.id, noop, Mood::Calm).await.unwrap();

        assert_eq!(outcome.run.status, RunStatus::Verified);
        assert!(outcome.plan.verifier_ids.is_empty());
        assert_eq!(outcome.plan.unknown_required, vec!["V-UNKNOWN"]);
        assert!(outcome.results.is_empty());
        // The frame surfaces unknown_required.
        let frame = outcome.verification_frame();
        assert_eq!(frame["verifier_plan"]["unknown_required"][0], "V-UNKNOWN");
        // Trivial verification still emits a commit request.
        assert_eq!(f.store.commit_requests(&outcome.run.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn executor_failure_records_hyperthesis_and_rolls_back() {
        let f = fixture(PASSING_CATALOG).await;
        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "will crash".to_string(),
                ..Default::default()
            })
            .unwrap();

        let failing: Executor = Box::new(|_run| {
            Box::pin(async {
                ExecutorOutcome::Failed {
                    reason: "executor panicked: boom".to_string(),
                }
            })
        });
        let outcome = f.orchestrator.run(&item.id, failing, Mood::Calm).await.unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert!(outcome.results.is_empty());
        assert!(outcome.rollback.is_some());

        let notes = f.store.run_notes(&outcome.run.id).unwrap();
        assert!(notes.iter().any(|n| {
            n.note_type == "note.hyperthesis" && n.body["error"].as_str().unwrap().contains("boom")
        }));
        // Failed implies no commit request.
        assert!(f.store.commit_requests(&outcome.run.id).unwrap().is_empty());
    }

    struct CountingSink(AtomicUsize);

    impl RollbackSink for CountingSink {
        fn notify(&self, _run_id: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn rollback_sink_is_notified_on_failure_only() {
        let f = fixture(FAILING_CATALOG).await;
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let orchestrator = f.orchestrator.with_rollback_sink(sink.clone());

        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "fails verification".to_string(),
                ..Default::default()
            })
            .unwrap();
        orchestrator
            .run(
                &item.id,
                touching_executor(f.store.clone(), f.repo.clone()),
                Mood::Calm,
            )
            .await
            .unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn touched_paths_ignore_events_before_start_seq() {
        let f = fixture(PASSING_CATALOG).await;
        // A stale file event from before the run must not select verifiers.
        f.store.log_file_write("src/stale.txt", b"old").unwrap();
        let item = f
            .store
            .create_work_item(NewWorkItem {
                description: "no touches".to_string(),
                ..Default::default()
            })
            .unwrap();
        let noop: Executor = Box::new(|_run| Box::pin(async { ExecutorOutcome::Ok }));
        let outcome = f.orchestrator.run(&item.id, noop, Mood::Calm).await.unwrap();
        assert!(outcome.plan.verifier_ids.is_empty());
    }
}
