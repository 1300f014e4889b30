//! End-to-end run lifecycle: a prompt drives the agent loop (scripted
//! provider), the tools mutate the repository and emit events, the planner
//! selects verifiers from the touched paths, and adjudication either
//! promotes or rolls back.
//!
//! Run with: cargo test --test integration_run_lifecycle

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use choir_core::agent::ralph::{RalphConfig, RalphLoop};
use choir_core::ai::provider::mock::MockProvider;
use choir_core::config::SandboxSettings;
use choir_core::git::GitOps;
use choir_core::history::FileHistory;
use choir_core::mood::Mood;
use choir_core::orchestrator::{Executor, ExecutorOutcome, RunOrchestrator};
use choir_core::sandbox::SandboxRunner;
use choir_core::sandbox::local::LocalSandboxRunner;
use choir_core::store::{EventStore, NewWorkItem, RunStatus};
use choir_core::tools::standard_registry;
use choir_core::verify::{ArtifactStore, VerifierCatalog, VerifierRunner};

struct Harness {
    _dir: TempDir,
    repo: PathBuf,
    store: Arc<EventStore>,
    registry: Arc<choir_core::tools::ToolRegistry>,
    orchestrator: RunOrchestrator,
}

async fn git(repo: &Path, args: &[&str]) {
    let status = tokio::process::Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

async fn harness(verifier_command: &str) -> Harness {
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
    let history = Arc::new(FileHistory::new());
    let git_ops = Arc::new(GitOps::new(repo.clone(), ".choirignore"));
    let registry = Arc::new(standard_registry(
        repo.clone(),
        dir.path().join("logs"),
        store.clone(),
        history,
        git_ops.clone(),
    ));

    let sandbox_runner: Arc<dyn SandboxRunner> =
        Arc::new(LocalSandboxRunner::new(dir.path().join("meta")));
    let artifacts = ArtifactStore::new(dir.path().join("artifacts")).unwrap();
    let verifier_runner = Arc::new(VerifierRunner::new(artifacts, sandbox_runner.clone()));

    let catalog: VerifierCatalog = serde_yaml::from_str(&format!(
        r#"
verifiers:
  - id: V1
    command: "{verifier_command}"
    moods: [CALM]
    scopes: ["src/*.txt"]
"#
    ))
    .unwrap();

    let orchestrator = RunOrchestrator::new(
        store.clone(),
        verifier_runner,
        sandbox_runner,
        git_ops,
        catalog,
        SandboxSettings {
            workspace_root: Some(dir.path().join("work").display().to_string()),
            ..Default::default()
        },
        60,
    );

    Harness {
        _dir: dir,
        repo,
        store,
        registry,
        orchestrator,
    }
}

/// An executor that drives the Ralph loop with a scripted provider: one
/// write_file tool call, then a final text reply.
fn agent_executor(h: &Harness) -> Executor {
    let provider = Arc::new(MockProvider::new(vec![
        MockProvider::tool_use_response(
            "tu_1",
            "write_file",
            json!({"path": "src/a.txt", "content": "the agent wrote this\n"}),
        ),
        MockProvider::text_response("Wrote src/a.txt as requested."),
    ]));
    let registry = h.registry.clone();
    let store = h.store.clone();
    Box::new(move |_run| {
        Box::pin(async move {
            let ralph = RalphLoop::new(provider, registry, store, RalphConfig::default());
            let (tx, _rx) = mpsc::channel(256);
            match ralph.process("please create src/a.txt", &tx).await {
                Ok(_) => ExecutorOutcome::Ok,
                Err(e) => ExecutorOutcome::Failed {
                    reason: e.to_string(),
                },
            }
        })
    })
}

#[tokio::test]
async fn verified_run_commits_and_requests_review() {
    let h = harness("sh -c 'exit 0'").await;
    let item = h
        .store
        .create_work_item(NewWorkItem {
            description: "create src/a.txt".to_string(),
            ..Default::default()
        })
        .unwrap();
    let git_ops = GitOps::new(h.repo.clone(), ".choirignore");
    let base = git_ops.head_sha().await.unwrap().unwrap();

    let outcome = h
        .orchestrator
        .run(&item.id, agent_executor(&h), Mood::Calm)
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Verified);
    assert_eq!(outcome.plan.verifier_ids, vec!["V1"]);

    // The agent's side effects are in the log.
    assert_eq!(h.store.events(0, Some("tool.call"), 10).unwrap().len(), 1);
    let writes = h.store.events(0, Some("file.write"), 10).unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].payload["path"], "src/a.txt");

    // HEAD advanced past the seed commit and carries the new file.
    let head = git_ops.head_sha().await.unwrap().unwrap();
    assert_ne!(head, base);
    assert_eq!(h.store.get_last_good_checkpoint().unwrap().unwrap(), head);
    assert!(h.repo.join("src/a.txt").is_file());

    // A single commit request with the plan and attestation set inline.
    let requests = h.store.commit_requests(&outcome.run.id).unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload["verifier_plan"]["plan_id"], outcome.plan.plan_id);
    assert_eq!(
        requests[0].payload["verifier_results"][0]["verifier_id"],
        "V1"
    );
}

#[tokio::test]
async fn failed_verification_rolls_repo_back() {
    let h = harness("sh -c 'exit 2'").await;
    let item = h
        .store
        .create_work_item(NewWorkItem {
            description: "create src/a.txt".to_string(),
            ..Default::default()
        })
        .unwrap();
    let git_ops = GitOps::new(h.repo.clone(), ".choirignore");
    let base = git_ops.head_sha().await.unwrap().unwrap();

    let outcome = h
        .orchestrator
        .run(&item.id, agent_executor(&h), Mood::Calm)
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(git_ops.head_sha().await.unwrap().unwrap(), base);
    assert!(h.store.commit_requests(&outcome.run.id).unwrap().is_empty());

    // The attestation for the failing verifier was still recorded.
    let verifications = h.store.run_verifications(&outcome.run.id).unwrap();
    assert_eq!(verifications.len(), 1);
    assert_eq!(verifications[0].attestation["result"], "fail");

    // Rebuilding projections reproduces the recorded state.
    let notes_before = h.store.run_notes(&outcome.run.id).unwrap().len();
    h.store.rebuild_projections().unwrap();
    assert_eq!(h.store.run_notes(&outcome.run.id).unwrap().len(), notes_before);
    assert_eq!(h.store.run_verifications(&outcome.run.id).unwrap().len(), 1);
}
