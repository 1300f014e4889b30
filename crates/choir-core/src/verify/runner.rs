//! Verifier runner.
//!
//! Executes allowlisted verifier commands inside the sandbox, stores raw
//! output in a content-addressed artifact store, and produces a structured
//! report plus an attestation. Re-running a verifier with identical output
//! yields identical hashes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::sandbox::{SandboxCommand, SandboxHandle, SandboxRunner};
use crate::util;

use super::plan::VerifierSpec;

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Artifact store ──────────────────────────────────────────────────────────

/// Content-addressed artifact directory: files are named by the SHA-256 of
/// their bytes plus a suffix (`.log` raw output, `.json` reports and
/// attestations, `.analysis.json` analyzer output).
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Result<Self, VerifierError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write bytes if absent; returns the hash and path.
    pub fn write_bytes(&self, data: &[u8], suffix: &str) -> Result<(String, PathBuf), VerifierError> {
        let digest = util::sha256_hex(data);
        let path = self.root.join(format!("{digest}{suffix}"));
        if !path.exists() {
            std::fs::write(&path, data)?;
        }
        Ok((digest, path))
    }

    /// Canonical-JSON encode and store.
    pub fn write_json(&self, payload: &Value, suffix: &str) -> Result<(String, PathBuf), VerifierError> {
        self.write_bytes(util::canonical_json(payload).as_bytes(), suffix)
    }
}

// ─── Analyzer seam ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierStatus {
    Pass,
    Fail,
    Blocker,
}

impl VerifierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifierStatus::Pass => "pass",
            VerifierStatus::Fail => "fail",
            VerifierStatus::Blocker => "blocker",
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, VerifierStatus::Pass)
    }
}

/// Structured semantic analysis of a verifier's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputAnalysis {
    pub status: VerifierStatus,
    pub summary: String,
    pub details: Vec<String>,
    pub confidence: f64,
}

/// Optional semantic analyzer that may override the return-code status.
/// No implementation ships here; LLM adapters are external.
#[async_trait]
pub trait OutputAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        command: &str,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<OutputAnalysis, String>;
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Outcome of one verifier execution. The `attestation` value is exactly
/// what was hashed into `attestation_hash`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifierResult {
    pub verifier_id: String,
    pub status: VerifierStatus,
    pub return_code: i32,
    pub artifact_hash: String,
    pub report_hash: String,
    pub attestation_hash: String,
    pub started_at: String,
    pub finished_at: String,
    pub attestation: Value,
}

// ─── Runner ──────────────────────────────────────────────────────────────────

pub struct VerifierRunner {
    artifacts: ArtifactStore,
    sandbox_runner: Arc<dyn SandboxRunner>,
    analyzer: Option<Arc<dyn OutputAnalyzer>>,
}

impl VerifierRunner {
    pub fn new(artifacts: ArtifactStore, sandbox_runner: Arc<dyn SandboxRunner>) -> Self {
        Self {
            artifacts,
            sandbox_runner,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn OutputAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Execute one verifier. Subprocess failures become `fail` attestations,
    /// never errors; only artifact-store I/O can fail here.
    #[tracing::instrument(name = "verifier.run", skip_all, fields(verifier = %spec.verifier_id))]
    pub async fn run(
        &self,
        spec: &VerifierSpec,
        sandbox: Option<&SandboxHandle>,
    ) -> Result<VerifierResult, VerifierError> {
        let started_at = util::utc_now();

        // Anchor a missing or relative cwd at the sandbox workspace root.
        let mut cwd = spec.cwd.clone();
        if let Some(handle) = sandbox {
            let workspace_root = PathBuf::from(&handle.config.workspace_root);
            cwd = match cwd {
                None => Some(workspace_root),
                Some(p) if p.is_relative() => Some(workspace_root.join(p)),
                Some(p) => Some(p),
            };
        }

        let mut command = SandboxCommand::new(spec.command.clone())
            .with_timeout(spec.timeout_seconds);
        if let Some(cwd) = cwd {
            command = command.with_cwd(cwd);
        }
        if let Some(env) = &spec.env {
            command = command.with_env(env.clone());
        }
        if let Some(handle) = sandbox {
            command = command.with_sandbox(handle.clone());
        }

        let exec = match self.sandbox_runner.run(command).await {
            Ok(exec) => exec,
            Err(err) => {
                tracing::warn!(verifier = %spec.verifier_id, %err, "verifier execution failed");
                crate::sandbox::SandboxExec {
                    return_code: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                    timed_out: false,
                }
            }
        };
        let finished_at = util::utc_now();

        let raw = format!("STDOUT\n{}\nSTDERR\n{}", exec.stdout, exec.stderr);
        let (artifact_hash, _) = self.artifacts.write_bytes(raw.as_bytes(), ".log")?;

        let report = json!({
            "verifier_id": spec.verifier_id,
            "command": spec.command,
            "return_code": exec.return_code,
            "artifact_hash": artifact_hash,
            "started_at": started_at,
            "finished_at": finished_at,
        });
        let (report_hash, _) = self.artifacts.write_json(&report, ".json")?;

        let mut analysis_hash = None;
        let mut analysis = None;
        if let Some(analyzer) = &self.analyzer {
            let command_str = spec.command.join(" ");
            match analyzer
                .analyze(&command_str, exec.return_code, &exec.stdout, &exec.stderr)
                .await
            {
                Ok(a) => {
                    let payload = json!({
                        "status": a.status.as_str(),
                        "summary": a.summary,
                        "details": a.details,
                        "confidence": a.confidence,
                    });
                    let (hash, _) = self.artifacts.write_json(&payload, ".analysis.json")?;
                    analysis_hash = Some(hash);
                    analysis = Some(a);
                }
                Err(err) => {
                    tracing::warn!(verifier = %spec.verifier_id, %err, "output analysis failed");
                }
            }
        }

        // The analyzer may override the return-code rule.
        let status = match &analysis {
            Some(a) => a.status,
            None if exec.return_code == 0 => VerifierStatus::Pass,
            None => VerifierStatus::Fail,
        };

        let mut attestation = json!({
            "verifier_id": spec.verifier_id,
            "result": status.as_str(),
            "artifact_hash": artifact_hash,
            "report_hash": report_hash,
            "command": spec.command,
            "return_code": exec.return_code,
            "started_at": started_at,
            "finished_at": finished_at,
            "verifier_version": "v1",
        });
        if let (Some(hash), Some(a)) = (&analysis_hash, &analysis) {
            attestation["analysis_hash"] = json!(hash);
            attestation["analysis_summary"] = json!(a.summary);
            attestation["analysis_confidence"] = json!(a.confidence);
        }
        let (attestation_hash, _) = self.artifacts.write_json(&attestation, ".json")?;

        Ok(VerifierResult {
            verifier_id: spec.verifier_id.clone(),
            status,
            return_code: exec.return_code,
            artifact_hash,
            report_hash,
            attestation_hash,
            started_at,
            finished_at,
            attestation,
        })
    }
}
