//! Verifier plan selection.
//!
//! Loads the allowlisted verifier catalog and selects a plan from touched
//! paths, mood, risk tier and required verifiers. Selection is deterministic
//! and order-independent over its inputs; the resulting plan is
//! content-addressed by hashing the canonical form of those inputs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::mood::Mood;
use crate::util;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read verifier catalog at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid verifier catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// One allowlisted verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierEntry {
    pub id: String,
    pub command: String,
    /// Per-verifier timeout override, seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Moods this verifier participates in; empty means all moods.
    #[serde(default)]
    pub moods: Vec<String>,
    /// Path scopes: trailing `/` is a prefix, anything else a glob.
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierCatalog {
    #[serde(default)]
    pub verifiers: Vec<VerifierEntry>,
    /// Mood name (upper-case) → verifier ids always included in that mood.
    #[serde(default)]
    pub mood_defaults: std::collections::HashMap<String, Vec<String>>,
}

impl VerifierCatalog {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PlanError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn get(&self, id: &str) -> Option<&VerifierEntry> {
        self.verifiers.iter().find(|v| v.id == id)
    }
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Deterministic, content-addressed verifier selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierPlan {
    pub plan_id: String,
    pub inputs_hash: String,
    pub verifier_ids: Vec<String>,
    pub unknown_required: Vec<String>,
}

/// Strip leading `./` noise and fold backslashes to forward slashes.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches(['.', '/'])
        .to_string()
}

fn matches_scope(touched: &[String], scopes: &[String]) -> bool {
    if scopes.is_empty() {
        return false;
    }
    for scope in scopes {
        let scope_norm = normalize_path(scope);
        if let Some(prefix) = scope_norm.strip_suffix('/') {
            let prefix = format!("{prefix}/");
            if touched.iter().any(|p| p.starts_with(&prefix)) {
                return true;
            }
            continue;
        }
        // A glob; `*` may cross path separators, like fnmatch.
        if let Ok(glob) = Glob::new(&scope_norm) {
            let matcher = glob.compile_matcher();
            if touched.iter().any(|p| matcher.is_match(p)) {
                return true;
            }
        }
    }
    false
}

/// Select the verifier plan for a run.
pub fn select_verifier_plan(
    touched_paths: &[String],
    mood: Option<Mood>,
    required_verifiers: &[String],
    risk_tier: Option<&str>,
    catalog: &VerifierCatalog,
) -> VerifierPlan {
    let mood_key = mood.map(|m| m.as_str().to_string());
    let normalized: Vec<String> = touched_paths.iter().map(|p| normalize_path(p)).collect();

    let mut selected: BTreeSet<String> = BTreeSet::new();
    let mut unknown_required: BTreeSet<String> = BTreeSet::new();

    // Required verifiers are always included when known.
    for id in required_verifiers {
        if catalog.get(id).is_some() {
            selected.insert(id.clone());
        } else {
            unknown_required.insert(id.clone());
        }
    }

    // Mood defaults.
    if let Some(mood_key) = &mood_key {
        if let Some(defaults) = catalog.mood_defaults.get(mood_key) {
            for id in defaults {
                if catalog.get(id).is_some() {
                    selected.insert(id.clone());
                }
            }
        }
    }

    // Scope-based selection over touched paths.
    for verifier in &catalog.verifiers {
        let moods: Vec<String> = verifier.moods.iter().map(|m| m.to_uppercase()).collect();
        if let Some(mood_key) = &mood_key {
            if !moods.is_empty() && !moods.contains(mood_key) {
                continue;
            }
        }
        if matches_scope(&normalized, &verifier.scopes) {
            selected.insert(verifier.id.clone());
        }
    }

    let verifier_ids: Vec<String> = selected.into_iter().collect();
    let unknown_required: Vec<String> = unknown_required.into_iter().collect();

    let touched_set: BTreeSet<String> = normalized.into_iter().collect();
    let mut required_sorted: Vec<&String> = required_verifiers.iter().collect();
    required_sorted.sort();
    required_sorted.dedup();

    let inputs = json!({
        "touched_paths": touched_set.iter().collect::<Vec<_>>(),
        "mood": mood_key,
        "required_verifiers": required_sorted,
        "risk_tier": risk_tier,
        "verifier_ids": verifier_ids,
        "unknown_required": unknown_required,
    });
    let inputs_hash = util::hash_json(&inputs);
    let plan_id = util::sha256_hex(format!("plan:{inputs_hash}").as_bytes());

    VerifierPlan {
        plan_id,
        inputs_hash,
        verifier_ids,
        unknown_required,
    }
}

// ─── Specs ───────────────────────────────────────────────────────────────────

/// A runnable verifier resolved from the catalog.
#[derive(Debug, Clone)]
pub struct VerifierSpec {
    pub verifier_id: String,
    pub command: Vec<String>,
    pub timeout_seconds: u64,
    pub cwd: Option<PathBuf>,
    pub env: Option<std::collections::HashMap<String, String>>,
}

/// Split a catalog command line into argv, honouring single and double
/// quotes.
fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Resolve plan ids into runnable specs. Unknown ids and empty commands are
/// skipped.
pub fn build_verifier_specs(
    verifier_ids: &[String],
    catalog: &VerifierCatalog,
    default_timeout_seconds: u64,
    cwd: Option<&Path>,
) -> Vec<VerifierSpec> {
    let mut specs = Vec::new();
    for id in verifier_ids {
        let Some(entry) = catalog.get(id) else {
            continue;
        };
        let command = split_command(&entry.command);
        if command.is_empty() {
            continue;
        }
        specs.push(VerifierSpec {
            verifier_id: id.clone(),
            command,
            timeout_seconds: entry.timeout_seconds.unwrap_or(default_timeout_seconds),
            cwd: cwd.map(Path::to_path_buf),
            env: None,
        });
    }
    specs
}
