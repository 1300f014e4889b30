//! Verification: deterministic plan selection plus content-addressed
//! execution records.

pub mod plan;
pub mod runner;

pub use plan::{
    PlanError, VerifierCatalog, VerifierEntry, VerifierPlan, VerifierSpec, build_verifier_specs,
    select_verifier_plan,
};
pub use runner::{
    ArtifactStore, OutputAnalysis, OutputAnalyzer, VerifierError, VerifierResult, VerifierRunner,
    VerifierStatus,
};
