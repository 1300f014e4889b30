//! choir-core — supervised agent execution.
//!
//! Prompts drive tool-using LLM runs inside an isolated sandbox; a
//! mood-governed orchestrator plans verifiers over the paths each run
//! touched, executes them, and either promotes the work (repository
//! checkpoint + commit request) or rolls repository and sandbox back to the
//! last known-good state. Every meaningful action is an event in an
//! append-only log; projections are derived, disposable and rebuildable.
//!
//! Module map:
//! - [`events`] — event model, canonical vocabulary, best-effort mirror
//! - [`store`] — append-only log + materialized projections on SQLite
//! - [`mood`] — pure mood selection and transition
//! - [`sandbox`] — provider-agnostic sandbox lifecycle (local, hosted)
//! - [`verify`] — deterministic verifier planning and content-addressed runs
//! - [`ai`] — LLM provider seam with tool-use content blocks
//! - [`tools`] — the agent's tool surface (files, shell, git)
//! - [`agent`] — the Ralph loop and task contract
//! - [`orchestrator`] — the run state machine binding it all
//! - [`git`] — checkpoint/revert with `.choirignore` filtering
//! - [`history`] — pre-mutation file snapshots for undo
//! - [`gateway`] — axum control surface and `/agent` WebSocket (feature
//!   `gateway`)

pub mod agent;
pub mod ai;
pub mod config;
pub mod events;
pub mod git;
pub mod history;
pub mod mood;
pub mod orchestrator;
pub mod sandbox;
pub mod store;
pub mod tools;
pub mod util;
pub mod verify;

#[cfg(feature = "gateway")]
pub mod gateway;
