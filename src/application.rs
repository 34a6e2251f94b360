//! Application layer module
//!
//! Fetch planning and the reconciliation run that orchestrate the domain
//! rules over the infrastructure collaborators.

pub mod dto;
pub mod fetch_planner;
pub mod reconciliation_engine;

pub use dto::{RunOptions, RunOutcome, RunReport};
pub use fetch_planner::{FetchPlan, FetchPlanner, PlanDecision};
pub use reconciliation_engine::ReconciliationEngine;
