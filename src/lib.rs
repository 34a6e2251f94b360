//! Rate Panel - incremental daily panel builder
//!
//! Builds daily time-series panels (interest rates, exchange rates,
//! cross-entity quote tables) from per-day source pages, reconciling every
//! run against a persisted long-format cache so overlapping runs never fetch
//! a known date twice.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{ReconciliationEngine, RunOptions, RunOutcome, RunReport};
pub use domain::{Category, DateRange, IntermediatePanel, PanelError, PanelResult};
