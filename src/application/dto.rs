//! Data Transfer Objects for reconciliation runs
//!
//! Options passed into the engine and the report/outcome handed back to the
//! binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::panel::{DateRange, IntermediatePanel};
use crate::domain::pivot::DuplicatePolicy;

// ============================================================================
// Run options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub range: DateRange,
    /// Consult the persisted panel when planning.
    pub use_intermediate_panel: bool,
    /// `false` is a read-only invocation: nothing is written back.
    pub persist: bool,
    pub max_tries: u32,
    pub duplicate_policy: DuplicatePolicy,
}

impl RunOptions {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            use_intermediate_panel: true,
            persist: true,
            max_tries: crate::infrastructure::config::defaults::MAX_TRIES,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_cache(mut self, use_intermediate_panel: bool) -> Self {
        self.use_intermediate_panel = use_intermediate_panel;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Summary of one run, logged when the run completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub category: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dates_requested: usize,
    pub groups: usize,
    pub fetches: usize,
    pub retries: usize,
    pub cache_hits: usize,
    pub run_local_hits: usize,
    /// Dates with at least one empty group after the first pass.
    pub refetch_candidates: usize,
    /// `(group, date)` pairs filled in by the refetch pass.
    pub groups_recovered: usize,
    /// `(group, date)` pairs that are still all-null after the refetch pass.
    pub groups_still_empty: usize,
    /// Long records written to the store, `None` when not persisted.
    pub records_persisted: Option<usize>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            category: category.into(),
            started_at: Utc::now(),
            finished_at: None,
            dates_requested: 0,
            groups: 0,
            fetches: 0,
            retries: 0,
            cache_hits: 0,
            run_local_hits: 0,
            refetch_candidates: 0,
            groups_recovered: 0,
            groups_still_empty: 0,
            records_persisted: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// What a completed run returns. There is no partial outcome: a failed run
/// returns an error instead.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Merged result restricted to the requested range.
    pub panel: IntermediatePanel,
    pub report: RunReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_run_options_builder() {
        let day = NaiveDate::from_ymd_opt(2019, 4, 24).unwrap();
        let opts = RunOptions::new(DateRange::single(day))
            .with_cache(false)
            .with_persist(false)
            .with_max_tries(5)
            .with_duplicate_policy(DuplicatePolicy::Sum);
        assert!(!opts.use_intermediate_panel);
        assert!(!opts.persist);
        assert_eq!(opts.max_tries, 5);
        assert_eq!(opts.duplicate_policy, DuplicatePolicy::Sum);
    }

    #[test]
    fn test_report_serializes_for_logging() {
        let mut report = RunReport::new("run-1", "cambio");
        report.fetches = 3;
        report.finish();
        assert!(report.duration_ms().is_some());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["category"], "cambio");
        assert_eq!(json["fetches"], 3);
        assert!(json["records_persisted"].is_null());
    }
}
