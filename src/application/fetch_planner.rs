//! FetchPlanner - 날짜별 수집 계획 수립
//!
//! Decides which dates of a range still need a fetch for one group. Two-tier
//! skip, evaluated in this order for every date, ascending:
//! 1. the run accumulator already holds a non-empty record (run-local hit)
//! 2. the panel snapshot holds a non-empty record (cache hit)
//!
//! Anything else is planned for fetching.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::domain::panel::{DateRange, IntermediatePanel};

/// Why a date was or was not planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDecision {
    RunLocalHit,
    CacheHit,
    Fetch,
}

/// 수집 계획
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchPlan {
    pub group_key: String,
    /// Dates to fetch, ascending.
    pub to_fetch: Vec<NaiveDate>,
    pub run_local_hits: Vec<NaiveDate>,
    pub cache_hits: Vec<NaiveDate>,
}

impl FetchPlan {
    pub fn is_fully_cached(&self) -> bool {
        self.to_fetch.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchPlanner;

impl FetchPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Decision for a single `(group, date)`.
    pub fn decide(
        &self,
        group_key: &str,
        date: NaiveDate,
        panel_snapshot: &IntermediatePanel,
        already_fetched: &IntermediatePanel,
    ) -> PlanDecision {
        if already_fetched.has_data(group_key, date) {
            PlanDecision::RunLocalHit
        } else if panel_snapshot.has_data(group_key, date) {
            PlanDecision::CacheHit
        } else {
            PlanDecision::Fetch
        }
    }

    /// Ordered dates of `range` that must be fetched for `group_key`.
    pub fn plan(
        &self,
        range: &DateRange,
        group_key: &str,
        panel_snapshot: &IntermediatePanel,
        already_fetched: &IntermediatePanel,
    ) -> FetchPlan {
        let mut plan = FetchPlan {
            group_key: group_key.to_string(),
            ..FetchPlan::default()
        };
        for date in range.days() {
            match self.decide(group_key, date, panel_snapshot, already_fetched) {
                PlanDecision::RunLocalHit => plan.run_local_hits.push(date),
                PlanDecision::CacheHit => plan.cache_hits.push(date),
                PlanDecision::Fetch => plan.to_fetch.push(date),
            }
        }
        debug!(
            "📋 Plan for '{}': {} to fetch, {} cache hits, {} run-local hits",
            group_key,
            plan.to_fetch.len(),
            plan.cache_hits.len(),
            plan.run_local_hits.len()
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::panel::DayRecord;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 4, day).unwrap()
    }

    fn filled() -> DayRecord {
        let mut rec = DayRecord::empty(["v"]);
        rec.set("v", Some(dec!(1)));
        rec
    }

    #[test]
    fn test_everything_fetched_without_caches() {
        let range = DateRange::new(d(22), d(24)).unwrap();
        let plan = FetchPlanner::new().plan(
            &range,
            "usd",
            &IntermediatePanel::new(),
            &IntermediatePanel::new(),
        );
        assert_eq!(plan.to_fetch, vec![d(22), d(23), d(24)]);
        assert!(!plan.is_fully_cached());
    }

    #[test]
    fn test_two_tier_skip_order() {
        let range = DateRange::new(d(22), d(25)).unwrap();
        let mut snapshot = IntermediatePanel::new();
        snapshot.insert("usd", d(22), filled());
        snapshot.insert("usd", d(23), filled());
        // empty cached records do not count as hits
        snapshot.insert("usd", d(24), DayRecord::empty(["v"]));

        let mut run = IntermediatePanel::new();
        run.insert("usd", d(23), filled());

        let plan = FetchPlanner::new().plan(&range, "usd", &snapshot, &run);
        assert_eq!(plan.run_local_hits, vec![d(23)]);
        assert_eq!(plan.cache_hits, vec![d(22)]);
        assert_eq!(plan.to_fetch, vec![d(24), d(25)]);
    }

    #[test]
    fn test_hits_are_per_group() {
        let range = DateRange::single(d(24));
        let mut snapshot = IntermediatePanel::new();
        snapshot.insert("eur", d(24), filled());
        let planner = FetchPlanner::new();
        assert_eq!(
            planner.decide("usd", d(24), &snapshot, &IntermediatePanel::new()),
            PlanDecision::Fetch
        );
        assert!(planner
            .plan(&range, "eur", &snapshot, &IntermediatePanel::new())
            .is_fully_cached());
    }
}
