//! ReconciliationEngine - 증분 수집 및 병합 엔진
//!
//! One run over `[start, end]` for every group a [`Category`] declares:
//!
//! 1. first pass, group by group in declaration order, dates ascending:
//!    plan, fetch, parse, normalize, then write each record into both the run
//!    accumulator and the panel snapshot
//! 2. empty detection: a date is a refetch candidate when any of its groups
//!    came back all-null
//! 3. refetch pass over the candidates against a fresh, empty cache
//! 4. merge, refetch values winning per `(group, date)`
//! 5. persist the loaded panel updated with the merge (full overwrite)
//!
//! A run either returns a complete [`RunOutcome`] or the first fatal error.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::dto::{RunOptions, RunOutcome, RunReport};
use crate::application::fetch_planner::{FetchPlanner, PlanDecision};
use crate::domain::category::{Category, SeriesGroup};
use crate::domain::errors::PanelResult;
use crate::domain::normalizer::{normalize_value, RawValue};
use crate::domain::panel::{DayRecord, IntermediatePanel};
use crate::domain::pivot::{fold_zero, panel_from_long, panel_to_long};
use crate::domain::services::{ContentFetcher, PanelStore, TableParser};
use crate::infrastructure::retry_driver::RetryDriver;

/// State owned by a single run. Nothing here outlives [`ReconciliationEngine::run`].
struct RunState {
    driver: RetryDriver,
    /// Persisted panel as loaded at the start of the run.
    base: IntermediatePanel,
    /// What the planner treats as the persisted cache.
    snapshot: IntermediatePanel,
    /// First-pass output.
    accumulator: IntermediatePanel,
    report: RunReport,
}

pub struct ReconciliationEngine<F, P, S> {
    category: Category,
    fetcher: F,
    parser: P,
    store: S,
    planner: FetchPlanner,
}

impl<F, P, S> ReconciliationEngine<F, P, S>
where
    F: ContentFetcher,
    P: TableParser,
    S: PanelStore,
{
    pub fn new(category: Category, fetcher: F, parser: P, store: S) -> Self {
        Self {
            category,
            fetcher,
            parser,
            store,
            planner: FetchPlanner::new(),
        }
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one full reconciliation.
    pub async fn run(&self, options: &RunOptions) -> PanelResult<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("reconcile", run_id = %run_id, category = %self.category.name());
        self.run_inner(run_id, options).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, options: &RunOptions) -> PanelResult<RunOutcome> {
        let range = options.range;
        info!(
            "🚀 Starting reconciliation for '{}' from {} to {} (cache: {}, persist: {})",
            self.category.name(),
            range.start(),
            range.end(),
            options.use_intermediate_panel,
            options.persist
        );

        let loaded = self.store.load()?;
        let base = panel_from_long(&self.category, &loaded, options.duplicate_policy)?;
        let snapshot = if options.use_intermediate_panel {
            base.clone()
        } else {
            IntermediatePanel::new()
        };

        let mut report = RunReport::new(run_id, self.category.name());
        report.dates_requested = range.len();
        report.groups = self.category.groups().len();

        let mut state = RunState {
            driver: RetryDriver::new(options.max_tries),
            base,
            snapshot,
            accumulator: IntermediatePanel::new(),
            report,
        };

        self.first_pass(&mut state, options).await?;

        let candidates = self.empty_groups_by_date(&state.accumulator);
        state.report.refetch_candidates = candidates.len();
        let refetched = self.refetch_pass(&mut state, &candidates).await?;

        let mut merged = std::mem::take(&mut state.accumulator);
        merged.update_from(&refetched);

        state.report.groups_recovered = refetched
            .iter()
            .map(|(_, wide)| wide.values().filter(|r| r.has_data()).count())
            .sum();
        state.report.groups_still_empty = merged
            .iter()
            .map(|(_, wide)| wide.values().filter(|r| r.is_empty()).count())
            .sum();
        if state.report.groups_still_empty > 0 {
            warn!(
                "⚠️ {} (group, date) pair(s) are still empty after the refetch pass",
                state.report.groups_still_empty
            );
        }

        if options.persist {
            state.base.update_from(&merged);
            let records = panel_to_long(&self.category, &state.base);
            self.store.save(&records)?;
            state.report.records_persisted = Some(records.len());
        } else {
            info!("Read-only run, intermediate panel left untouched");
        }

        let stats = state.driver.stats();
        state.report.retries = stats.retries;
        state.report.finish();

        let report = state.report;
        info!(
            "✅ Reconciliation finished: {} fetches, {} cache hits, {} refetch candidates, {} recovered",
            report.fetches, report.cache_hits, report.refetch_candidates, report.groups_recovered
        );
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "📊 Run report"),
            Err(e) => warn!("Could not serialize run report: {}", e),
        }

        Ok(RunOutcome {
            panel: merged.restricted_to(&range),
            report,
        })
    }

    async fn first_pass(&self, state: &mut RunState, options: &RunOptions) -> PanelResult<()> {
        for group in self.category.groups() {
            let plan = self.planner.plan(
                &options.range,
                &group.key,
                &state.snapshot,
                &state.accumulator,
            );
            state.report.cache_hits += plan.cache_hits.len();
            state.report.run_local_hits += plan.run_local_hits.len();

            for date in &plan.cache_hits {
                if let Some(cached) = state.snapshot.get(&group.key, *date) {
                    let mut record = cached.clone();
                    record.fill_declared(group.field_keys());
                    state.accumulator.insert(&group.key, *date, record);
                }
            }

            for date in plan.to_fetch {
                let record = self.fetch_day(&mut state.driver, group, date).await?;
                state.report.fetches += 1;
                debug!(
                    "📥 {} on {}: {}/{} fields",
                    group.key,
                    date,
                    record.non_null_count(),
                    group.fields.len()
                );
                state.snapshot.insert(&group.key, date, record.clone());
                state.accumulator.insert(&group.key, date, record);
            }
        }
        Ok(())
    }

    /// Dates (ascending) mapped to the groups whose first-pass record is all-null.
    fn empty_groups_by_date<'a>(
        &'a self,
        accumulator: &IntermediatePanel,
    ) -> BTreeMap<NaiveDate, Vec<&'a SeriesGroup>> {
        let mut candidates: BTreeMap<NaiveDate, Vec<&SeriesGroup>> = BTreeMap::new();
        for group in self.category.groups() {
            if let Some(wide) = accumulator.group(&group.key) {
                for (date, record) in wide {
                    if record.is_empty() {
                        candidates.entry(*date).or_default().push(group);
                    }
                }
            }
        }
        candidates
    }

    async fn refetch_pass(
        &self,
        state: &mut RunState,
        candidates: &BTreeMap<NaiveDate, Vec<&SeriesGroup>>,
    ) -> PanelResult<IntermediatePanel> {
        let mut refetched = IntermediatePanel::new();
        if candidates.is_empty() {
            return Ok(refetched);
        }
        info!("🔁 Refetching {} date(s) with empty groups", candidates.len());

        let fresh = IntermediatePanel::new();
        for (date, groups) in candidates {
            for group in groups {
                if self.planner.decide(&group.key, *date, &fresh, &refetched) != PlanDecision::Fetch {
                    continue;
                }
                let record = self.fetch_day(&mut state.driver, group, *date).await?;
                state.report.fetches += 1;
                if record.has_data() {
                    info!("🩹 Recovered {} on {}", group.key, date);
                }
                refetched.insert(&group.key, *date, record);
            }
        }
        Ok(refetched)
    }

    /// Fetch, parse and normalize one `(group, date)` into a finalized record.
    async fn fetch_day(
        &self,
        driver: &mut RetryDriver,
        group: &SeriesGroup,
        date: NaiveDate,
    ) -> PanelResult<DayRecord> {
        let payload = driver
            .fetch_with_retry(&self.fetcher, date, &group.key, &group.selector)
            .await?;
        let raw = self
            .parser
            .extract(&payload, date, &group.selector, &group.fields)
            .map_err(|e| e.at(&group.key, date))?;

        let mut record = DayRecord::empty(group.field_keys());
        for field in &group.fields {
            let value = match raw.get(&field.key) {
                Some(v) => normalize_value(v, field.kind, &field.key),
                None => normalize_value(&RawValue::empty(), field.kind, &field.key),
            }
            .map_err(|e| e.at(&group.key, date))?;
            record.set(field.key.as_str(), fold_zero(value));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{FetchError, PanelError};
    use crate::domain::panel::{DateRange, PanelRecord};
    use crate::infrastructure::panel_store::MemoryPanelStore;
    use crate::infrastructure::scripted_source::{ScriptedFetcher, ScriptedTableParser};
    use rust_decimal_macros::dec;

    const PASE: &str = "Tipo de Pase";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 4, day).unwrap()
    }

    fn single_field_category() -> Category {
        Category::exchange_rates(
            "cambio",
            vec![("usd".into(), "2".into(), vec![("tipo_pase".into(), PASE.into())])],
        )
        .unwrap()
    }

    fn two_group_category() -> Category {
        Category::exchange_rates(
            "cambio",
            vec![
                ("usd".into(), "2".into(), vec![("tipo_pase".into(), PASE.into())]),
                ("eur".into(), "98".into(), vec![("tipo_pase".into(), PASE.into())]),
            ],
        )
        .unwrap()
    }

    fn body(date: NaiveDate, value: &str) -> String {
        ScriptedTableParser::line(date, &[(PASE, value)])
    }

    fn engine(
        category: Category,
        fetcher: ScriptedFetcher,
        store: MemoryPanelStore,
    ) -> ReconciliationEngine<ScriptedFetcher, ScriptedTableParser, MemoryPanelStore> {
        ReconciliationEngine::new(category, fetcher, ScriptedTableParser::new(), store)
    }

    #[tokio::test]
    async fn test_single_value_scenario_without_cache() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "0,0084610"));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let options = RunOptions::new(DateRange::single(d(24))).with_cache(false);
        let outcome = engine.run(&options).await.unwrap();

        let record = outcome.panel.get("usd", d(24)).unwrap();
        assert_eq!(record.get("tipo_pase"), Some(dec!(0.0084610)));
        assert_eq!(outcome.report.fetches, 1);
        assert_eq!(outcome.report.refetch_candidates, 0);
        assert_eq!(outcome.report.records_persisted, Some(1));
    }

    #[tokio::test]
    async fn test_dash_value_enters_refetch_pass() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "-"));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let options = RunOptions::new(DateRange::single(d(24))).with_cache(false);
        let outcome = engine.run(&options).await.unwrap();

        let record = outcome.panel.get("usd", d(24)).unwrap();
        assert!(record.is_empty());
        assert_eq!(record.values.len(), 1);
        assert_eq!(outcome.report.refetch_candidates, 1);
        assert_eq!(outcome.report.groups_still_empty, 1);
        assert_eq!(engine.fetcher().calls_for(d(24), "2"), 2);
    }

    #[tokio::test]
    async fn test_refetch_value_takes_precedence() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_payload(d(24), "2", body(d(24), "-"));
        fetcher.insert(d(24), "2", body(d(24), "43,35"));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let outcome = engine
            .run(&RunOptions::new(DateRange::single(d(24))))
            .await
            .unwrap();

        assert_eq!(outcome.panel.get("usd", d(24)).unwrap().get("tipo_pase"), Some(dec!(43.35)));
        assert_eq!(outcome.report.groups_recovered, 1);
        assert_eq!(outcome.report.groups_still_empty, 0);
    }

    #[tokio::test]
    async fn test_only_empty_groups_are_refetched() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "1,5"));
        fetcher.insert(d(24), "98", body(d(24), "0"));
        let engine = engine(two_group_category(), fetcher, MemoryPanelStore::new());

        let outcome = engine
            .run(&RunOptions::new(DateRange::single(d(24))))
            .await
            .unwrap();

        // zero is folded to null, so eur is empty and gets a second fetch
        assert_eq!(engine.fetcher().calls_for(d(24), "2"), 1);
        assert_eq!(engine.fetcher().calls_for(d(24), "98"), 2);
        assert!(outcome.panel.get("eur", d(24)).unwrap().is_empty());
        assert_eq!(outcome.report.refetch_candidates, 1);
    }

    #[tokio::test]
    async fn test_rerun_with_cache_fetches_nothing() {
        let fetcher = ScriptedFetcher::new();
        for day in 22..=24 {
            fetcher.insert(d(day), "2", body(d(day), "10,5"));
        }
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());
        let options = RunOptions::new(DateRange::new(d(22), d(24)).unwrap());

        let first = engine.run(&options).await.unwrap();
        assert_eq!(first.report.fetches, 3);

        engine.fetcher().reset_calls();
        let second = engine.run(&options).await.unwrap();
        assert_eq!(engine.fetcher().calls(), 0);
        assert_eq!(second.report.fetches, 0);
        assert_eq!(second.report.cache_hits, 3);
        assert_eq!(first.panel, second.panel);
    }

    #[tokio::test]
    async fn test_cached_record_is_never_overwritten() {
        let store = MemoryPanelStore::with_records(vec![PanelRecord::new(
            d(24),
            "usd",
            "tipo_pase",
            Some(dec!(1)),
        )]);
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "2"));
        let engine = engine(single_field_category(), fetcher, store);

        let outcome = engine
            .run(&RunOptions::new(DateRange::single(d(24))))
            .await
            .unwrap();
        assert_eq!(outcome.panel.get("usd", d(24)).unwrap().get("tipo_pase"), Some(dec!(1)));
        assert_eq!(engine.fetcher().calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_off_refetches_and_keeps_history() {
        let store = MemoryPanelStore::with_records(vec![
            PanelRecord::new(d(1), "usd", "tipo_pase", Some(dec!(7))),
            PanelRecord::new(d(24), "usd", "tipo_pase", Some(dec!(1))),
        ]);
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "2"));
        let engine = engine(single_field_category(), fetcher, store);

        let options = RunOptions::new(DateRange::single(d(24))).with_cache(false);
        let outcome = engine.run(&options).await.unwrap();

        assert_eq!(outcome.panel.get("usd", d(24)).unwrap().get("tipo_pase"), Some(dec!(2)));
        assert_eq!(outcome.panel.len(), 1);
        let saved = engine.store().records();
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&PanelRecord::new(d(1), "usd", "tipo_pase", Some(dec!(7)))));
    }

    #[tokio::test]
    async fn test_read_only_run_does_not_save() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "2"));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let options = RunOptions::new(DateRange::single(d(24))).with_persist(false);
        let outcome = engine.run(&options).await.unwrap();
        assert_eq!(engine.store().save_count(), 0);
        assert_eq!(outcome.report.records_persisted, None);
    }

    #[tokio::test]
    async fn test_unknown_selector_aborts_without_saving() {
        let fetcher = ScriptedFetcher::new();
        fetcher.reject_selector("98");
        fetcher.insert(d(24), "2", body(d(24), "2"));
        let engine = engine(two_group_category(), fetcher, MemoryPanelStore::new());

        let err = engine
            .run(&RunOptions::new(DateRange::single(d(24))))
            .await
            .unwrap_err();
        match err {
            PanelError::Configuration { group, date, .. } => {
                assert_eq!(group.as_deref(), Some("eur"));
                assert_eq!(date, Some(d(24)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.store().save_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_value_aborts_with_context() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "1,2,3"));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let err = engine
            .run(&RunOptions::new(DateRange::single(d(24))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_value");
        assert!(err.to_string().contains("group=usd"));
        assert_eq!(engine.store().save_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_within_run() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(d(24), "2", body(d(24), "2"));
        fetcher.fail_next(d(24), "2", FetchError::Transient("timeout".into()));
        let engine = engine(single_field_category(), fetcher, MemoryPanelStore::new());

        let options = RunOptions::new(DateRange::single(d(24))).with_max_tries(2);
        let outcome = engine.run(&options).await.unwrap();
        assert_eq!(outcome.report.retries, 1);
        assert_eq!(outcome.report.fetches, 1);
        assert_eq!(outcome.panel.get("usd", d(24)).unwrap().get("tipo_pase"), Some(dec!(2)));
    }
}
