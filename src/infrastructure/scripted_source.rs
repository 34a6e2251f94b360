//! # Scripted content source
//!
//! Deterministic, offline fetcher and parser. The fetcher serves payloads
//! registered per `(date, selector)` and can be told to fail the next N
//! calls; the parser reads a pipe-delimited line format:
//!
//! ```text
//! 24/04/2019|Tipo de Pase=0,0084610|Tipo de Cotizacion=43,3500
//! ```
//!
//! Used by the test suites and for dry runs against captured data.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::category::FieldDeclaration;
use crate::domain::errors::{FetchError, PanelResult};
use crate::domain::normalizer::{normalize_date, RawValue};
use crate::domain::services::{ContentFetcher, RawPayload, TableParser};

type Key = (NaiveDate, String);

#[derive(Debug, Default)]
struct ScriptState {
    payloads: HashMap<Key, String>,
    queued: HashMap<Key, VecDeque<String>>,
    failures: HashMap<Key, VecDeque<FetchError>>,
    unknown_selectors: HashSet<String>,
    calls: Vec<Key>,
}

/// Fetcher that replays registered payloads.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    state: Mutex<ScriptState>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `body` for `(date, selector)`; unregistered keys get an empty payload.
    pub fn insert(&self, date: NaiveDate, selector: &str, body: impl Into<String>) {
        self.state()
            .payloads
            .insert((date, selector.to_string()), body.into());
    }

    /// Serve `body` once for `(date, selector)`, ahead of the standing payload.
    pub fn push_payload(&self, date: NaiveDate, selector: &str, body: impl Into<String>) {
        self.state()
            .queued
            .entry((date, selector.to_string()))
            .or_default()
            .push_back(body.into());
    }

    /// Fail the next call for `(date, selector)` with `error`. Queued failures
    /// are consumed in order before any payload is served.
    pub fn fail_next(&self, date: NaiveDate, selector: &str, error: FetchError) {
        self.state()
            .failures
            .entry((date, selector.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Every call for `selector` fails with `NotFound`.
    pub fn reject_selector(&self, selector: &str) {
        self.state().unknown_selectors.insert(selector.to_string());
    }

    pub fn calls(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls_for(&self, date: NaiveDate, selector: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(d, s)| *d == date && s == selector)
            .count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, date: NaiveDate, selector: &str) -> Result<RawPayload, FetchError> {
        let mut state = self.state();
        let key = (date, selector.to_string());
        state.calls.push(key.clone());

        if state.unknown_selectors.contains(selector) {
            return Err(FetchError::NotFound(format!("no page for selector '{selector}'")));
        }
        if let Some(err) = state.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(body) = state.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            return Ok(RawPayload::new(body));
        }
        Ok(RawPayload::new(
            state.payloads.get(&key).cloned().unwrap_or_default(),
        ))
    }
}

/// Parser for the pipe-delimited scripted format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedTableParser;

impl ScriptedTableParser {
    pub fn new() -> Self {
        Self
    }

    /// Render one line of the scripted format.
    pub fn line(date: NaiveDate, cells: &[(&str, &str)]) -> String {
        let mut line = date.format("%d/%m/%Y").to_string();
        for (label, value) in cells {
            line.push('|');
            line.push_str(label);
            line.push('=');
            line.push_str(value);
        }
        line
    }
}

impl TableParser for ScriptedTableParser {
    fn extract(
        &self,
        payload: &RawPayload,
        date: NaiveDate,
        _selector: &str,
        fields: &[FieldDeclaration],
    ) -> PanelResult<HashMap<String, RawValue>> {
        let row = payload.body.lines().find_map(|line| {
            let mut cells = line.split('|');
            let first = cells.next()?;
            match normalize_date(first) {
                Ok(d) if d == date => Some(
                    cells
                        .filter_map(|c| c.split_once('='))
                        .map(|(label, value)| (label.trim(), value))
                        .collect::<HashMap<_, _>>(),
                ),
                _ => None,
            }
        });

        Ok(fields
            .iter()
            .map(|f| {
                let raw = row
                    .as_ref()
                    .and_then(|r| r.get(f.label.as_str()))
                    .map_or_else(RawValue::empty, |v| RawValue::from(*v));
                (f.key.clone(), raw)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::ValueKind;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 4, 24).unwrap()
    }

    fn fields() -> Vec<FieldDeclaration> {
        vec![
            FieldDeclaration::new("tipo_pase", "Tipo de Pase", ValueKind::Level),
            FieldDeclaration::new("tipo_cotizacion", "Tipo de Cotizacion", ValueKind::Level),
        ]
    }

    #[test]
    fn test_parser_reads_matching_row() {
        let body = [
            ScriptedTableParser::line(
                NaiveDate::from_ymd_opt(2019, 4, 23).unwrap(),
                &[("Tipo de Pase", "9,9")],
            ),
            ScriptedTableParser::line(day(), &[("Tipo de Pase", "0,0084610")]),
        ]
        .join("\n");
        let out = ScriptedTableParser
            .extract(&RawPayload::new(body), day(), "usd", &fields())
            .unwrap();
        assert_eq!(out["tipo_pase"], RawValue::from("0,0084610"));
        assert_eq!(out["tipo_cotizacion"], RawValue::empty());
    }

    #[test]
    fn test_parser_returns_all_empty_without_row() {
        let out = ScriptedTableParser
            .extract(&RawPayload::default(), day(), "usd", &fields())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.values().all(|v| *v == RawValue::empty()));
    }

    #[tokio::test]
    async fn test_fetcher_consumes_failures_then_serves_payload() {
        let fetcher = ScriptedFetcher::new();
        fetcher.insert(day(), "usd", "body");
        fetcher.fail_next(day(), "usd", FetchError::Transient("reset".into()));
        assert!(fetcher.fetch(day(), "usd").await.is_err());
        assert_eq!(fetcher.fetch(day(), "usd").await.unwrap().body, "body");
        assert_eq!(fetcher.calls_for(day(), "usd"), 2);

        fetcher.push_payload(day(), "usd", "once");
        assert_eq!(fetcher.fetch(day(), "usd").await.unwrap().body, "once");
        assert_eq!(fetcher.fetch(day(), "usd").await.unwrap().body, "body");

        fetcher.reject_selector("xxx");
        assert!(matches!(
            fetcher.fetch(day(), "xxx").await,
            Err(FetchError::NotFound(_))
        ));
    }
}
