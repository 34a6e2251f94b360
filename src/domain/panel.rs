//! Panel data model
//!
//! Long format ([`PanelRecord`]) is what gets persisted; wide format
//! ([`DayRecord`], [`WidePanel`]) is what the engine and the exporters work
//! with. [`IntermediatePanel`] is the whole cache keyed by group then date.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::errors::{PanelError, PanelResult};

/// One leaf value of the long-format table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRecord {
    pub date: NaiveDate,
    pub group_key: String,
    pub field_key: String,
    pub value: Option<Decimal>,
}

impl PanelRecord {
    pub fn new(
        date: NaiveDate,
        group_key: impl Into<String>,
        field_key: impl Into<String>,
        value: Option<Decimal>,
    ) -> Self {
        Self {
            date,
            group_key: group_key.into(),
            field_key: field_key.into(),
            value,
        }
    }
}

/// All fields of one group on one date. Missing data is `None`, never an
/// absent key, once the record has been finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    pub values: BTreeMap<String, Option<Decimal>>,
}

impl DayRecord {
    /// Record with every declared field present and null.
    pub fn empty<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            values: fields.into_iter().map(|f| (f.to_string(), None)).collect(),
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: Option<Decimal>) {
        self.values.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<Decimal> {
        self.values.get(field).copied().flatten()
    }

    /// True when every field is null (or there are no fields at all).
    pub fn is_empty(&self) -> bool {
        self.values.values().all(Option::is_none)
    }

    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    pub fn non_null_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    /// Insert a null for every declared field that is not present yet.
    pub fn fill_declared<'a>(&mut self, fields: impl IntoIterator<Item = &'a str>) {
        for f in fields {
            self.values.entry(f.to_string()).or_insert(None);
        }
    }
}

/// Wide view of one group: `date -> DayRecord`, ordered by date.
pub type WidePanel = BTreeMap<NaiveDate, DayRecord>;

/// The whole cache, `group_key -> date -> DayRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediatePanel {
    groups: BTreeMap<String, WidePanel>,
}

impl IntermediatePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_key: &str, date: NaiveDate) -> Option<&DayRecord> {
        self.groups.get(group_key).and_then(|g| g.get(&date))
    }

    pub fn insert(&mut self, group_key: &str, date: NaiveDate, record: DayRecord) {
        self.groups
            .entry(group_key.to_string())
            .or_default()
            .insert(date, record);
    }

    /// True when the `(group, date)` entry has at least one non-null field.
    pub fn has_data(&self, group_key: &str, date: NaiveDate) -> bool {
        self.get(group_key, date).is_some_and(DayRecord::has_data)
    }

    pub fn group(&self, group_key: &str) -> Option<&WidePanel> {
        self.groups.get(group_key)
    }

    pub fn set_group(&mut self, group_key: &str, wide: WidePanel) {
        self.groups.insert(group_key.to_string(), wide);
    }

    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WidePanel)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overwrite `(group, date)` entries with every entry of `other`.
    pub fn update_from(&mut self, other: &IntermediatePanel) {
        for (group_key, wide) in &other.groups {
            let target = self.groups.entry(group_key.clone()).or_default();
            for (date, record) in wide {
                target.insert(*date, record.clone());
            }
        }
    }

    /// Copy of the panel restricted to the dates of `range`.
    pub fn restricted_to(&self, range: &DateRange) -> IntermediatePanel {
        let groups = self
            .groups
            .iter()
            .map(|(k, wide)| {
                let kept = wide
                    .range(range.start()..=range.end())
                    .map(|(d, r)| (*d, r.clone()))
                    .collect();
                (k.clone(), kept)
            })
            .collect();
        IntermediatePanel { groups }
    }

    /// Number of `(group, date)` entries.
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive, contiguous date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> PanelResult<Self> {
        if start > end {
            return Err(PanelError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len(&self) -> usize {
        usize::try_from((self.end - self.start).num_days() + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Dates in ascending order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let current = next?;
            next = if current < self.end {
                Some(current + Duration::days(1))
            } else {
                None
            };
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_date_range_is_inclusive_and_ascending() {
        let range = DateRange::new(d(2019, 2, 27), d(2019, 3, 2)).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(days, vec![d(2019, 2, 27), d(2019, 2, 28), d(2019, 3, 1), d(2019, 3, 2)]);
        assert_eq!(range.len(), 4);
    }

    #[test]
    fn test_date_range_rejects_reversed_bounds() {
        let err = DateRange::new(d(2019, 3, 2), d(2019, 3, 1)).unwrap_err();
        assert_eq!(err.kind(), "invalid_date_range");
    }

    #[test]
    fn test_single_day_range() {
        let range = DateRange::single(d(2019, 4, 24));
        assert_eq!(range.days().count(), 1);
    }

    #[test]
    fn test_day_record_emptiness() {
        let mut rec = DayRecord::empty(["7", "30"]);
        assert!(rec.is_empty());
        rec.set("30", Some(dec!(0.25)));
        assert!(rec.has_data());
        assert_eq!(rec.non_null_count(), 1);
        assert_eq!(rec.get("30"), Some(dec!(0.25)));
        assert_eq!(rec.get("7"), None);
    }

    #[test]
    fn test_update_from_overwrites_per_group_and_date() {
        let mut first = IntermediatePanel::new();
        let mut a = DayRecord::empty(["v"]);
        a.set("v", Some(dec!(1)));
        first.insert("usd", d(2019, 1, 1), a);
        first.insert("usd", d(2019, 1, 2), DayRecord::empty(["v"]));

        let mut second = IntermediatePanel::new();
        let mut b = DayRecord::empty(["v"]);
        b.set("v", Some(dec!(2)));
        second.insert("usd", d(2019, 1, 2), b.clone());
        second.insert("eur", d(2019, 1, 3), b.clone());

        first.update_from(&second);
        assert_eq!(first.get("usd", d(2019, 1, 1)).unwrap().get("v"), Some(dec!(1)));
        assert_eq!(first.get("usd", d(2019, 1, 2)), Some(&b));
        assert_eq!(first.get("eur", d(2019, 1, 3)), Some(&b));
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_restricted_to_drops_out_of_range_dates() {
        let mut panel = IntermediatePanel::new();
        panel.insert("usd", d(2019, 1, 1), DayRecord::empty(["v"]));
        panel.insert("usd", d(2019, 1, 5), DayRecord::empty(["v"]));
        let range = DateRange::new(d(2019, 1, 2), d(2019, 1, 6)).unwrap();
        let sub = panel.restricted_to(&range);
        assert_eq!(sub.len(), 1);
        assert!(sub.get("usd", d(2019, 1, 5)).is_some());
    }
}
