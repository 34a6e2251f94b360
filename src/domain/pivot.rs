//! Long/wide pivot transformer
//!
//! `to_wide` groups long records by date into one [`DayRecord`] per date,
//! with every declared field present. Zero is folded to null: the source
//! publishes `0` for "market closed / no quote", never for a real price.
//! `to_long` is the inverse and always emits one record per declared field.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::domain::category::Category;
use crate::domain::errors::{PanelError, PanelResult};
use crate::domain::panel::{DayRecord, IntermediatePanel, PanelRecord, WidePanel};

/// What to do when a `(date, group, field)` appears more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with [`PanelError::DuplicateRecord`].
    #[default]
    Reject,
    /// Add the values up, as older caches were pivoted.
    Sum,
}

/// Zero means "no quote" at the source.
pub fn fold_zero(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| !v.is_zero())
}

fn add_values(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Pivot the records of `group_key` into wide format.
pub fn to_wide(
    records: &[PanelRecord],
    group_key: &str,
    declared_fields: &[&str],
    policy: DuplicatePolicy,
) -> PanelResult<WidePanel> {
    let declared: HashSet<&str> = declared_fields.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut raw: BTreeMap<chrono::NaiveDate, BTreeMap<&str, Option<Decimal>>> = BTreeMap::new();
    let mut ignored = 0usize;

    for record in records.iter().filter(|r| r.group_key == group_key) {
        let day = raw.entry(record.date).or_default();
        if !declared.contains(record.field_key.as_str()) {
            ignored += 1;
            continue;
        }
        if !seen.insert((record.date, record.field_key.as_str())) {
            match policy {
                DuplicatePolicy::Reject => {
                    return Err(PanelError::DuplicateRecord {
                        date: record.date,
                        group: group_key.to_string(),
                        field: record.field_key.clone(),
                    });
                }
                DuplicatePolicy::Sum => {
                    warn!(
                        "⚠️ Summing duplicate record ({}, {}, {})",
                        record.date, group_key, record.field_key
                    );
                }
            }
        }
        let slot = day.entry(record.field_key.as_str()).or_insert(None);
        *slot = add_values(*slot, record.value);
    }

    if ignored > 0 {
        warn!(
            "Ignored {} record(s) for undeclared fields of group '{}'",
            ignored, group_key
        );
    }

    Ok(raw
        .into_iter()
        .map(|(date, values)| {
            let mut day = DayRecord::empty(declared_fields.iter().copied());
            for (field, value) in values {
                day.set(field, fold_zero(value));
            }
            (date, day)
        })
        .collect())
}

/// Flatten a wide panel back to one record per `(date, declared field)`.
pub fn to_long(wide: &WidePanel, group_key: &str, declared_fields: &[&str]) -> Vec<PanelRecord> {
    let mut out = Vec::with_capacity(wide.len() * declared_fields.len());
    for (date, day) in wide {
        for field in declared_fields {
            out.push(PanelRecord::new(*date, group_key, *field, day.get(field)));
        }
    }
    out
}

/// Rebuild a whole [`IntermediatePanel`] from persisted records.
pub fn panel_from_long(
    category: &Category,
    records: &[PanelRecord],
    policy: DuplicatePolicy,
) -> PanelResult<IntermediatePanel> {
    let mut panel = IntermediatePanel::new();
    for group in category.groups() {
        let fields: Vec<&str> = group.field_keys().collect();
        let wide = to_wide(records, &group.key, &fields, policy)?;
        if !wide.is_empty() {
            panel.set_group(&group.key, wide);
        }
    }
    let declared: HashSet<&str> = category.groups().iter().map(|g| g.key.as_str()).collect();
    let orphaned = records
        .iter()
        .filter(|r| !declared.contains(r.group_key.as_str()))
        .count();
    if orphaned > 0 {
        warn!(
            "Ignored {} record(s) for groups not declared by category '{}'",
            orphaned,
            category.name()
        );
    }
    Ok(panel)
}

/// Flatten every declared group of `panel` into long records.
pub fn panel_to_long(category: &Category, panel: &IntermediatePanel) -> Vec<PanelRecord> {
    let mut out = Vec::new();
    for group in category.groups() {
        if let Some(wide) = panel.group(&group.key) {
            let fields: Vec<&str> = group.field_keys().collect();
            out.extend(to_long(wide, &group.key, &fields));
        }
    }
    out
}
