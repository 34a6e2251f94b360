//! Value normalizer
//!
//! Turns locale-formatted source text (`1.234,56`, `24/04/2019`) into
//! canonical decimals and dates. Pure functions, no state.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::category::ValueKind;
use crate::domain::errors::{PanelError, PanelResult};

/// Raw field value handed over by a table parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    Decimal(Decimal),
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Decimal> for RawValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl RawValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }
}

/// Characters the source publishes in place of a value when there is no data.
const DASH_SENTINELS: [char; 4] = ['-', '\u{2013}', '\u{2014}', '\u{2212}'];

fn is_dash_sentinel(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| DASH_SENTINELS.contains(&c))
}

/// Normalize one field value.
///
/// - empty text → `None`
/// - text made only of dashes → `None` (source "no data" marker)
/// - `1.234,56` → `1234.56`; percentage fields are divided by 100
/// - anything else → [`PanelError::MalformedValue`]
pub fn normalize_value(raw: &RawValue, kind: ValueKind, field: &str) -> PanelResult<Option<Decimal>> {
    let value = match raw {
        RawValue::Decimal(d) => *d,
        RawValue::Text(text) => match parse_locale_decimal(text, kind, field)? {
            Some(d) => d,
            None => return Ok(None),
        },
    };
    Ok(Some(match kind {
        ValueKind::Level => value,
        ValueKind::Percentage => value / Decimal::ONE_HUNDRED,
    }))
}

fn parse_locale_decimal(text: &str, kind: ValueKind, field: &str) -> PanelResult<Option<Decimal>> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{a0}');
    if trimmed.is_empty() || is_dash_sentinel(trimmed) {
        return Ok(None);
    }

    let body = match kind {
        ValueKind::Percentage => trimmed.trim_end_matches('%').trim_end(),
        ValueKind::Level => trimmed,
    };

    let canonical = canonical_number(body).ok_or_else(|| PanelError::malformed(text, field))?;
    Decimal::from_str(&canonical)
        .map(Some)
        .map_err(|_| PanelError::malformed(text, field))
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// `-1.234,56` -> `-1234.56`. Dots are only accepted as thousands
/// separators (1-3 leading digits, then groups of exactly 3), the comma is
/// the decimal mark.
fn canonical_number(body: &str) -> Option<String> {
    let (sign, unsigned) = match body.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", body.strip_prefix('+').unwrap_or(body)),
    };
    let (int_part, frac_part) = match unsigned.split_once(',') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (unsigned, None),
    };

    let int_digits = if int_part.contains('.') {
        let mut groups = int_part.split('.');
        let first = groups.next()?;
        if first.is_empty() || first.len() > 3 || !all_digits(first) {
            return None;
        }
        let mut digits = first.to_string();
        for group in groups {
            if group.len() != 3 || !all_digits(group) {
                return None;
            }
            digits.push_str(group);
        }
        digits
    } else if all_digits(int_part) {
        int_part.to_string()
    } else {
        return None;
    };

    match frac_part {
        Some(frac) if frac.is_empty() || !all_digits(frac) => None,
        Some(_) if int_digits.is_empty() => None,
        Some(frac) => Some(format!("{sign}{int_digits}.{frac}")),
        None if int_digits.is_empty() => None,
        None => Some(format!("{sign}{int_digits}")),
    }
}

/// Parse a date token written either as `DD/MM/YYYY` or as an ISO date.
pub fn normalize_date(raw: &str) -> PanelResult<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| PanelError::malformed(raw, "date"))
}
