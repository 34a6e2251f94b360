//! Error taxonomy for panel reconciliation
//!
//! Every variant is fatal for a run: the engine never returns a partial
//! result. Transient fetch failures live in [`FetchError`] and are only
//! promoted to [`PanelError::Configuration`] once retries are exhausted.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("Configuration error{}: {message}", context_suffix(.group, .date))]
    Configuration {
        message: String,
        group: Option<String>,
        date: Option<NaiveDate>,
    },

    #[error("Malformed value '{raw}' for field '{field}'{}", context_suffix(.group, .date))]
    MalformedValue {
        raw: String,
        field: String,
        group: Option<String>,
        date: Option<NaiveDate>,
    },

    #[error("Storage error at {}: {message}", .path.display())]
    Storage { path: PathBuf, message: String },

    #[error("Duplicate record for ({date}, {group}, {field})")]
    DuplicateRecord {
        date: NaiveDate,
        group: String,
        field: String,
    },

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Table parsing failed{}: {message}", context_suffix(.group, .date))]
    Parse {
        message: String,
        group: Option<String>,
        date: Option<NaiveDate>,
    },
}

fn context_suffix(group: &Option<String>, date: &Option<NaiveDate>) -> String {
    match (group, date) {
        (Some(g), Some(d)) => format!(" [group={g}, date={d}]"),
        (Some(g), None) => format!(" [group={g}]"),
        (None, Some(d)) => format!(" [date={d}]"),
        (None, None) => String::new(),
    }
}

impl PanelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            group: None,
            date: None,
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn malformed(raw: &str, field: &str) -> Self {
        Self::MalformedValue {
            raw: raw.to_string(),
            field: field.to_string(),
            group: None,
            date: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            group: None,
            date: None,
        }
    }

    /// Attach the `(group, date)` being processed, keeping any context that
    /// was already present.
    #[must_use]
    pub fn at(self, group_key: &str, on: NaiveDate) -> Self {
        match self {
            Self::Configuration { message, group, date } => Self::Configuration {
                message,
                group: group.or_else(|| Some(group_key.to_string())),
                date: date.or(Some(on)),
            },
            Self::MalformedValue { raw, field, group, date } => Self::MalformedValue {
                raw,
                field,
                group: group.or_else(|| Some(group_key.to_string())),
                date: date.or(Some(on)),
            },
            Self::Parse { message, group, date } => Self::Parse {
                message,
                group: group.or_else(|| Some(group_key.to_string())),
                date: date.or(Some(on)),
            },
            other => other,
        }
    }

    /// Short machine-friendly label, used in run logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::MalformedValue { .. } => "malformed_value",
            Self::Storage { .. } => "storage",
            Self::DuplicateRecord { .. } => "duplicate_record",
            Self::InvalidDateRange { .. } => "invalid_date_range",
            Self::Parse { .. } => "parse",
        }
    }
}

pub type PanelResult<T> = Result<T, PanelError>;

/// Failure reported by a content fetcher for a single attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The target page or element does not exist. Never retried.
    #[error("Page or element not found: {0}")]
    NotFound(String),

    /// Connection failure or timeout. Retried immediately.
    #[error("Transient fetch failure: {0}")]
    Transient(String),
}

impl FetchError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_attached_once() {
        let d = NaiveDate::from_ymd_opt(2019, 4, 24).unwrap();
        let err = PanelError::malformed("1,2,3", "tasa").at("usd", d);
        let msg = err.to_string();
        assert!(msg.contains("1,2,3"));
        assert!(msg.contains("group=usd"));
        assert!(msg.contains("date=2019-04-24"));

        // a second `at` keeps the first context
        let other = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let again = err.at("eur", other);
        assert!(again.to_string().contains("group=usd"));
    }

    #[test]
    fn test_storage_errors_ignore_run_context() {
        let d = NaiveDate::from_ymd_opt(2019, 4, 24).unwrap();
        let err = PanelError::storage("/tmp/panel.csv", "denied").at("usd", d);
        assert_eq!(err.kind(), "storage");
        assert!(!err.to_string().contains("usd"));
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(FetchError::Transient("timeout".into()).is_retryable());
        assert!(!FetchError::NotFound("select#moneda".into()).is_retryable());
    }
}
