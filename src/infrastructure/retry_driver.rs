//! 재시도 드라이버 - fetch with bounded immediate retries
//!
//! Policy:
//! - `NotFound` is a configuration mismatch (wrong category name or URL) and
//!   aborts immediately.
//! - `Transient` is retried right away, with no backoff, up to `max_tries`
//!   attempts in total. Exhaustion becomes a configuration error carrying the
//!   last failure.
//! - An empty but well-formed payload is a valid result.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::errors::{PanelError, PanelResult};
use crate::domain::services::{ContentFetcher, RawPayload};

/// 재시도 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub total_attempts: usize,
    pub successful_fetches: usize,
    pub retries: usize,
    pub not_found: usize,
    pub exhausted: usize,
    pub max_tries: u32,
}

#[derive(Debug, Clone)]
pub struct RetryDriver {
    max_tries: u32,
    stats: RetryStats,
}

impl RetryDriver {
    /// `max_tries` below 1 is treated as 1: every fetch is attempted once.
    pub fn new(max_tries: u32) -> Self {
        let max_tries = max_tries.max(1);
        Self {
            max_tries,
            stats: RetryStats {
                max_tries,
                ..RetryStats::default()
            },
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub async fn fetch_with_retry(
        &mut self,
        fetcher: &dyn ContentFetcher,
        date: NaiveDate,
        group_key: &str,
        selector: &str,
    ) -> PanelResult<RawPayload> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.stats.total_attempts += 1;
            let err = match fetcher.fetch(date, selector).await {
                Ok(payload) => {
                    self.stats.successful_fetches += 1;
                    if payload.is_empty() {
                        debug!("Empty payload for {} on {} (attempt {})", group_key, date, attempt);
                    }
                    return Ok(payload);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.stats.not_found += 1;
                return Err(PanelError::Configuration {
                    message: format!("source does not recognize selector '{selector}': {err}"),
                    group: Some(group_key.to_string()),
                    date: Some(date),
                });
            }
            if attempt >= self.max_tries {
                self.stats.exhausted += 1;
                return Err(PanelError::Configuration {
                    message: format!("fetch failed after {attempt} attempt(s), last error: {err}"),
                    group: Some(group_key.to_string()),
                    date: Some(date),
                });
            }
            self.stats.retries += 1;
            warn!(
                "🔄 Retrying {} on {} ({}/{}): {}",
                group_key, date, attempt, self.max_tries, err
            );
        }
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }
}
