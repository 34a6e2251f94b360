//! 외부 협력자 인터페이스 (collaborator interfaces)
//!
//! The engine only talks to the outside world through these traits:
//! a content fetcher that returns raw per-date payloads, a table parser that
//! reads raw field text out of a payload, and a store for the long table.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::domain::category::FieldDeclaration;
use crate::domain::errors::{FetchError, PanelResult};
use crate::domain::normalizer::RawValue;
use crate::domain::panel::PanelRecord;

/// Opaque content returned by a fetcher, e.g. rendered markup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPayload {
    pub body: String,
}

impl RawPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }
}

/// 원격 콘텐츠 수집기
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the page for `selector` on `date`.
    async fn fetch(&self, date: NaiveDate, selector: &str) -> Result<RawPayload, FetchError>;
}

/// 표 파서
pub trait TableParser: Send + Sync {
    /// Raw values for the declared fields of one group on `date`.
    ///
    /// Returns an all-empty mapping, not an error, when the payload has no
    /// row for `date`.
    fn extract(
        &self,
        payload: &RawPayload,
        date: NaiveDate,
        selector: &str,
        fields: &[FieldDeclaration],
    ) -> PanelResult<HashMap<String, RawValue>>;
}

/// 중간 패널 저장소
pub trait PanelStore: Send + Sync {
    /// Read every persisted record. A missing backing table is created empty.
    fn load(&self) -> PanelResult<Vec<PanelRecord>>;

    /// Replace the backing table with exactly `records`.
    fn save(&self, records: &[PanelRecord]) -> PanelResult<()>;
}
