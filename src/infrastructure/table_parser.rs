//! HTML table parser
//!
//! Reads one row of a rendered data table: the header row gives the column
//! of every field label, the row whose first cell is the requested date gives
//! the values. A page without that row yields all-empty values, not an error.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use crate::domain::category::FieldDeclaration;
use crate::domain::errors::{PanelError, PanelResult};
use crate::domain::normalizer::{normalize_date, RawValue};
use crate::domain::services::{RawPayload, TableParser};

pub struct HtmlTableParser {
    table: Selector,
    row: Selector,
    cell: Selector,
}

fn selector(css: &str) -> PanelResult<Selector> {
    Selector::parse(css).map_err(|e| PanelError::parse(format!("Invalid CSS selector '{css}': {e}")))
}

/// Cell text with runs of whitespace collapsed
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

impl HtmlTableParser {
    pub fn new(table_selector: &str) -> PanelResult<Self> {
        Ok(Self {
            table: selector(table_selector)?,
            row: selector("tr")?,
            cell: selector("th, td")?,
        })
    }

    fn cells(&self, row: ElementRef<'_>) -> Vec<String> {
        row.select(&self.cell).map(cell_text).collect()
    }
}

impl TableParser for HtmlTableParser {
    fn extract(
        &self,
        payload: &RawPayload,
        date: NaiveDate,
        selector: &str,
        fields: &[FieldDeclaration],
    ) -> PanelResult<HashMap<String, RawValue>> {
        let mut out: HashMap<String, RawValue> = fields
            .iter()
            .map(|f| (f.key.clone(), RawValue::empty()))
            .collect();
        if payload.is_empty() {
            return Ok(out);
        }

        let document = Html::parse_document(&payload.body);
        let Some(table) = document.select(&self.table).next() else {
            debug!("No table in page for '{}' on {}", selector, date);
            return Ok(out);
        };

        let mut rows = table.select(&self.row);
        let Some(header) = rows.next().map(|r| self.cells(r)) else {
            return Ok(out);
        };
        let columns: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let row = rows
            .map(|r| self.cells(r))
            .find(|cells| {
                cells
                    .first()
                    .is_some_and(|first| normalize_date(first).is_ok_and(|d| d == date))
            });
        let Some(row) = row else {
            debug!("No row for {} in page for '{}'", date, selector);
            return Ok(out);
        };

        for field in fields {
            match columns.get(field.label.as_str()) {
                Some(&i) => {
                    if let Some(text) = row.get(i) {
                        out.insert(field.key.clone(), RawValue::from(text.as_str()));
                    }
                }
                None => debug!("Column '{}' missing for '{}'", field.label, selector),
            }
        }
        Ok(out)
    }
}
