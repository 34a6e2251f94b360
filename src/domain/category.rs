//! Category declarations
//!
//! A [`Category`] is the per-source capability object the reconciliation
//! engine is parameterized over: which groups exist, which fields each group
//! declares, how composite keys are flattened, and which columns the long
//! table uses. Categories differ only by data, so one struct tagged by
//! [`CategoryKind`] covers all of them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::errors::{PanelError, PanelResult};

/// Default separator used to join composite key parts.
pub const DEFAULT_KEY_SEPARATOR: &str = "__";

/// Default name of the date column in persisted tables.
pub const DEFAULT_DATE_COLUMN: &str = "indice_tiempo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    InterestRates,
    ExchangeRates,
    QuoteTable,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterestRates => "interest_rates",
            Self::ExchangeRates => "exchange_rates",
            Self::QuoteTable => "quote_table",
        }
    }
}

/// How a raw source value maps to the stored decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Stored as published.
    #[default]
    Level,
    /// Published as a percentage, stored as a fraction (divided by 100).
    Percentage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    pub key: String,
    /// Column header used by the source table.
    pub label: String,
    #[serde(default)]
    pub kind: ValueKind,
}

impl FieldDeclaration {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Named top-level partition of the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesGroup {
    pub key: String,
    /// What the content fetcher needs to locate this group's page.
    pub selector: String,
    pub fields: Vec<FieldDeclaration>,
}

impl SeriesGroup {
    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Joins and splits composite keys such as `entity__channel__flow__hour`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCodec {
    separator: String,
    arity: usize,
}

impl KeyCodec {
    pub fn new(separator: impl Into<String>, arity: usize) -> PanelResult<Self> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(PanelError::configuration("key separator must not be empty"));
        }
        if arity == 0 {
            return Err(PanelError::configuration("key arity must be at least 1"));
        }
        Ok(Self { separator, arity })
    }

    /// Codec for plain (non-composite) keys.
    pub fn simple() -> Self {
        Self {
            separator: DEFAULT_KEY_SEPARATOR.to_string(),
            arity: 1,
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn flatten<S: AsRef<str>>(&self, parts: &[S]) -> PanelResult<String> {
        if parts.len() != self.arity {
            return Err(PanelError::configuration(format!(
                "expected {} key parts, got {}",
                self.arity,
                parts.len()
            )));
        }
        if let Some(bad) = parts
            .iter()
            .map(AsRef::as_ref)
            .find(|p| p.is_empty() || p.contains(self.separator.as_str()))
        {
            return Err(PanelError::configuration(format!(
                "key part '{bad}' is empty or contains the separator '{}'",
                self.separator
            )));
        }
        Ok(parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&self.separator))
    }

    pub fn unflatten(&self, key: &str) -> PanelResult<Vec<String>> {
        let parts: Vec<String> = if self.arity == 1 {
            vec![key.to_string()]
        } else {
            key.split(self.separator.as_str()).map(str::to_string).collect()
        };
        if parts.len() != self.arity || parts.iter().any(String::is_empty) {
            return Err(PanelError::configuration(format!(
                "key '{key}' does not decompose into {} parts",
                self.arity
            )));
        }
        Ok(parts)
    }
}

/// Column layout of the persisted long table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSchema {
    pub date_column: String,
    pub group_columns: Vec<String>,
    pub field_column: String,
    pub value_column: String,
}

impl PanelSchema {
    pub fn header(&self) -> Vec<&str> {
        let mut header = Vec::with_capacity(self.group_columns.len() + 3);
        header.push(self.date_column.as_str());
        header.extend(self.group_columns.iter().map(String::as_str));
        header.push(self.field_column.as_str());
        header.push(self.value_column.as_str());
        header
    }

    fn for_kind(kind: CategoryKind) -> Self {
        let (group_columns, field_column): (Vec<&str>, &str) = match kind {
            CategoryKind::InterestRates => (vec!["tasa"], "plazo"),
            CategoryKind::ExchangeRates => (vec!["moneda"], "tipo"),
            CategoryKind::QuoteTable => (vec!["entidad", "tipo_cotizacion"], "canal_flujo_hora"),
        };
        Self {
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            group_columns: group_columns.into_iter().map(str::to_string).collect(),
            field_column: field_column.to_string(),
            value_column: "valor".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    kind: CategoryKind,
    groups: Vec<SeriesGroup>,
    group_codec: KeyCodec,
    field_codec: KeyCodec,
    schema: PanelSchema,
}

impl Category {
    /// Build and validate a category.
    pub fn new(
        name: impl Into<String>,
        kind: CategoryKind,
        groups: Vec<SeriesGroup>,
        group_codec: KeyCodec,
        field_codec: KeyCodec,
    ) -> PanelResult<Self> {
        let name = name.into();
        let schema = PanelSchema::for_kind(kind);
        if group_codec.arity() != schema.group_columns.len() {
            return Err(PanelError::configuration(format!(
                "category '{name}': group key arity {} does not match {} group columns",
                group_codec.arity(),
                schema.group_columns.len()
            )));
        }
        if groups.is_empty() {
            return Err(PanelError::configuration(format!(
                "category '{name}' declares no groups"
            )));
        }

        let mut seen_groups = HashSet::new();
        for group in &groups {
            if !seen_groups.insert(group.key.as_str()) {
                return Err(PanelError::configuration(format!(
                    "category '{name}': duplicate group '{}'",
                    group.key
                )));
            }
            group_codec.unflatten(&group.key)?;
            if group.fields.is_empty() {
                return Err(PanelError::configuration(format!(
                    "category '{name}': group '{}' declares no fields",
                    group.key
                )));
            }
            let mut seen_fields = HashSet::new();
            for field in &group.fields {
                if !seen_fields.insert(field.key.as_str()) {
                    return Err(PanelError::configuration(format!(
                        "category '{name}': duplicate field '{}' in group '{}'",
                        field.key, group.key
                    )));
                }
                if field.key == schema.date_column {
                    return Err(PanelError::configuration(format!(
                        "category '{name}': field key '{}' clashes with the date column",
                        field.key
                    )));
                }
                field_codec.unflatten(&field.key)?;
            }
        }

        Ok(Self {
            name,
            kind,
            groups,
            group_codec,
            field_codec,
            schema,
        })
    }

    /// Interest rates: one group per rate family, one percentage field per tenor.
    pub fn interest_rates(
        name: impl Into<String>,
        families: Vec<(String, String, Vec<(String, String)>)>,
    ) -> PanelResult<Self> {
        let groups = families
            .into_iter()
            .map(|(key, selector, tenors)| SeriesGroup {
                key,
                selector,
                fields: tenors
                    .into_iter()
                    .map(|(k, label)| FieldDeclaration::new(k, label, ValueKind::Percentage))
                    .collect(),
            })
            .collect();
        Self::new(
            name,
            CategoryKind::InterestRates,
            groups,
            KeyCodec::simple(),
            KeyCodec::simple(),
        )
    }

    /// Exchange rates: one group per currency, fields published as levels.
    pub fn exchange_rates(
        name: impl Into<String>,
        currencies: Vec<(String, String, Vec<(String, String)>)>,
    ) -> PanelResult<Self> {
        let groups = currencies
            .into_iter()
            .map(|(key, selector, fields)| SeriesGroup {
                key,
                selector,
                fields: fields
                    .into_iter()
                    .map(|(k, label)| FieldDeclaration::new(k, label, ValueKind::Level))
                    .collect(),
            })
            .collect();
        Self::new(
            name,
            CategoryKind::ExchangeRates,
            groups,
            KeyCodec::simple(),
            KeyCodec::simple(),
        )
    }

    /// Cross-entity quote table. Groups are `entity x quote_type`, fields are
    /// `channel x flow x hour`, both flattened with `separator`.
    pub fn quote_table(
        name: impl Into<String>,
        separator: &str,
        entities: &[(String, String)],
        quote_types: &[String],
        channels: &[String],
        flows: &[String],
        hours: &[String],
    ) -> PanelResult<Self> {
        let group_codec = KeyCodec::new(separator, 2)?;
        let field_codec = KeyCodec::new(separator, 3)?;

        let mut fields = Vec::with_capacity(channels.len() * flows.len() * hours.len());
        for channel in channels {
            for flow in flows {
                for hour in hours {
                    let key = field_codec.flatten(&[channel, flow, hour])?;
                    let label = format!("{channel} {flow} {hour}");
                    fields.push(FieldDeclaration::new(key, label, ValueKind::Level));
                }
            }
        }

        let mut groups = Vec::with_capacity(entities.len() * quote_types.len());
        for (entity, selector) in entities {
            for quote_type in quote_types {
                groups.push(SeriesGroup {
                    key: group_codec.flatten(&[entity, quote_type])?,
                    selector: selector.clone(),
                    fields: fields.clone(),
                });
            }
        }

        Self::new(name, CategoryKind::QuoteTable, groups, group_codec, field_codec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CategoryKind {
        self.kind
    }

    pub fn schema(&self) -> &PanelSchema {
        &self.schema
    }

    pub fn groups(&self) -> &[SeriesGroup] {
        &self.groups
    }

    pub fn group(&self, group_key: &str) -> PanelResult<&SeriesGroup> {
        self.groups
            .iter()
            .find(|g| g.key == group_key)
            .ok_or_else(|| PanelError::Configuration {
                message: format!("group not declared by category '{}'", self.name),
                group: Some(group_key.to_string()),
                date: None,
            })
    }

    pub fn declared_fields(&self, group_key: &str) -> PanelResult<&[FieldDeclaration]> {
        Ok(&self.group(group_key)?.fields)
    }

    pub fn flatten_key<S: AsRef<str>>(&self, parts: &[S]) -> PanelResult<String> {
        self.field_codec.flatten(parts)
    }

    pub fn unflatten_key(&self, field_key: &str) -> PanelResult<Vec<String>> {
        self.field_codec.unflatten(field_key)
    }

    pub fn flatten_group<S: AsRef<str>>(&self, parts: &[S]) -> PanelResult<String> {
        self.group_codec.flatten(parts)
    }

    pub fn unflatten_group(&self, group_key: &str) -> PanelResult<Vec<String>> {
        self.group_codec.unflatten(group_key)
    }

    /// Column name of `(group, field)` in the wide output table.
    pub fn wide_column(&self, group_key: &str, field_key: &str) -> String {
        if self.groups.len() == 1 {
            field_key.to_string()
        } else {
            format!("{group_key}{}{field_key}", self.group_codec.separator())
        }
    }
}
