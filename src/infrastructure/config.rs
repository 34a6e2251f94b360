//! Configuration infrastructure
//!
//! Contains configuration loading and management for rate panel runs.
//!
//! The configuration file is JSON and is organized into four sections:
//! 1. `run` - date range, cache usage, retry count
//! 2. `source` - where and how pages are fetched
//! 3. `logging` - log level and outputs
//! 4. `categories` - group and field dictionaries per category

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::application::dto::RunOptions;
use crate::domain::category::{Category, CategoryKind, FieldDeclaration, KeyCodec, SeriesGroup, ValueKind};
use crate::domain::errors::{PanelError, PanelResult};
use crate::domain::panel::DateRange;
use crate::domain::pivot::DuplicatePolicy;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub run: RunConfig,

    pub source: SourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

/// Settings of a single invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// First date of the range (ISO, inclusive)
    pub start_date: NaiveDate,

    /// Last date of the range (ISO, inclusive)
    pub end_date: NaiveDate,

    /// Consult the intermediate panel before fetching
    #[serde(default = "default_true")]
    pub use_intermediate_panel: bool,

    /// Write the reconciled panel back (false = read-only invocation)
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Attempts per fetch, including the first one
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// What to do with duplicate rows found in the intermediate panel
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

/// Where pages come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,

    /// URL with `{base_url}`, `{selector}` and `{date}` placeholders
    pub url_template: String,

    /// chrono format used for `{date}`
    pub date_format: String,

    pub request_timeout_seconds: u64,

    pub user_agent: String,

    /// CSS selector of the data table
    pub table_selector: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; next to the executable when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Name of the active log file
    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    #[serde(default)]
    pub module_filters: HashMap<String, String>,
}

/// A field of a group: stored key and source column header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub key: String,
    pub selector: String,
    pub fields: Vec<FieldConfig>,
}

/// Quote table entity and the selector of its page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub key: String,
    pub selector: String,
}

/// One configured category, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryConfig {
    InterestRates {
        name: String,
        panel_path: PathBuf,
        #[serde(default)]
        output_path: Option<PathBuf>,
        groups: Vec<GroupConfig>,
    },
    ExchangeRates {
        name: String,
        panel_path: PathBuf,
        #[serde(default)]
        output_path: Option<PathBuf>,
        groups: Vec<GroupConfig>,
    },
    QuoteTable {
        name: String,
        panel_path: PathBuf,
        #[serde(default)]
        output_path: Option<PathBuf>,
        #[serde(default = "default_separator")]
        separator: String,
        entities: Vec<EntityConfig>,
        quote_types: Vec<String>,
        channels: Vec<String>,
        flows: Vec<String>,
        hours: Vec<String>,
    },
}

fn default_true() -> bool {
    true
}

fn default_max_tries() -> u32 {
    defaults::MAX_TRIES
}

fn default_separator() -> String {
    defaults::KEY_SEPARATOR.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig::default(),
            categories: vec![CategoryConfig::default_exchange_rates()],
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        let today = Local::now().date_naive();
        Self {
            start_date: today - Duration::days(defaults::LOOKBACK_DAYS),
            end_date: today,
            use_intermediate_panel: true,
            persist: true,
            max_tries: defaults::MAX_TRIES,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            url_template: defaults::URL_TEMPLATE.to_string(),
            date_format: defaults::URL_DATE_FORMAT.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
            table_selector: defaults::TABLE_SELECTOR.to_string(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> PanelResult<()> {
        if self.request_timeout_seconds == 0 {
            return Err(PanelError::configuration(
                "source.request_timeout_seconds must be positive",
            ));
        }
        check_date_format(&self.date_format)
    }
}

/// Reject strftime patterns chrono cannot render.
pub fn check_date_format(pattern: &str) -> PanelResult<()> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(PanelError::configuration(format!(
            "invalid date format '{}'",
            pattern
        )));
    }
    Ok(())
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            keep_only_latest: defaults::LOG_KEEP_ONLY_LATEST,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters.insert("selectors".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl RunConfig {
    /// Validated engine options.
    pub fn to_options(&self) -> PanelResult<RunOptions> {
        if self.max_tries < 1 {
            return Err(PanelError::configuration("max_tries must be at least 1"));
        }
        let range = DateRange::new(self.start_date, self.end_date)?;
        Ok(RunOptions {
            range,
            use_intermediate_panel: self.use_intermediate_panel,
            persist: self.persist,
            max_tries: self.max_tries,
            duplicate_policy: self.duplicate_policy,
        })
    }
}

impl CategoryConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::InterestRates { name, .. }
            | Self::ExchangeRates { name, .. }
            | Self::QuoteTable { name, .. } => name,
        }
    }

    pub fn kind(&self) -> CategoryKind {
        match self {
            Self::InterestRates { .. } => CategoryKind::InterestRates,
            Self::ExchangeRates { .. } => CategoryKind::ExchangeRates,
            Self::QuoteTable { .. } => CategoryKind::QuoteTable,
        }
    }

    pub fn panel_path(&self) -> &Path {
        match self {
            Self::InterestRates { panel_path, .. }
            | Self::ExchangeRates { panel_path, .. }
            | Self::QuoteTable { panel_path, .. } => panel_path,
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        match self {
            Self::InterestRates { output_path, .. }
            | Self::ExchangeRates { output_path, .. }
            | Self::QuoteTable { output_path, .. } => output_path.as_deref(),
        }
    }

    fn default_exchange_rates() -> Self {
        let fields = || {
            vec![
                FieldConfig {
                    key: "tipo_pase".to_string(),
                    label: "Tipo de Pase".to_string(),
                },
                FieldConfig {
                    key: "tipo_cotizacion".to_string(),
                    label: "Tipo de Cotizacion".to_string(),
                },
            ]
        };
        Self::ExchangeRates {
            name: "tipos_de_cambio".to_string(),
            panel_path: PathBuf::from(defaults::DATA_DIR).join("tipos_de_cambio_panel.csv"),
            output_path: Some(PathBuf::from(defaults::DATA_DIR).join("tipos_de_cambio.csv")),
            groups: vec![
                GroupConfig {
                    key: "dolar_estadounidense".to_string(),
                    selector: "USD".to_string(),
                    fields: fields(),
                },
                GroupConfig {
                    key: "euro".to_string(),
                    selector: "EUR".to_string(),
                    fields: fields(),
                },
            ],
        }
    }
}

fn build_groups(groups: &[GroupConfig], kind: ValueKind) -> Vec<SeriesGroup> {
    groups
        .iter()
        .map(|g| SeriesGroup {
            key: g.key.clone(),
            selector: g.selector.clone(),
            fields: g
                .fields
                .iter()
                .map(|f| FieldDeclaration::new(f.key.clone(), f.label.clone(), kind))
                .collect(),
        })
        .collect()
}

impl Category {
    /// Build and validate the category a configuration entry describes.
    pub fn from_config(config: &CategoryConfig) -> PanelResult<Self> {
        match config {
            CategoryConfig::InterestRates { name, groups, .. } => Category::new(
                name.clone(),
                CategoryKind::InterestRates,
                build_groups(groups, ValueKind::Percentage),
                KeyCodec::simple(),
                KeyCodec::simple(),
            ),
            CategoryConfig::ExchangeRates { name, groups, .. } => Category::new(
                name.clone(),
                CategoryKind::ExchangeRates,
                build_groups(groups, ValueKind::Level),
                KeyCodec::simple(),
                KeyCodec::simple(),
            ),
            CategoryConfig::QuoteTable {
                name,
                separator,
                entities,
                quote_types,
                channels,
                flows,
                hours,
                ..
            } => {
                let entities: Vec<(String, String)> = entities
                    .iter()
                    .map(|e| (e.key.clone(), e.selector.clone()))
                    .collect();
                Category::quote_table(
                    name.clone(),
                    separator,
                    &entities,
                    quote_types,
                    channels,
                    flows,
                    hours,
                )
            }
        }
    }
}

impl AppConfig {
    /// Check everything a run depends on before anything is fetched.
    pub fn validate(&self) -> PanelResult<Vec<Category>> {
        self.run.to_options()?;
        self.source.validate()?;

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        let mut categories = Vec::with_capacity(self.categories.len());
        for config in &self.categories {
            if !names.insert(config.name()) {
                return Err(PanelError::configuration(format!(
                    "duplicate category '{}'",
                    config.name()
                )));
            }
            if !paths.insert(config.panel_path()) {
                return Err(PanelError::configuration(format!(
                    "category '{}' shares its panel file {:?} with another category",
                    config.name(),
                    config.panel_path()
                )));
            }
            categories.push(Category::from_config(config)?);
        }
        if categories.is_empty() {
            warn!("⚠️ No categories configured, nothing to do");
        }
        Ok(categories)
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(config_dir)
    }

    /// Configuration manager for the default location
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join(defaults::CONFIG_FILE_NAME);

        Ok(Self { config_path })
    }

    /// Configuration manager for an explicit file
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load configuration from file, creating default if it doesn't exist.
    ///
    /// A file that exists but does not parse is an error: the run must not
    /// silently proceed with defaults.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read configuration file {:?}", self.config_path))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid configuration file {:?}", self.config_path))?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    /// Directory name under the user config directory
    pub const APP_DIR_NAME: &str = "rate-panel";

    pub const CONFIG_FILE_NAME: &str = "rate_panel_config.json";

    /// Relative directory for panels and outputs
    pub const DATA_DIR: &str = "data";

    /// Default range is the last week
    pub const LOOKBACK_DAYS: i64 = 7;

    /// Default attempts per fetch
    pub const MAX_TRIES: u32 = 3;

    pub const KEY_SEPARATOR: &str = crate::domain::category::DEFAULT_KEY_SEPARATOR;

    pub const BASE_URL: &str = "https://www.bcra.gob.ar";

    pub const URL_TEMPLATE: &str = "{base_url}/{selector}?fecha={date}";

    pub const URL_DATE_FORMAT: &str = "%d/%m/%Y";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const USER_AGENT: &str = concat!("rate-panel/", env!("CARGO_PKG_VERSION"));

    pub const TABLE_SELECTOR: &str = "table";

    // Log configuration defaults
    pub const LOG_LEVEL: &str = "info";

    pub const LOG_JSON_FORMAT: bool = false;

    pub const LOG_CONSOLE_OUTPUT: bool = true;

    pub const LOG_FILE_OUTPUT: bool = true;

    pub const LOG_FILE_NAME: &str = "rate-panel.log";

    /// Default maximum log files to keep
    pub const LOG_MAX_FILES: u32 = 5;

    pub const LOG_AUTO_CLEANUP: bool = true;

    pub const LOG_KEEP_ONLY_LATEST: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quote_table_json() -> &'static str {
        r#"{
            "kind": "quote_table",
            "name": "cotizaciones",
            "panel_path": "data/cotizaciones_panel.csv",
            "entities": [{"key": "banco_nacion", "selector": "bna"}],
            "quote_types": ["dolar"],
            "channels": ["mostrador", "electronico"],
            "flows": ["compra", "venta"],
            "hours": ["11hs", "13hs", "15hs"]
        }"#
    }

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested/config.json"));
        let config = manager.load_config().await.unwrap();
        assert!(manager.config_path().exists());
        assert_eq!(config.run.max_tries, defaults::MAX_TRIES);
        assert_eq!(config.categories.len(), 1);

        let again = manager.load_config().await.unwrap();
        assert_eq!(again.categories, config.categories);
        assert_eq!(again.run.start_date, config.run.start_date);
    }

    #[tokio::test]
    async fn test_unparsable_file_is_an_error_and_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let manager = ConfigManager::with_path(&path);
        assert!(manager.load_config().await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_quote_table_config_builds_cartesian_category() {
        let config: CategoryConfig = serde_json::from_str(quote_table_json()).unwrap();
        assert_eq!(config.kind(), CategoryKind::QuoteTable);
        assert_eq!(config.output_path(), None);
        let category = Category::from_config(&config).unwrap();
        assert_eq!(category.groups().len(), 1);
        assert_eq!(category.groups()[0].key, "banco_nacion__dolar");
        assert_eq!(category.groups()[0].fields.len(), 12);
    }

    #[test]
    fn test_interest_rate_fields_are_percentages() {
        let config: CategoryConfig = serde_json::from_str(
            r#"{
                "kind": "interest_rates",
                "name": "tasas",
                "panel_path": "data/tasas_panel.csv",
                "groups": [{"key": "badlar", "selector": "BADLAR",
                            "fields": [{"key": "30", "label": "30 dias"}]}]
            }"#,
        )
        .unwrap();
        let category = Category::from_config(&config).unwrap();
        assert_eq!(
            category.declared_fields("badlar").unwrap()[0].kind,
            ValueKind::Percentage
        );
    }

    #[test]
    fn test_run_config_validation() {
        let mut run = RunConfig::default();
        assert!(run.to_options().is_ok());

        run.max_tries = 0;
        assert_eq!(run.to_options().unwrap_err().kind(), "configuration");

        run.max_tries = 3;
        run.start_date = run.end_date + Duration::days(1);
        assert_eq!(run.to_options().unwrap_err().kind(), "invalid_date_range");
    }

    #[test]
    fn test_duplicate_categories_are_rejected() {
        let mut config = AppConfig::default();
        assert_eq!(config.validate().unwrap().len(), 1);
        config.categories.push(config.categories[0].clone());
        assert_eq!(config.validate().unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_invalid_date_format_is_rejected() {
        let mut config = AppConfig::default();
        config.source.date_format = "%Q".to_string();
        assert_eq!(config.validate().unwrap_err().kind(), "configuration");

        config.source.date_format = "%Y-%m-%d".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_group_without_fields_is_rejected() {
        let mut config = AppConfig::default();
        if let CategoryConfig::ExchangeRates { groups, .. } = &mut config.categories[0] {
            groups[0].fields.clear();
        }
        assert!(config.validate().is_err());
    }
}
