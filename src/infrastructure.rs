//! Infrastructure layer for fetching, parsing, persistence and runtime setup
//!
//! This module provides the collaborators the reconciliation engine runs
//! against (HTTP fetcher, HTML table parser, CSV panel store), their offline
//! counterparts, the retry driver, configuration and logging.

pub mod config; // Configuration loading and defaults
pub mod http_fetcher;
pub mod logging; // Logging infrastructure
pub mod panel_store;
pub mod retry_driver;
pub mod scripted_source; // Offline fetcher/parser for tests and dry runs
pub mod table_parser;

// Re-export commonly used items
pub use config::{AppConfig, CategoryConfig, ConfigManager, LoggingConfig, RunConfig, SourceConfig};
pub use http_fetcher::{HttpContentFetcher, HttpFetcherConfig};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use panel_store::{export_wide, CsvPanelStore, MemoryPanelStore};
pub use retry_driver::{RetryDriver, RetryStats};
pub use scripted_source::{ScriptedFetcher, ScriptedTableParser};
pub use table_parser::HtmlTableParser;
