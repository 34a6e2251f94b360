//! rate-panel binary
//!
//! Usage: `rate-panel [CONFIG_FILE]`. Without an argument the configuration
//! is read from (or created in) the user config directory.

use anyhow::{Context, Result};
use tracing::{error, info};

use rate_panel_lib::infrastructure::logging::log_system_info;
use rate_panel_lib::infrastructure::{
    export_wide, init_logging_with_config, ConfigManager, CsvPanelStore, HtmlTableParser,
    HttpContentFetcher,
};
use rate_panel_lib::ReconciliationEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let manager = match std::env::args().nth(1) {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await?;

    init_logging_with_config(config.logging.clone()).context("Failed to initialize logging")?;
    log_system_info(&config.logging);

    if let Err(e) = run(&config).await {
        error!("❌ Run aborted: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: &rate_panel_lib::infrastructure::AppConfig) -> Result<()> {
    let categories = config.validate().context("Invalid configuration")?;
    let options = config.run.to_options()?;

    for (category_config, category) in config.categories.iter().zip(categories) {
        let name = category.name().to_string();
        let fetcher = HttpContentFetcher::from_source_config(&config.source)?;
        let parser = HtmlTableParser::new(&config.source.table_selector)?;
        let store = CsvPanelStore::new(category_config.panel_path(), category.clone());
        let engine = ReconciliationEngine::new(category, fetcher, parser, store);

        let outcome = engine
            .run(&options)
            .await
            .with_context(|| format!("Reconciliation failed for category '{name}'"))?;

        if let Some(output) = category_config.output_path() {
            export_wide(output, engine.category(), &outcome.panel)
                .with_context(|| format!("Export failed for category '{name}'"))?;
        }
        info!(
            "🏁 '{}': {} dates, {} fetches, {} still empty",
            name,
            outcome.report.dates_requested,
            outcome.report.fetches,
            outcome.report.groups_still_empty
        );
    }
    Ok(())
}
