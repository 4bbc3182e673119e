use anyhow::Result;
use tablescrape::{
    config::{self, Config, EmptyPolicy},
    logging,
    pipeline::{run_dataset, BankDataset, Dataset, GdpDataset},
};
use tracing::info;

fn run_one(dataset: &dyn Dataset, policy: EmptyPolicy) -> Result<()> {
    let report = run_dataset(dataset, policy)?;
    info!(
        dataset = %report.dataset,
        stage = %report.reached,
        rows = report.rows,
        queries = report.queries.len(),
        "pipeline finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    // ─── 1) configuration ────────────────────────────────────────────
    config::load_dotenv()?;
    logging::init(&config::log_config(|k| std::env::var(k).ok()))?;
    info!("Main function started.");
    let cfg = Config::from_env()?;

    // ─── 2) pipelines ────────────────────────────────────────────────
    if let Some(bank) = cfg.bank {
        run_one(&BankDataset::new(bank), cfg.empty_policy)?;
    }
    if let Some(gdp) = cfg.gdp {
        run_one(&GdpDataset::new(gdp), cfg.empty_policy)?;
    }

    info!("Main function finished.");
    println!("ETL process completed successfully.");
    Ok(())
}
