// src/pipeline.rs
//
// Extract → transform → CSV → SQLite → verification queries, for one
// dataset per run. Every step is fatal on error; the only early exit is
// an empty extraction under `EmptyPolicy::Abort`.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::{fmt, time::Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{BankConfig, EmptyPolicy, PipelineConfig};
use crate::extract::{extract, BankRowRule, GdpRowRule, MissingTable, TableSelector};
use crate::fetch::build_client;
use crate::load::{open_store, write_csv, write_table};
use crate::query::run_query;
use crate::table::Table;
use crate::transform::{transform_bank, transform_gdp, ExchangeRates, GDP_BILLIONS_COLUMN};

/// Position of a run in the ETL sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    Extracted,
    Transformed,
    CsvWritten,
    DbWritten,
    Queried,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "START",
            Stage::Extracted => "EXTRACTED",
            Stage::Transformed => "TRANSFORMED",
            Stage::CsvWritten => "CSV_WRITTEN",
            Stage::DbWritten => "DB_WRITTEN",
            Stage::Queried => "QUERIED",
            Stage::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// One dataset's source-specific steps; the sequencing lives in `run`.
pub trait Dataset {
    fn name(&self) -> &str;

    fn settings(&self) -> &PipelineConfig;

    /// Request timeout; `None` keeps the client default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn extract(&self, client: &Client) -> Result<Table>;

    fn transform(&self, client: &Client, table: Table) -> Result<Table>;

    /// Read-back queries run after the load.
    fn queries(&self) -> Vec<String>;
}

pub struct BankDataset {
    cfg: BankConfig,
}

impl BankDataset {
    pub fn new(cfg: BankConfig) -> Self {
        Self { cfg }
    }
}

impl Dataset for BankDataset {
    fn name(&self) -> &str {
        "bank"
    }

    fn settings(&self) -> &PipelineConfig {
        &self.cfg.pipeline
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(10))
    }

    fn extract(&self, client: &Client) -> Result<Table> {
        let p = &self.cfg.pipeline;
        extract(
            client,
            &p.url,
            &p.columns,
            &TableSelector::nth_tbody(p.table_index),
            MissingTable::Empty,
            &BankRowRule,
        )
    }

    fn transform(&self, client: &Client, table: Table) -> Result<Table> {
        let rates = ExchangeRates::load(&self.cfg.exchange_rates, client)?;
        transform_bank(table, &rates)
    }

    fn queries(&self) -> Vec<String> {
        let t = &self.cfg.pipeline.table_name;
        vec![
            format!("SELECT * FROM {}", t),
            format!("SELECT AVG(MC_GBP_Billion) FROM {}", t),
            format!("SELECT Name FROM {} LIMIT 5", t),
        ]
    }
}

pub struct GdpDataset {
    cfg: PipelineConfig,
}

impl GdpDataset {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self { cfg }
    }
}

impl Dataset for GdpDataset {
    fn name(&self) -> &str {
        "gdp"
    }

    fn settings(&self) -> &PipelineConfig {
        &self.cfg
    }

    fn extract(&self, client: &Client) -> Result<Table> {
        extract(
            client,
            &self.cfg.url,
            &self.cfg.columns,
            &TableSelector::nth_tbody(self.cfg.table_index),
            MissingTable::Fail,
            &GdpRowRule,
        )
    }

    fn transform(&self, _client: &Client, table: Table) -> Result<Table> {
        transform_gdp(table)
    }

    fn queries(&self) -> Vec<String> {
        vec![format!(
            "SELECT * FROM {} WHERE {} >= 100",
            self.cfg.table_name, GDP_BILLIONS_COLUMN
        )]
    }
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub query: String,
    pub result: Table,
}

#[derive(Debug)]
pub struct RunReport {
    pub dataset: String,
    /// Last stage reached before `Done`.
    pub reached: Stage,
    pub rows: usize,
    pub queries: Vec<QueryOutcome>,
}

impl RunReport {
    /// True when the run stopped on an empty extraction.
    pub fn aborted(&self) -> bool {
        self.reached == Stage::Extracted
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// Run one dataset end to end with the given client.
#[instrument(level = "info", skip_all, fields(dataset = dataset.name()))]
pub fn run<D: Dataset + ?Sized>(dataset: &D, client: &Client, policy: EmptyPolicy) -> Result<RunReport> {
    let cfg = dataset.settings();
    let mut stage = Stage::Start;

    // ─── extract ────────────────────────────────────────────────────
    info!("Extracting data from {}", cfg.url);
    let table = dataset.extract(client)?;
    advance(&mut stage, Stage::Extracted);

    if table.is_empty() {
        match policy {
            EmptyPolicy::Abort => {
                error!("No data extracted. Exiting ETL process.");
                let report = RunReport {
                    dataset: dataset.name().to_string(),
                    reached: stage,
                    rows: 0,
                    queries: Vec::new(),
                };
                advance(&mut stage, Stage::Done);
                return Ok(report);
            }
            EmptyPolicy::Proceed => warn!("No data extracted; continuing with an empty table"),
        }
    }

    // ─── transform ──────────────────────────────────────────────────
    info!("Transforming data...");
    let table = dataset.transform(client, table)?;
    advance(&mut stage, Stage::Transformed);

    // ─── load: CSV ──────────────────────────────────────────────────
    info!("Loading data to CSV file: {}", cfg.output_path.display());
    write_csv(&table, &cfg.output_path)?;
    advance(&mut stage, Stage::CsvWritten);

    // ─── load: database ─────────────────────────────────────────────
    info!("Loading data to database table: {}", cfg.table_name);
    let mut conn = open_store(&cfg.db_path)?;
    write_table(&table, &mut conn, &cfg.table_name)?;
    advance(&mut stage, Stage::DbWritten);

    // ─── verify ─────────────────────────────────────────────────────
    info!("Running sample queries on the database table...");
    let mut queries = Vec::new();
    for q in dataset.queries() {
        let result = run_query(&q, &conn)?;
        queries.push(QueryOutcome { query: q, result });
    }
    advance(&mut stage, Stage::Queried);

    conn.close()
        .map_err(|(_, e)| e)
        .with_context(|| format!("closing database {:?}", cfg.db_path))?;

    let report = RunReport {
        dataset: dataset.name().to_string(),
        reached: stage,
        rows: table.len(),
        queries,
    };
    advance(&mut stage, Stage::Done);
    info!(rows = report.rows, "ETL process completed");
    Ok(report)
}

/// Build a client with the dataset's timeout and run it.
pub fn run_dataset<D: Dataset + ?Sized>(dataset: &D, policy: EmptyPolicy) -> Result<RunReport> {
    let client = build_client(dataset.timeout())?;
    run(dataset, &client, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testutil::serve_once;
    use crate::load::read_csv;
    use crate::table::Value;
    use crate::transform::RateSource;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;
    use url::Url;

    const BANK_HTML: &str = r##"<table><tbody>
        <tr><td>Rank</td><td>Bank name</td><td>Market cap</td></tr>
        <tr><td>1</td><td><span><a href="#"></a></span><a href="#">JPMorgan Chase</a></td><td>432.92
        </td></tr>
        <tr><td>2</td><td><span><a href="#"></a></span><a href="#">Bank of America</a></td><td>231.52
        </td></tr>
    </tbody></table>"##;

    const GDP_HTML: &str = r##"
        <table><tbody><tr><td>a</td></tr></tbody></table>
        <table><tbody><tr><td>b</td></tr></tbody></table>
        <table><tbody>
            <tr><td><a href="#">United States</a></td><td>Americas</td><td>26,854,599</td></tr>
            <tr><td><a href="#">Tuvalu</a></td><td>Oceania</td><td>63</td></tr>
            <tr><td><a href="#">Syria</a></td><td>Asia</td><td>—</td></tr>
        </tbody></table>"##;

    fn pipeline_cfg(url: String, dir: &Path, name: &str, columns: &[&str], index: usize) -> PipelineConfig {
        PipelineConfig {
            url: Url::parse(&url).unwrap(),
            db_path: dir.join(format!("{}.db", name)),
            table_name: name.to_string(),
            output_path: dir.join(format!("{}.csv", name)),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            table_index: index,
        }
    }

    fn bank(url: String, dir: &Path) -> BankDataset {
        let rates = dir.join("exchange_rate.csv");
        fs::write(&rates, "Currency,Rate\nEUR,0.93\nGBP,0.8\nINR,82.95\n").unwrap();
        BankDataset::new(BankConfig {
            pipeline: pipeline_cfg(url, dir, "Largest_banks", &["Name", "MC_USD_Billion"], 0),
            exchange_rates: RateSource::File(rates),
        })
    }

    #[test]
    fn bank_run_writes_csv_db_and_queries() {
        let dir = tempdir().unwrap();
        let ds = bank(serve_once("200 OK", BANK_HTML), dir.path());
        let report = run_dataset(&ds, EmptyPolicy::Abort).unwrap();

        assert_eq!(report.reached, Stage::Queried);
        assert!(!report.aborted());
        assert_eq!(report.rows, 2);
        assert_eq!(report.queries.len(), 3);

        let all = &report.queries[0].result;
        assert_eq!(all.columns().len(), 5);
        assert_eq!(all.get(0, "Name"), Some(&Value::from("JPMorgan Chase")));
        assert_eq!(all.get(1, "MC_USD_Billion"), Some(&Value::from("231.52")));

        let avg = report.queries[1].result.rows()[0][0].as_f64().unwrap();
        assert!((avg - (432.92 + 231.52) / 2.0 * 0.8).abs() < 1e-9);

        let csv = read_csv(&dir.path().join("Largest_banks.csv")).unwrap();
        assert_eq!(csv.len(), 2);
        assert_eq!(
            csv.columns(),
            &["Name", "MC_USD_Billion", "MC_GBP_Billion", "MC_EUR_Billion", "MC_INR_Billion"]
        );
    }

    #[test]
    fn gdp_run_converts_and_filters_in_query() {
        let dir = tempdir().unwrap();
        let ds = GdpDataset::new(pipeline_cfg(
            serve_once("200 OK", GDP_HTML),
            dir.path(),
            "Countries_by_GDP",
            &["Country", "GDP_USD_millions"],
            2,
        ));
        let client = build_client(None).unwrap();
        let report = run(&ds, &client, EmptyPolicy::Abort).unwrap();

        assert_eq!(report.rows, 2);
        let big = &report.queries[0].result;
        assert_eq!(big.len(), 1);
        assert_eq!(big.get(0, "Country"), Some(&Value::from("United States")));
        assert_eq!(big.get(0, GDP_BILLIONS_COLUMN), Some(&Value::Float(26854.6)));
    }

    #[test]
    fn empty_extraction_aborts_before_writing() {
        let dir = tempdir().unwrap();
        let ds = bank(serve_once("200 OK", "<html><body></body></html>"), dir.path());
        let report = run_dataset(&ds, EmptyPolicy::Abort).unwrap();

        assert!(report.aborted());
        assert!(report.queries.is_empty());
        assert!(!dir.path().join("Largest_banks.csv").exists());
        assert!(!dir.path().join("Largest_banks.db").exists());
    }

    #[test]
    fn empty_extraction_can_proceed() {
        let dir = tempdir().unwrap();
        let ds = bank(serve_once("200 OK", "<html><body></body></html>"), dir.path());
        let report = run_dataset(&ds, EmptyPolicy::Proceed).unwrap();

        assert_eq!(report.reached, Stage::Queried);
        assert_eq!(report.rows, 0);
        assert!(report.queries[0].result.is_empty());
        let csv = read_csv(&dir.path().join("Largest_banks.csv")).unwrap();
        assert_eq!(csv.columns().len(), 5);
    }

    #[test]
    fn http_error_is_fatal() {
        let dir = tempdir().unwrap();
        let ds = bank(serve_once("500 Internal Server Error", "boom"), dir.path());
        assert!(run_dataset(&ds, EmptyPolicy::Abort).is_err());
        assert!(!dir.path().join("Largest_banks.csv").exists());
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Start < Stage::Extracted);
        assert!(Stage::Queried < Stage::Done);
        assert_eq!(Stage::CsvWritten.to_string(), "CSV_WRITTEN");
    }
}
