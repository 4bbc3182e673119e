// src/config.rs
//
// Typed run configuration, read once at startup from the environment
// (optionally seeded from a `.env` file). Only the keys of the selected
// pipelines are required.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{path::PathBuf, str::FromStr};
use url::Url;

use crate::transform::RateSource;

/// Which pipeline(s) a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Bank,
    Gdp,
    All,
}

impl FromStr for Selection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bank" => Ok(Selection::Bank),
            "gdp" => Ok(Selection::Gdp),
            "all" => Ok(Selection::All),
            other => bail!("unknown pipeline {:?} (expected bank, gdp or all)", other),
        }
    }
}

/// Applied uniformly when an extraction yields no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Log and stop before writing anything.
    Abort,
    /// Carry on and write empty outputs.
    Proceed,
}

impl FromStr for EmptyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(EmptyPolicy::Abort),
            "proceed" => Ok(EmptyPolicy::Proceed),
            other => bail!("unknown empty policy {:?} (expected abort or proceed)", other),
        }
    }
}

/// Settings shared by both pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub url: Url,
    pub db_path: PathBuf,
    pub table_name: String,
    pub output_path: PathBuf,
    pub columns: Vec<String>,
    /// Position of the target table element in the page.
    pub table_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BankConfig {
    pub pipeline: PipelineConfig,
    pub exchange_rates: RateSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Plain-text debug log; `None` disables it.
    pub file: Option<PathBuf>,
    /// Size at which the debug log is rotated.
    pub rotate_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("logs/code_log.log")),
            rotate_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub selection: Selection,
    pub empty_policy: EmptyPolicy,
    pub bank: Option<BankConfig>,
    pub gdp: Option<PipelineConfig>,
}

/// Load `.env` from the working directory if there is one.
pub fn load_dotenv() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("loading .env"),
    }
}

/// Logging settings never fail; bad values fall back to defaults at init.
pub fn log_config<F>(lookup: F) -> LogConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = LogConfig::default();
    if let Some(level) = lookup("ETL_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
        cfg.level = level;
    }
    if let Some(file) = lookup("ETL_LOG_FILE") {
        cfg.file = if file.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(file))
        };
    }
    cfg
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let selection = match lookup("ETL_PIPELINE") {
            Some(v) => v.parse().context("ETL_PIPELINE")?,
            None => Selection::Bank,
        };
        let empty_policy = match lookup("ETL_EMPTY_POLICY") {
            Some(v) => v.parse().context("ETL_EMPTY_POLICY")?,
            None => EmptyPolicy::Abort,
        };

        let bank = match selection {
            Selection::Bank | Selection::All => Some(BankConfig {
                pipeline: pipeline_config(&lookup, "BANK", "BANK_TABLE_INDEX", 0)?,
                exchange_rates: RateSource::parse(&required(&lookup, "BANK_EXCHANGE_RATE_URL")?),
            }),
            Selection::Gdp => None,
        };
        let gdp = match selection {
            Selection::Gdp | Selection::All => Some(pipeline_config(
                &lookup,
                "GDP_DATA",
                "GDP_DATA_TABLE_INDEX",
                2,
            )?),
            Selection::Bank => None,
        };

        Ok(Self {
            selection,
            empty_policy,
            bank,
            gdp,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("{} environment variable not set", key))
}

fn pipeline_config<F>(lookup: &F, prefix: &str, index_key: &str, default_index: usize) -> Result<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let url_key = key("URL");
    let raw_url = required(lookup, &url_key)?;
    let url = Url::parse(&raw_url).with_context(|| format!("{} is not a valid URL", url_key))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("{} must be an http(s) URL, got {:?}", url_key, raw_url);
    }

    let table_key = key("TABLE");
    let table_name = required(lookup, &table_key)?;
    if !is_identifier(&table_name) {
        bail!("{} {:?} is not a plain SQL identifier", table_key, table_name);
    }

    let schema_key = key("SCHEMA");
    let columns = parse_schema(&required(lookup, &schema_key)?)
        .with_context(|| format!("{} is malformed", schema_key))?;

    let table_index = match lookup(index_key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer", index_key))?,
        None => default_index,
    };

    Ok(PipelineConfig {
        url,
        db_path: PathBuf::from(required(lookup, &key("DB"))?),
        table_name,
        output_path: PathBuf::from(required(lookup, &key("OUTPUT"))?),
        columns,
        table_index,
    })
}

static SQL_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex should parse"));

fn is_identifier(s: &str) -> bool {
    SQL_IDENTIFIER.is_match(s)
}

/// Parse a two-name list literal: `["A","B"]` or `['A','B']`.
pub fn parse_schema(raw: &str) -> Result<Vec<String>> {
    let normalized = raw.trim().replace('\'', "\"");
    let columns: Vec<String> =
        serde_json::from_str(&normalized).context("expected a list of column names")?;
    if columns.len() != 2 {
        bail!("expected 2 column names, got {}", columns.len());
    }
    if let Some(c) = columns.iter().find(|c| c.trim().is_empty()) {
        bail!("empty column name {:?}", c);
    }
    Ok(columns)
}
