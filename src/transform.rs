// src/transform.rs

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::fetch::get_text;
use crate::table::{Table, Value};

pub const USD_COLUMN: &str = "MC_USD_Billion";
/// Currencies appended by the bank transform, in column order.
pub const BANK_CURRENCIES: [&str; 3] = ["GBP", "EUR", "INR"];

pub const GDP_MILLIONS_COLUMN: &str = "GDP_USD_millions";
pub const GDP_BILLIONS_COLUMN: &str = "GDP_USD_billions";

/// Where the exchange-rate CSV lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSource {
    File(PathBuf),
    Url(Url),
}

impl RateSource {
    /// http(s) URLs are fetched; anything else is a local path.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => RateSource::Url(u),
            _ => RateSource::File(PathBuf::from(raw)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateRow {
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Rate")]
    rate: f64,
}

/// Currency code → rate, in file order. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRates {
    rows: Vec<(String, f64)>,
}

impl ExchangeRates {
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(text.as_bytes());
        let mut rows = Vec::new();
        for (i, rec) in rdr.deserialize::<RateRow>().enumerate() {
            let r = rec.with_context(|| format!("exchange rate row {}", i + 1))?;
            rows.push((r.currency.trim().to_string(), r.rate));
        }
        Ok(Self { rows })
    }

    pub fn load(source: &RateSource, client: &Client) -> Result<Self> {
        let text = match source {
            RateSource::File(p) => fs::read_to_string(p)
                .with_context(|| format!("reading exchange rates {:?}", p))?,
            RateSource::Url(u) => get_text(client, u)?,
        };
        let rates = Self::from_csv_str(&text)?;
        debug!(currencies = rates.rows.len(), "loaded exchange rates");
        Ok(rates)
    }

    /// First matching row wins.
    pub fn rate(&self, currency: &str) -> Result<f64> {
        self.rows
            .iter()
            .find(|(c, _)| c == currency)
            .map(|(_, r)| *r)
            .ok_or_else(|| anyhow!("no exchange rate for currency {:?}", currency))
    }
}

fn parse_float(v: &Value) -> Result<f64> {
    match v {
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("parsing {:?} as a number", s)),
        other => other
            .as_f64()
            .ok_or_else(|| anyhow!("value {:?} is not numeric", other)),
    }
}

/// Round to two decimals, ties to even.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

/// Append `MC_<CODE>_Billion` for each code, valued `MC_USD_Billion * rate`.
pub fn convert_currencies(mut table: Table, rates: &ExchangeRates, codes: &[&str]) -> Result<Table> {
    let usd = table.column_index(USD_COLUMN)?;
    let mut looked_up = Vec::with_capacity(codes.len());
    for &code in codes {
        looked_up.push((code, rates.rate(code)?));
    }

    for (code, rate) in looked_up {
        let name = format!("MC_{}_Billion", code);
        table
            .append_column(&name, |row| Ok(Value::Float(parse_float(&row[usd])? * rate)))
            .with_context(|| format!("deriving {}", name))?;
    }
    info!(columns = ?table.columns(), "converted market caps");
    Ok(table)
}

/// Bank transform: GBP, EUR and INR columns from the USD market cap.
pub fn transform_bank(table: Table, rates: &ExchangeRates) -> Result<Table> {
    convert_currencies(table, rates, &BANK_CURRENCIES)
}

/// GDP transform: "26,854,599" (millions) → 26854.6 (billions), column renamed.
pub fn transform_gdp(mut table: Table) -> Result<Table> {
    table
        .map_column(GDP_MILLIONS_COLUMN, |v| {
            let raw = v
                .as_str()
                .ok_or_else(|| anyhow!("GDP value {:?} is not text", v))?;
            let digits: String = raw.chars().filter(|c| *c != ',').collect();
            let millions = digits
                .trim()
                .parse::<f64>()
                .with_context(|| format!("parsing GDP value {:?}", raw))?;
            Ok(Value::Float(round2(millions / 1000.0)))
        })
        .context("converting GDP to billions")?;
    table.rename_column(GDP_MILLIONS_COLUMN, GDP_BILLIONS_COLUMN)?;
    info!(rows = table.len(), "converted GDP to billions");
    Ok(table)
}
