// src/extract.rs
//
// Pulls one HTML table out of a page into a `Table` of raw strings.
// Which element holds the rows is a `TableSelector`; how a row's cells map
// onto values is a `RowRule`.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch::get_text;
use crate::table::{Table, Value};

/// Picks the `index`-th element matching `css` (document order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelector {
    pub css: String,
    pub index: usize,
}

impl TableSelector {
    pub fn nth_tbody(index: usize) -> Self {
        Self {
            css: "tbody".to_string(),
            index,
        }
    }
}

/// What to do when the selector matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingTable {
    /// Return an empty table with the requested columns.
    Empty,
    /// Fail the extraction.
    Fail,
}

/// Maps the cells of one `<tr>` to column values.
pub trait RowRule {
    /// Number of values each accepted row produces.
    fn arity(&self) -> usize;

    /// Rows dropped before the rule is applied (header rows).
    fn skip_rows(&self) -> usize {
        0
    }

    /// `Ok(None)` skips the row; `Err` aborts the extraction.
    fn extract(&self, cells: &[ElementRef<'_>]) -> Result<Option<Vec<String>>>;
}

/// Attribute stamped on every `<tbody>` written in the page source. The HTML5
/// parser inserts a `tbody` into tables that have none; only stamped ones count.
const SOURCE_TBODY_ATTR: &str = "data-source-tbody";

static TBODY_OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<tbody([\s/>])").expect("static regex should parse"));

fn mark_source_tbodies(html: &str) -> String {
    TBODY_OPEN_TAG
        .replace_all(html, format!("<tbody {}$1", SOURCE_TBODY_ATTR).as_str())
        .into_owned()
}

fn is_parser_inserted(el: &ElementRef<'_>) -> bool {
    el.value().name() == "tbody" && el.value().attr(SOURCE_TBODY_ATTR).is_none()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector should parse")
}

fn cell<'a, 'b>(cells: &'b [ElementRef<'a>], idx: usize) -> Result<&'b ElementRef<'a>> {
    cells
        .get(idx)
        .ok_or_else(|| anyhow!("row has {} cells, expected cell {}", cells.len(), idx))
}

/// Bank listing: name is the text of the second link in the second cell,
/// market cap is the stripped text of the third cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct BankRowRule;

impl RowRule for BankRowRule {
    fn arity(&self) -> usize {
        2
    }

    fn skip_rows(&self) -> usize {
        1
    }

    fn extract(&self, cells: &[ElementRef<'_>]) -> Result<Option<Vec<String>>> {
        let a = selector("a");
        let name = cell(cells, 1)?
            .select(&a)
            .nth(1)
            .ok_or_else(|| anyhow!("second cell has no second link"))?
            .text()
            .collect::<String>();
        let market_cap = cell(cells, 2)?.text().collect::<String>().trim().to_string();
        Ok(Some(vec![name, market_cap]))
    }
}

/// Placeholder shown on the GDP page for countries without an estimate.
pub const NO_DATA_GLYPH: &str = "—";

/// GDP listing: rows without cells, without a country link, or with the
/// no-data glyph in the estimate cell are skipped. The country is the first
/// link's text; the estimate is the first node of the third cell, untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdpRowRule;

impl RowRule for GdpRowRule {
    fn arity(&self) -> usize {
        2
    }

    fn extract(&self, cells: &[ElementRef<'_>]) -> Result<Option<Vec<String>>> {
        if cells.is_empty() {
            return Ok(None);
        }
        let link = match cells[0].select(&selector("a")).next() {
            Some(l) => l,
            None => return Ok(None),
        };
        let estimate = cell(cells, 2)?;
        if estimate.text().any(|t| t.contains(NO_DATA_GLYPH)) {
            return Ok(None);
        }

        let country = link.text().next().unwrap_or_default().to_string();
        let first = estimate
            .children()
            .next()
            .ok_or_else(|| anyhow!("estimate cell is empty"))?;
        let raw = match first.value().as_text() {
            Some(text) => text.to_string(),
            None => ElementRef::wrap(first)
                .map(|e| e.text().collect::<String>())
                .unwrap_or_default(),
        };
        Ok(Some(vec![country, raw]))
    }
}

/// Parse an already-fetched document. Pure; used by `extract` and tests.
pub fn parse_table<R: RowRule + ?Sized>(
    html: &str,
    columns: &[String],
    table: &TableSelector,
    missing: MissingTable,
    rule: &R,
) -> Result<Table> {
    if columns.len() != rule.arity() {
        bail!(
            "schema {:?} has {} columns but the row rule produces {}",
            columns,
            columns.len(),
            rule.arity()
        );
    }

    let table_sel = Selector::parse(&table.css)
        .map_err(|e| anyhow!("invalid table selector {:?}: {:?}", table.css, e))?;
    let document = Html::parse_document(&mark_source_tbodies(html));
    let mut out = Table::new(columns);

    let candidates: Vec<ElementRef> = document
        .select(&table_sel)
        .filter(|el| !is_parser_inserted(el))
        .collect();
    let body = match candidates.get(table.index) {
        Some(b) => *b,
        None => match missing {
            MissingTable::Empty => {
                warn!(css = %table.css, index = table.index, "no matching table element; returning empty table");
                return Ok(out);
            }
            MissingTable::Fail => bail!(
                "found {} {:?} elements, need index {}",
                candidates.len(),
                table.css,
                table.index
            ),
        },
    };

    let tr = selector("tr");
    let td = selector("td");
    let rows: Vec<ElementRef> = body.select(&tr).collect();
    debug!(rows = rows.len(), "located table rows");

    for (i, row) in rows.iter().enumerate().skip(rule.skip_rows()) {
        let cells: Vec<ElementRef> = row.select(&td).collect();
        let values = match rule
            .extract(&cells)
            .with_context(|| format!("extracting row {}", i))?
        {
            Some(v) => v,
            None => continue,
        };
        if let Some(col) = values.iter().position(|v| v.trim().is_empty()) {
            bail!("row {}: empty value for column {:?}", i, columns[col]);
        }
        out.push_row(values.into_iter().map(Value::from).collect())?;
    }

    Ok(out)
}

/// Fetch `url` and extract one table from it.
#[instrument(level = "info", skip(client, url, table, rule), fields(url = %url))]
pub fn extract<R: RowRule + ?Sized>(
    client: &Client,
    url: &Url,
    columns: &[String],
    table: &TableSelector,
    missing: MissingTable,
    rule: &R,
) -> Result<Table> {
    let html = get_text(client, url)?;
    let out = parse_table(&html, columns, table, missing, rule)
        .with_context(|| format!("parsing table from {}", url))?;
    info!(rows = out.len(), "extracted table");
    Ok(out)
}
