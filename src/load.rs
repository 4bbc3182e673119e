// src/load.rs

use anyhow::{Context, Result};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use std::{fs, path::Path};
use tracing::{debug, info, instrument};

use crate::table::{Table, Value};

/// Open (creating if needed) the SQLite file at `path`.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    Connection::open(path).with_context(|| format!("opening database {:?}", path))
}

/// Write header + rows to `path`, replacing any existing file. No index column.
#[instrument(level = "debug", skip(table))]
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("creating CSV file {:?}", path))?;
    wtr.write_record(table.columns())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush().with_context(|| format!("flushing CSV file {:?}", path))?;
    info!(rows = table.len(), path = %path.display(), "wrote CSV");
    Ok(())
}

/// Read a CSV written by `write_csv` back as text cells.
pub fn read_csv(path: &Path) -> Result<Table> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("opening CSV file {:?}", path))?;
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut table = Table::new(&headers);
    for rec in rdr.records() {
        let rec = rec?;
        table.push_row(rec.iter().map(Value::from).collect())?;
    }
    Ok(table)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Declared SQLite type for one column, from the values it holds.
fn column_type(table: &Table, idx: usize) -> &'static str {
    let mut saw_float = false;
    let mut saw_int = false;
    for row in table.rows() {
        match &row[idx] {
            Value::Null => {}
            Value::Float(_) => saw_float = true,
            Value::Integer(_) => saw_int = true,
            Value::Text(_) => return "TEXT",
        }
    }
    match (saw_float, saw_int) {
        (true, _) => "REAL",
        (false, true) => "INTEGER",
        (false, false) => "TEXT",
    }
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

/// Drop-and-recreate `name`, then insert every row, in one transaction.
#[instrument(level = "debug", skip(table, conn))]
pub fn write_table(table: &Table, conn: &mut Connection, name: &str) -> Result<()> {
    let ident = quote_ident(name);
    let defs: Vec<String> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} {}", quote_ident(c), column_type(table, i)))
        .collect();
    let placeholders = vec!["?"; table.columns().len()].join(", ");

    let tx = conn.transaction().context("starting load transaction")?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", ident), [])
        .with_context(|| format!("dropping table {}", name))?;
    tx.execute(&format!("CREATE TABLE {} ({})", ident, defs.join(", ")), [])
        .with_context(|| format!("creating table {}", name))?;
    debug!(columns = ?defs, "created table");
    {
        let mut stmt = tx.prepare(&format!("INSERT INTO {} VALUES ({})", ident, placeholders))?;
        for (i, row) in table.rows().iter().enumerate() {
            stmt.execute(params_from_iter(row.iter().map(to_sql)))
                .with_context(|| format!("inserting row {} into {}", i, name))?;
        }
    }
    tx.commit().context("committing load transaction")?;
    info!(rows = table.len(), table = name, "loaded table");
    Ok(())
}
