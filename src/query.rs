// src/query.rs

use anyhow::{Context, Result};
use rusqlite::{types::ValueRef, Connection};
use tracing::info;

use crate::table::{Table, Value};

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(format!("<{} bytes>", b.len())),
    }
}

/// Run a read query and collect its result set. Query text is trusted.
pub fn run_query(query: &str, conn: &Connection) -> Result<Table> {
    info!("query statement: {}", query);
    let mut stmt = conn
        .prepare(query)
        .with_context(|| format!("preparing query {:?}", query))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let width = columns.len();
    let mut out = Table::new(&columns);

    let mut rows = stmt.query([]).with_context(|| format!("running query {:?}", query))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sql(row.get_ref(i)?));
        }
        out.push_row(values)?;
    }
    info!("query output:\n{}", out);
    Ok(out)
}
