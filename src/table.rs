// src/table.rs

use anyhow::{anyhow, bail, Result};
use std::fmt;

/// A single cell. Extracted cells start life as `Text`; transforms and
/// store reads introduce the numeric variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            // whole floats keep a trailing ".0" so CSV output reads back as a float
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Ordered rows over a fixed, ordered set of named columns.
///
/// Rows are stored positionally; `columns[i]` names `row[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("column {:?} not found in {:?}", name, self.columns))
    }

    /// Append a row; its width must match the column count.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    /// Cell lookup by row position and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Append a derived column, computing each row's value from the row itself.
    pub fn append_column<F>(&mut self, name: &str, mut derive: F) -> Result<()>
    where
        F: FnMut(&[Value]) -> Result<Value>,
    {
        if self.columns.iter().any(|c| c == name) {
            bail!("column {:?} already exists", name);
        }
        let mut derived = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            derived.push(derive(row)?);
        }
        for (row, v) in self.rows.iter_mut().zip(derived) {
            row.push(v);
        }
        self.columns.push(name.to_string());
        Ok(())
    }

    /// Replace every value of `column` in place.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&Value) -> Result<Value>,
    {
        let idx = self.column_index(column)?;
        for row in self.rows.iter_mut() {
            row[idx] = f(&row[idx])?;
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.column_index(from)?;
        if from != to && self.columns.iter().any(|c| c == to) {
            bail!("cannot rename {:?}: column {:?} already exists", from, to);
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }
}

/// Aligned, index-prefixed rendering used when logging tables.
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return write!(
                f,
                "Empty table\nColumns: [{}]\nIndex: []",
                self.columns.join(", ")
            );
        }

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect();
        let index_width = (self.rows.len() - 1).to_string().len();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:w$}", "", w = index_width)?;
        for (c, w) in self.columns.iter().zip(&widths) {
            write!(f, "  {:>w$}", c, w = *w)?;
        }
        for (i, row) in cells.iter().enumerate() {
            write!(f, "\n{:<w$}", i, w = index_width)?;
            for (v, w) in row.iter().zip(&widths) {
                write!(f, "  {:>w$}", v, w = *w)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(&["Name", "MC_USD_Billion"]);
        t.push_row(vec!["Company A".into(), "100.0".into()]).unwrap();
        t.push_row(vec!["Company B".into(), "200.5".into()]).unwrap();
        t
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut t = Table::new(&["a", "b"]);
        assert!(t.push_row(vec!["x".into()]).is_err());
        assert!(t.is_empty());
    }

    #[test]
    fn append_column_keeps_row_order() {
        let mut t = sample();
        t.append_column("len", |row| {
            Ok(Value::Integer(row[0].as_str().unwrap().len() as i64))
        })
        .unwrap();
        assert_eq!(t.columns(), &["Name", "MC_USD_Billion", "len"]);
        assert_eq!(t.get(0, "Name"), Some(&Value::from("Company A")));
        assert_eq!(t.get(1, "len"), Some(&Value::Integer(9)));
    }

    #[test]
    fn append_column_refuses_duplicate_name() {
        let mut t = sample();
        assert!(t.append_column("Name", |_| Ok(Value::Null)).is_err());
        assert_eq!(t.columns().len(), 2);
    }

    #[test]
    fn rename_unknown_column_fails() {
        let mut t = sample();
        assert!(t.rename_column("missing", "x").is_err());
        t.rename_column("Name", "Bank").unwrap();
        assert_eq!(t.columns()[0], "Bank");
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(Value::Float(100.0).to_string(), "100.0");
        assert_eq!(Value::Float(80.05).to_string(), "80.05");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn display_empty_lists_columns() {
        let t = Table::new(&["Name", "MC_USD_Billion"]);
        assert_eq!(
            t.to_string(),
            "Empty table\nColumns: [Name, MC_USD_Billion]\nIndex: []"
        );
    }

    #[test]
    fn display_aligns_columns() {
        let rendered = sample().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0  Company A"));
        assert!(lines[2].ends_with("200.5"));
    }
}
