//! Minimal tabular contract shared by both parties.
//!
//! The core only needs columnar records keyed by an `ID` column; anything
//! richer (CSV files, databases) lives with the caller and is adapted to
//! [`Table`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Column every record must carry
pub const ID_COLUMN: &str = "ID";

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the cell, coercing integers
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Textual view of the cell
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// True when the cell holds a whole number
    pub fn is_integral(&self) -> bool {
        match self {
            Value::Int(_) => true,
            Value::Real(v) => v.fract() == 0.0,
            Value::Text(_) => false,
        }
    }
}

/// One record: column name → value, `ID` always present
pub type Row = BTreeMap<String, Value>;

/// The `ID` cell of a row, if present and textual
pub fn row_id(row: &Row) -> Option<&str> {
    row.get(ID_COLUMN).and_then(Value::as_text)
}

/// Read access the protocol core needs from a party's data
pub trait Table: Send + Sync {
    /// Identifiers in input order, duplicates preserved
    fn ids(&self) -> Vec<String>;

    /// First row carrying the given identifier
    fn get(&self, id: &str) -> Option<&Row>;

    /// All rows in table order
    fn rows(&self) -> &[Row];

    fn len(&self) -> usize {
        self.rows().len()
    }

    fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

/// In-memory row store, the reference [`Table`] implementation
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    rows: Vec<Row>,
    first_by_id: HashMap<String, usize>,
}

impl MemTable {
    pub fn new(rows: Vec<Row>) -> Self {
        let mut table = Self::default();
        for row in rows {
            table.push(row);
        }
        table
    }

    /// Append a row, keeping the first-occurrence index current
    pub fn push(&mut self, row: Row) {
        if let Some(id) = row_id(&row) {
            self.first_by_id
                .entry(id.to_string())
                .or_insert(self.rows.len());
        }
        self.rows.push(row);
    }
}

impl Table for MemTable {
    fn ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row_id(row).map(str::to_string))
            .collect()
    }

    fn get(&self, id: &str) -> Option<&Row> {
        self.first_by_id.get(id).map(|index| &self.rows[*index])
    }

    fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Inner join of a table with a batch of foreign rows on the `ID` column.
///
/// For each left row whose identifier appears on the right, the result is
/// the left row extended with the right row's columns, in left order.
pub fn inner_join(left: &dyn Table, right: &[Row]) -> Vec<Row> {
    let mut right_by_id: HashMap<&str, &Row> = HashMap::with_capacity(right.len());
    for row in right {
        if let Some(id) = row_id(row) {
            right_by_id.entry(id).or_insert(row);
        }
    }

    left.rows()
        .iter()
        .filter_map(|row| {
            let peer = row_id(row).and_then(|id| right_by_id.get(id))?;
            let mut merged = row.clone();
            merged.extend((*peer).clone());
            Some(merged)
        })
        .collect()
}

/// Sum the given numeric columns per distinct value of `group_by`.
pub fn group_sum(
    rows: &[Row],
    group_by: &str,
    columns: &[&str],
) -> Result<BTreeMap<String, f64>> {
    let mut totals = BTreeMap::new();
    for row in rows {
        let group = row
            .get(group_by)
            .and_then(Value::as_text)
            .ok_or_else(|| Error::Alignment(format!("row lacks a {group_by:?} column")))?;

        let mut contribution = 0.0;
        for column in columns {
            contribution += row
                .get(*column)
                .and_then(Value::as_real)
                .ok_or_else(|| Error::Alignment(format!("row lacks a numeric {column:?} column")))?;
        }
        *totals.entry(group.to_string()).or_insert(0.0) += contribution;
    }
    Ok(totals)
}

/// True when a numeric column holds only whole numbers across all rows
pub fn column_is_integral(rows: &[Row], column: &str) -> bool {
    rows.iter()
        .filter_map(|row| row.get(column))
        .all(Value::is_integral)
}

/// Distinct identifiers of a slice of rows
pub fn distinct_ids(rows: &[Row]) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| row_id(row).map(str::to_string))
        .collect()
}
