//! Typed table model: ordered columns, row order, and sparse cell storage.
//!
//! The table is the unit of replication. The server owns the authoritative
//! copy; every client owns a mirror equal to the authoritative state at its
//! last synced version. Only the serialized JSON shape produced by
//! [`Table::to_json`] is contractual:
//!
//! ```text
//! {
//!   "columns": [ { "id": "...", "type": "text" | "number" }, ... ],
//!   "rows":    [ { "id": "...", "cellValuesByColumnId": { ... } }, ... ]
//! }
//! ```
//!
//! `columns` are in insertion order, `rows` in row order, and a row's value
//! map holds only the cells that have been assigned.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

/// Opaque row identifier. Unique among rows of a table.
pub type RowId = String;

/// Opaque column identifier. Unique among columns of a table.
pub type ColumnId = String;

// ───────────────────────────────────────────────────────────────────
// Cell types and values
// ───────────────────────────────────────────────────────────────────

/// Closed set of column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    Text,
    Number,
}

impl CellType {
    /// Wire name used in the serialized `columns` array.
    pub fn name(&self) -> &'static str {
        match self {
            CellType::Text => "text",
            CellType::Number => "number",
        }
    }

    /// Coerce a value into this type, or `None` if it cannot represent it.
    ///
    /// `Text` accepts anything: strings pass through, numbers are formatted
    /// the way JSON prints them (`2.0` becomes `"2"`). `Number` keeps finite
    /// numbers and parses strings, rejecting anything that does not parse to
    /// a finite float.
    pub fn coerce(&self, value: &CellValue) -> Option<CellValue> {
        match (self, value) {
            (CellType::Text, CellValue::Text(s)) => Some(CellValue::Text(s.clone())),
            (CellType::Text, CellValue::Number(n)) => Some(CellValue::Text(format_number(*n))),
            (CellType::Number, CellValue::Number(n)) => {
                n.is_finite().then(|| CellValue::Number(*n))
            }
            (CellType::Number, CellValue::Text(s)) => {
                let parsed = s.trim().parse::<f64>().ok()?;
                parsed.is_finite().then(|| CellValue::Number(parsed))
            }
        }
    }
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored cell value. The variant always matches the owning column's type;
/// [`crate::update::TableUpdate::apply`] enforces this.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    /// JSON representation: text as a string, numbers as JSON numbers.
    /// Integral floats are emitted without a fractional part.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
        }
    }
}

/// Format a number the way JSON stringification does: no trailing `.0` on
/// integral values.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ───────────────────────────────────────────────────────────────────
// Table
// ───────────────────────────────────────────────────────────────────

/// The replicated table: ordered typed columns, ordered rows, sparse cells.
///
/// Three invariants hold on every authoritative copy (and, between
/// broadcasts, on every mirror):
///
/// 1. The keys of `cells` and the members of `row_order` coincide, and
///    `row_order` has no duplicates.
/// 2. Every stored value is a fixed point of its column's `coerce`.
/// 3. Every stored cell belongs to a column that exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column order is insertion order; it is the serialization order.
    pub(crate) columns: Vec<(ColumnId, CellType)>,
    /// Authoritative row order.
    pub(crate) row_order: Vec<RowId>,
    /// Assigned cells per row. The inner map exists exactly while the row
    /// does, and holds only assigned cells.
    pub(crate) cells: HashMap<RowId, HashMap<ColumnId, CellValue>>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position of a row, or `None` if it is not present.
    pub fn row_index(&self, row: &str) -> Option<usize> {
        self.row_order.iter().position(|r| r == row)
    }

    /// Type of a column, or `None` if it does not exist.
    pub fn column_type(&self, column: &str) -> Option<CellType> {
        self.columns
            .iter()
            .find(|(id, _)| id == column)
            .map(|(_, ty)| *ty)
    }

    /// The assigned value of a cell, or `None` if unset.
    pub fn cell(&self, row: &str, column: &str) -> Option<&CellValue> {
        self.cells.get(row)?.get(column)
    }

    /// Rows in authoritative order.
    pub fn row_order(&self) -> &[RowId] {
        &self.row_order
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[(ColumnId, CellType)] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_order.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Owned deep copy. Snapshots are what the server hands to clients on
    /// connect and what clients replay their outbox over.
    pub fn snapshot(&self) -> Table {
        self.clone()
    }

    /// Check the three table invariants. Used by tests and by the server's
    /// debug assertion after every process pass.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        for row in &self.row_order {
            if !seen.insert(row) || !self.cells.contains_key(row) {
                return false;
            }
        }
        if self.cells.len() != self.row_order.len() {
            return false;
        }
        for row_cells in self.cells.values() {
            for (column, value) in row_cells {
                match self.column_type(column) {
                    Some(ty) => match ty.coerce(value) {
                        Some(canonical) if canonical == *value => {}
                        _ => return false,
                    },
                    None => return false,
                }
            }
        }
        let mut columns = HashSet::new();
        self.columns.iter().all(|(id, _)| columns.insert(id))
    }

    /// Build the contractual JSON value.
    pub fn to_value(&self) -> Value {
        let columns: Vec<Value> = self
            .columns
            .iter()
            .map(|(id, ty)| json!({ "id": id, "type": ty.name() }))
            .collect();

        let rows: Vec<Value> = self
            .row_order
            .iter()
            .map(|row| {
                let mut values = Map::new();
                if let Some(row_cells) = self.cells.get(row) {
                    for (column, _) in &self.columns {
                        if let Some(value) = row_cells.get(column) {
                            values.insert(column.clone(), value.to_json());
                        }
                    }
                }
                json!({ "id": row, "cellValuesByColumnId": Value::Object(values) })
            })
            .collect();

        json!({ "columns": columns, "rows": rows })
    }

    /// Serialize to the contractual JSON string.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
