//! Update taxonomy and shift-context index rewriting.
//!
//! Every edit is one of eight [`TableUpdate`] variants. An update knows how
//! to *apply* itself to a table (all-or-nothing), how to *transform* its
//! carried indices through a [`ShiftContext`] built from the accepted
//! updates it did not see, and what it *contributes* to a downstream shift
//! context once applied.
//!
//! ```text
//! client baseline v          server head v+k
//!       │                          │
//!       │   MoveRow(row, target)   │
//!       └──────────────────────────┤
//!                                  ▼
//!                   ShiftContext(history v+1 ..= v+k)
//!                                  │
//!                       target' = transform(target)
//!                                  │
//!                                  ▼
//!                        apply(table) → RowShift
//! ```
//!
//! `apply` returns its row-position bookkeeping as a [`RowShift`] instead of
//! mutating the update in place; the server stores it alongside the accepted
//! message, so "shift before apply" cannot be expressed.
//!
//! Reference: Ellis & Gibbs, Concurrency Control in Groupware Systems (the
//! index rewriting here is the row-operation transform reduced to pure
//! insert/delete arithmetic).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::{CellType, CellValue, ColumnId, RowId, Table};

/// A merge conflict: the reason an update failed to apply or transform.
///
/// The server treats every variant the same way (reject the message and
/// poison its group); the variants exist so conflicts can be logged with a
/// usable reason.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    #[error("row {0:?} already exists")]
    DuplicateRow(RowId),
    #[error("row {0:?} does not exist")]
    UnknownRow(RowId),
    #[error("column {0:?} already exists")]
    DuplicateColumn(ColumnId),
    #[error("column {0:?} does not exist")]
    UnknownColumn(ColumnId),
    #[error("move target {target} out of range for {len} rows")]
    TargetOutOfRange { target: usize, len: usize },
    #[error("column {column:?} is not a {required} column")]
    WrongColumnType { column: ColumnId, required: CellType },
    #[error("value in row {row:?} cannot be coerced to {target}")]
    Uncoercible { row: RowId, target: CellType },
    #[error("number cell values must be finite")]
    NonFiniteNumber,
    #[error("index refers to a row deleted by an intervening update")]
    Tombstoned,
}

// ───────────────────────────────────────────────────────────────────
// Shift context
// ───────────────────────────────────────────────────────────────────

/// One positional mutation applied to the row sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftRecord {
    Insert(usize),
    Delete(usize),
}

/// Cumulative insert/delete records across a span of accepted updates,
/// stored in the order they occurred. Rewrites row indices authored against
/// a historical baseline into their present-day positions.
#[derive(Debug, Clone, Default)]
pub struct ShiftContext {
    records: Vec<ShiftRecord>,
}

impl ShiftContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an insertion at `idx`.
    pub fn insert_at(&mut self, idx: usize) {
        self.records.push(ShiftRecord::Insert(idx));
    }

    /// Record a deletion at `idx`.
    pub fn delete_at(&mut self, idx: usize) {
        self.records.push(ShiftRecord::Delete(idx));
    }

    /// Record a move: a deletion at `start` followed by an insertion at
    /// `end`.
    pub fn moved(&mut self, start: usize, end: usize) {
        self.delete_at(start);
        self.insert_at(end);
    }

    /// Rewrite a baseline index into the present, folding the records in
    /// order. Returns `None` (a tombstone) when the row the index referred
    /// to was deleted by an intervening update; any update whose essential
    /// index is tombstoned must fail as a merge conflict.
    pub fn transform(&self, idx: usize) -> Option<usize> {
        let mut idx = idx;
        for record in &self.records {
            match *record {
                ShiftRecord::Insert(i) => {
                    if idx >= i {
                        idx += 1;
                    }
                }
                ShiftRecord::Delete(i) => {
                    if idx == i {
                        return None;
                    }
                    if idx > i {
                        idx -= 1;
                    }
                }
            }
        }
        Some(idx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Row-position bookkeeping produced by a successful apply. The server
/// stores this in the history slot next to the accepted message and folds it
/// into shift contexts for later transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowShift {
    /// The update did not change any row position.
    #[default]
    None,
    /// A row was removed from `index`.
    Removed { index: usize },
    /// A row moved from `from` to `to`.
    Moved { from: usize, to: usize },
}

impl RowShift {
    /// Append this update's contribution to a downstream shift context.
    pub fn record(&self, ctx: &mut ShiftContext) {
        match *self {
            RowShift::None => {}
            RowShift::Removed { index } => ctx.delete_at(index),
            RowShift::Moved { from, to } => ctx.moved(from, to),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// The update taxonomy
// ───────────────────────────────────────────────────────────────────

/// The eight table mutations. Rows and columns are addressed by id; only
/// `MoveRow` carries an index whose meaning depends on the baseline table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableUpdate {
    CreateRow { row: RowId },
    DestroyRow { row: RowId },
    MoveRow { row: RowId, target: usize },
    CreateColumn { column: ColumnId, cell_type: CellType },
    DestroyColumn { column: ColumnId },
    UpdateColumnType { column: ColumnId, cell_type: CellType },
    UpdateTextCell { row: RowId, column: ColumnId, value: String },
    UpdateNumberCell { row: RowId, column: ColumnId, value: f64 },
}

impl TableUpdate {
    /// Whether this update carries an index that must be rewritten when the
    /// baseline table is stale. Row and column ids are stable; only
    /// `MoveRow`'s target position is positional.
    pub fn needs_transform(&self) -> bool {
        matches!(self, TableUpdate::MoveRow { .. })
    }

    /// Rewrite carried indices through `ctx`. A tombstoned index is a merge
    /// conflict.
    pub fn transform(&mut self, ctx: &ShiftContext) -> Result<(), UpdateError> {
        if let TableUpdate::MoveRow { target, .. } = self {
            *target = ctx.transform(*target).ok_or(UpdateError::Tombstoned)?;
        }
        Ok(())
    }

    /// Apply this update to `table`. On success, returns the row-position
    /// bookkeeping for downstream shift contexts. On failure the table is
    /// unchanged.
    pub fn apply(&self, table: &mut Table) -> Result<RowShift, UpdateError> {
        match self {
            TableUpdate::CreateRow { row } => {
                if table.row_index(row).is_some() {
                    return Err(UpdateError::DuplicateRow(row.clone()));
                }
                table.row_order.push(row.clone());
                table.cells.insert(row.clone(), Default::default());
                Ok(RowShift::None)
            }

            TableUpdate::DestroyRow { row } => {
                let index = table
                    .row_index(row)
                    .ok_or_else(|| UpdateError::UnknownRow(row.clone()))?;
                table.row_order.remove(index);
                table.cells.remove(row);
                Ok(RowShift::Removed { index })
            }

            TableUpdate::MoveRow { row, target } => {
                let from = table
                    .row_index(row)
                    .ok_or_else(|| UpdateError::UnknownRow(row.clone()))?;
                // Valid targets are positions in the post-removal sequence.
                // Out-of-range targets are rejected, never clamped.
                let len = table.row_order.len();
                if *target > len.saturating_sub(1) {
                    return Err(UpdateError::TargetOutOfRange { target: *target, len });
                }
                let id = table.row_order.remove(from);
                table.row_order.insert(*target, id);
                Ok(RowShift::Moved { from, to: *target })
            }

            TableUpdate::CreateColumn { column, cell_type } => {
                if table.column_type(column).is_some() {
                    return Err(UpdateError::DuplicateColumn(column.clone()));
                }
                table.columns.push((column.clone(), *cell_type));
                Ok(RowShift::None)
            }

            TableUpdate::DestroyColumn { column } => {
                let position = table
                    .columns
                    .iter()
                    .position(|(id, _)| id == column)
                    .ok_or_else(|| UpdateError::UnknownColumn(column.clone()))?;
                table.columns.remove(position);
                for row_cells in table.cells.values_mut() {
                    row_cells.remove(column);
                }
                Ok(RowShift::None)
            }

            TableUpdate::UpdateColumnType { column, cell_type } => {
                if table.column_type(column).is_none() {
                    return Err(UpdateError::UnknownColumn(column.clone()));
                }
                // Validate every assigned cell before mutating anything, so
                // a coercion failure leaves the table untouched.
                let mut coerced: Vec<(RowId, CellValue)> = Vec::new();
                for row in &table.row_order {
                    if let Some(value) = table.cells.get(row).and_then(|c| c.get(column)) {
                        let value = cell_type.coerce(value).ok_or_else(|| {
                            UpdateError::Uncoercible { row: row.clone(), target: *cell_type }
                        })?;
                        coerced.push((row.clone(), value));
                    }
                }
                for (id, ty) in &mut table.columns {
                    if id == column {
                        *ty = *cell_type;
                    }
                }
                for (row, value) in coerced {
                    if let Some(row_cells) = table.cells.get_mut(&row) {
                        row_cells.insert(column.clone(), value);
                    }
                }
                Ok(RowShift::None)
            }

            TableUpdate::UpdateTextCell { row, column, value } => {
                match table.column_type(column) {
                    None => return Err(UpdateError::UnknownColumn(column.clone())),
                    Some(CellType::Text) => {}
                    Some(_) => {
                        return Err(UpdateError::WrongColumnType {
                            column: column.clone(),
                            required: CellType::Text,
                        })
                    }
                }
                let row_cells = table
                    .cells
                    .get_mut(row)
                    .ok_or_else(|| UpdateError::UnknownRow(row.clone()))?;
                row_cells.insert(column.clone(), CellValue::Text(value.clone()));
                Ok(RowShift::None)
            }

            TableUpdate::UpdateNumberCell { row, column, value } => {
                match table.column_type(column) {
                    None => return Err(UpdateError::UnknownColumn(column.clone())),
                    Some(CellType::Number) => {}
                    Some(_) => {
                        return Err(UpdateError::WrongColumnType {
                            column: column.clone(),
                            required: CellType::Number,
                        })
                    }
                }
                if !value.is_finite() {
                    return Err(UpdateError::NonFiniteNumber);
                }
                let row_cells = table
                    .cells
                    .get_mut(row)
                    .ok_or_else(|| UpdateError::UnknownRow(row.clone()))?;
                row_cells.insert(column.clone(), CellValue::Number(*value));
                Ok(RowShift::None)
            }
        }
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TableUpdate::CreateRow { .. } => "create_row",
            TableUpdate::DestroyRow { .. } => "destroy_row",
            TableUpdate::MoveRow { .. } => "move_row",
            TableUpdate::CreateColumn { .. } => "create_column",
            TableUpdate::DestroyColumn { .. } => "destroy_column",
            TableUpdate::UpdateColumnType { .. } => "update_column_type",
            TableUpdate::UpdateTextCell { .. } => "update_text_cell",
            TableUpdate::UpdateNumberCell { .. } => "update_number_cell",
        }
    }
}
