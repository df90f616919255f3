use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// A typed input cell. Frames store text only; typed cells are coerced on
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl Value {
    /// Text rendering used when content is coerced to strings. `Null` becomes `""`.
    pub fn into_text(self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

/// How the rows of a [`Frame`] are keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIndex {
    /// Dense `0..len` positions.
    Positional,
    /// One record id per row.
    RecordIds(Vec<String>),
    /// Backing-relation index, shifted to start at zero.
    Physical(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("index has {found} entries, expected {expected}")]
    IndexLength { expected: usize, found: usize },
    #[error("no column named {0:?}")]
    MissingColumn(String),
    #[error("frame is not indexed by record ids")]
    MissingRecordIds,
}

/// Rows × columns of string cells plus an explicit row index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    columns: Vec<String>,
    index: RowIndex,
    rows: Vec<Vec<String>>,
}

impl Frame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, FrameError> {
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != columns.len() {
                return Err(FrameError::RaggedRow {
                    row,
                    expected: columns.len(),
                    found: cells.len(),
                });
            }
        }
        Ok(Self {
            columns,
            index: RowIndex::Positional,
            rows,
        })
    }

    /// Build a frame from typed cells, coercing every cell to text.
    pub fn from_values(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, FrameError> {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::into_text).collect())
            .collect();
        Self::new(columns, rows)
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            index: RowIndex::Positional,
            rows: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: RowIndex) -> Result<Self, FrameError> {
        let found = match &index {
            RowIndex::Positional => self.rows.len(),
            RowIndex::RecordIds(ids) => ids.len(),
            RowIndex::Physical(positions) => positions.len(),
        };
        if found != self.rows.len() {
            return Err(FrameError::IndexLength {
                expected: self.rows.len(),
                found,
            });
        }
        self.index = index;
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, position: usize) -> Option<&[String]> {
        self.rows.get(position).map(Vec::as_slice)
    }

    pub fn record_ids(&self) -> Option<&[String]> {
        match &self.index {
            RowIndex::RecordIds(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let col = self.column_position(name)?;
        Some(self.rows.iter().map(|row| row[col].as_str()).collect())
    }

    pub fn cell(&self, position: usize, column: &str) -> Option<&str> {
        let col = self.column_position(column)?;
        self.rows.get(position).map(|row| row[col].as_str())
    }

    /// Look up a cell by record id.
    pub fn get(&self, record_id: &str, column: &str) -> Option<&str> {
        let position = self.record_ids()?.iter().position(|id| id == record_id)?;
        self.cell(position, column)
    }

    pub fn set(&mut self, position: usize, column: &str, value: impl Into<String>) -> Result<(), FrameError> {
        let col = self
            .column_position(column)
            .ok_or_else(|| FrameError::MissingColumn(column.to_string()))?;
        if let Some(row) = self.rows.get_mut(position) {
            row[col] = value.into();
        }
        Ok(())
    }

    /// Remove a column, returning its values.
    pub fn drop_column(&mut self, name: &str) -> Option<Vec<String>> {
        let col = self.column_position(name)?;
        self.columns.remove(col);
        Some(self.rows.iter_mut().map(|row| row.remove(col)).collect())
    }

    /// Move a column into the index as record ids.
    pub fn set_index_from_column(&mut self, name: &str) -> Result<(), FrameError> {
        let ids = self
            .drop_column(name)
            .ok_or_else(|| FrameError::MissingColumn(name.to_string()))?;
        self.index = RowIndex::RecordIds(ids);
        Ok(())
    }

    pub(crate) fn reset_index(&mut self) {
        self.index = RowIndex::Positional;
    }

    /// Callers guarantee the index length matches the row count.
    pub(crate) fn set_index(&mut self, index: RowIndex) {
        self.index = index;
    }

    /// Overwrite cells of existing rows with values from `other`, matched by
    /// record id.
    ///
    /// Rows of `other` with unknown ids and columns absent from `self` are
    /// ignored; no rows or columns are added. Returns the number of cells
    /// written.
    pub fn update_from(&mut self, other: &Frame) -> Result<usize, FrameError> {
        let own_ids = self.record_ids().ok_or(FrameError::MissingRecordIds)?;
        let other_ids = other.record_ids().ok_or(FrameError::MissingRecordIds)?;

        let positions: HashMap<&str, usize> = own_ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();
        let column_map: Vec<(usize, usize)> = other
            .columns
            .iter()
            .enumerate()
            .filter_map(|(src, name)| self.column_position(name).map(|dst| (src, dst)))
            .collect();

        let mut targets = Vec::new();
        for (src_row, id) in other_ids.iter().enumerate() {
            if let Some(&dst_row) = positions.get(id.as_str()) {
                targets.push((src_row, dst_row));
            }
        }

        let mut written = 0;
        for (src_row, dst_row) in targets {
            for &(src_col, dst_col) in &column_map {
                self.rows[dst_row][dst_col] = other.rows[src_row][src_col].clone();
                written += 1;
            }
        }
        Ok(written)
    }
}
