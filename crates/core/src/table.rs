//! Tabular query results handed over by the reporting layer.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DpError, Result};

/// Semantic type of a result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnKind {
    /// Grouping key such as a country or an OS name.
    Identifier,
    /// COUNT/SUM style aggregate.
    NumericAdditive,
    /// AVG, percentage or other ratio aggregate.
    NumericRatio,
    /// Non-numeric label that is part of the grouping key.
    Categorical,
    /// Precomputed rank; never perturbed.
    Rank,
}

impl ColumnKind {
    /// Whether mechanisms perturb columns of this kind.
    pub fn is_noised(self) -> bool {
        matches!(self, Self::NumericAdditive | Self::NumericRatio)
    }

    /// Whether values of this kind form part of a row's grouping key.
    pub fn is_key(self) -> bool {
        matches!(self, Self::Identifier | Self::Categorical)
    }
}

/// A single cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Finite number.
    Number(f64),
    /// Text label.
    Text(String),
    /// Missing value.
    Null,
}

impl Value {
    /// Numeric payload, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    fn key_repr(&self) -> String {
        match self {
            Self::Number(v) => v.to_string(),
            Self::Text(s) => s.clone(),
            Self::Null => String::from("<null>"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Column name and semantic type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as produced by the reporting layer.
    pub name: String,
    /// Semantic type.
    pub kind: ColumnKind,
}

impl Column {
    /// Create a column descriptor.
    pub fn new<S: Into<String>>(name: S, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Grouping key of one row: its identifier and categorical values in column order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub Vec<String>);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

#[derive(Deserialize)]
struct RawQueryResult {
    columns: Vec<Column>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// An ordered, immutable table of aggregate rows with a column manifest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl<'de> Deserialize<'de> for QueryResult {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawQueryResult::deserialize(deserializer)?;
        Self::new(raw.columns, raw.rows).map_err(serde::de::Error::custom)
    }
}

impl QueryResult {
    /// Build a table, checking row widths and numeric cells.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        for (i, a) in columns.iter().enumerate() {
            if columns[..i].iter().any(|b| b.name == a.name) {
                return Err(DpError::input(format!("duplicate column `{}`", a.name)));
            }
        }
        for (r, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DpError::input(format!(
                    "row {r} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for (col, cell) in columns.iter().zip(row) {
                if !col.kind.is_noised() {
                    continue;
                }
                match cell {
                    Value::Number(v) if !v.is_finite() => {
                        return Err(DpError::input(format!(
                            "row {r}, column `{}`: non-finite value",
                            col.name
                        )));
                    }
                    Value::Text(_) => {
                        return Err(DpError::input(format!(
                            "row {r}, column `{}`: text in a numeric column",
                            col.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(Self { columns, rows })
    }

    /// Column manifest.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows in output order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position of a column, or an error naming the missing column.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| DpError::config(format!("unknown column `{name}`")))
    }

    /// Cell lookup.
    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Numeric cells of a column, `None` for nulls.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.require_column(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(r, row)| match &row[idx] {
                Value::Number(v) => Ok(Some(*v)),
                Value::Null => Ok(None),
                Value::Text(_) => Err(DpError::input(format!(
                    "row {r}, column `{name}` is not numeric"
                ))),
            })
            .collect()
    }

    /// Numeric cells of a column with nulls treated as zero.
    pub fn numeric_values(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .numeric_column(name)?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect())
    }

    /// Indices of the key columns.
    pub fn key_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_key())
            .map(|(i, _)| i)
            .collect()
    }

    /// Grouping key of every row.
    pub fn row_keys(&self) -> Vec<RowKey> {
        let keys = self.key_columns();
        self.rows
            .iter()
            .map(|row| key_of(row, &keys))
            .collect()
    }

    /// Key of a row restricted to the given columns.
    pub fn key_for(&self, row: usize, columns: &[usize]) -> RowKey {
        key_of(&self.rows[row], columns)
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Vec<Value>] {
        &mut self.rows
    }
}

fn key_of(row: &[Value], columns: &[usize]) -> RowKey {
    RowKey(columns.iter().map(|&c| row[c].key_repr()).collect())
}
