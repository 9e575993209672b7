//! Post-processing that restores validity of noised tables.
//!
//! Clamping and renormalization only read the already-noised output, so they
//! do not weaken the privacy guarantee. They do change accuracy, which is why
//! evaluation always runs on the post-processed table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::table::{ColumnKind, QueryResult, Value};

/// Target total of a percentage partition.
pub const PERCENT_TOTAL: f64 = 100.0;

/// Partitions whose total is already this close to 100 are left untouched.
pub const RENORMALIZE_TOLERANCE: f64 = 1e-9;

/// A group of cells that must sum to 100.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum PercentagePartition {
    /// Several share columns that sum to 100 within each row.
    AcrossColumns {
        /// Share columns.
        columns: Vec<String>,
    },
    /// One share column that sums to 100 over all rows.
    DownColumn {
        /// Share column.
        column: String,
    },
}

impl PercentagePartition {
    /// Columns covered by the partition.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::AcrossColumns { columns } => columns.iter().map(String::as_str).collect(),
            Self::DownColumn { column } => vec![column.as_str()],
        }
    }
}

/// Clamps non-negative columns and renormalizes percentage partitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostProcessor {
    /// Percentage partitions of the query.
    pub partitions: Vec<PercentagePartition>,
    /// Also clamp numeric-ratio columns (averages, shares) at zero.
    pub clamp_ratio_columns: bool,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self {
            partitions: Vec::new(),
            clamp_ratio_columns: true,
        }
    }
}

impl PostProcessor {
    /// Processor for the given partitions.
    pub fn new(partitions: Vec<PercentagePartition>) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    /// Set whether ratio columns are clamped.
    pub fn with_clamp_ratio_columns(mut self, clamp: bool) -> Self {
        self.clamp_ratio_columns = clamp;
        self
    }

    /// Check the partitions on their own: none empty, and no column in more
    /// than one partition or listed twice in one.
    ///
    /// Overlapping partitions cannot all sum to 100 after a single pass.
    pub fn check_partitions(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for partition in &self.partitions {
            let columns = partition.columns();
            if columns.is_empty() {
                return Err(DpError::config("percentage partition has no columns"));
            }
            for name in columns {
                if !seen.insert(name) {
                    return Err(DpError::config(format!(
                        "column `{name}` belongs to more than one percentage partition"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check the partitions and that every partition column exists and is
    /// numeric.
    pub fn validate(&self, result: &QueryResult) -> Result<()> {
        self.check_partitions()?;
        for partition in &self.partitions {
            for name in partition.columns() {
                let idx = result.require_column(name)?;
                if !result.columns()[idx].kind.is_noised() {
                    return Err(DpError::config(format!(
                        "percentage column `{name}` is not numeric"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply clamping then renormalization. Idempotent.
    pub fn process(&self, result: &QueryResult) -> Result<QueryResult> {
        self.validate(result)?;
        let mut out = result.clone();

        let mut clamp: Vec<usize> = out
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.kind == ColumnKind::NumericAdditive
                    || (self.clamp_ratio_columns && c.kind == ColumnKind::NumericRatio)
            })
            .map(|(i, _)| i)
            .collect();

        let mut resolved = Vec::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            let idx = partition
                .columns()
                .into_iter()
                .map(|name| result.require_column(name))
                .collect::<Result<Vec<_>>>()?;
            clamp.extend(idx.iter().copied());
            resolved.push((partition, idx));
        }
        clamp.sort_unstable();
        clamp.dedup();

        let rows = out.rows_mut();
        for row in rows.iter_mut() {
            for &c in &clamp {
                if let Value::Number(v) = &mut row[c] {
                    *v = clamp_non_negative(*v);
                }
            }
        }

        for (partition, idx) in resolved {
            match partition {
                PercentagePartition::AcrossColumns { .. } => {
                    for row in rows.iter_mut() {
                        let mut cells: Vec<&mut f64> = Vec::with_capacity(idx.len());
                        for (c, cell) in row.iter_mut().enumerate() {
                            if idx.contains(&c) {
                                if let Value::Number(v) = cell {
                                    cells.push(v);
                                }
                            }
                        }
                        renormalize(cells);
                    }
                }
                PercentagePartition::DownColumn { .. } => {
                    let c = idx[0];
                    let cells: Vec<&mut f64> = rows
                        .iter_mut()
                        .filter_map(|row| match &mut row[c] {
                            Value::Number(v) => Some(v),
                            _ => None,
                        })
                        .collect();
                    renormalize(cells);
                }
            }
        }

        Ok(out)
    }
}

/// Clamp a count or duration at zero.
pub fn clamp_non_negative(v: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else {
        v
    }
}

/// Rescale non-negative shares to sum to 100.
///
/// A zero total sets every share to zero. A total already within
/// [`RENORMALIZE_TOLERANCE`] of 100 is left as is.
fn renormalize(mut cells: Vec<&mut f64>) {
    let total: f64 = cells.iter().map(|v| **v).sum();
    if total <= 0.0 {
        for v in cells.iter_mut() {
            **v = 0.0;
        }
        return;
    }
    if (total - PERCENT_TOTAL).abs() <= RENORMALIZE_TOLERANCE {
        return;
    }
    for v in cells.iter_mut() {
        **v = **v / total * PERCENT_TOTAL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use proptest::prelude::*;

    fn persona_table(shares: &[[f64; 3]]) -> QueryResult {
        QueryResult::new(
            vec![
                Column::new("persona", ColumnKind::Identifier),
                Column::new("number_of_systems", ColumnKind::NumericAdditive),
                Column::new("mail", ColumnKind::NumericRatio),
                Column::new("news", ColumnKind::NumericRatio),
                Column::new("search", ColumnKind::NumericRatio),
            ],
            shares
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    vec![
                        Value::from(format!("p{i}")),
                        Value::from(5.0 - 17.0 * i as f64),
                        s[0].into(),
                        s[1].into(),
                        s[2].into(),
                    ]
                })
                .collect(),
        )
        .unwrap()
    }

    fn across() -> PostProcessor {
        PostProcessor::new(vec![PercentagePartition::AcrossColumns {
            columns: vec!["mail".into(), "news".into(), "search".into()],
        }])
    }

    fn shares(t: &QueryResult, row: usize) -> Vec<f64> {
        (2..5).map(|c| t.value(row, c).unwrap().as_f64().unwrap()).collect()
    }

    #[test]
    fn clamps_negative_counts() {
        // 5 with injected noise of -12.
        let t = QueryResult::new(
            vec![Column::new("n", ColumnKind::NumericAdditive)],
            vec![vec![(5.0 - 12.0).into()]],
        )
        .unwrap();
        let out = PostProcessor::default().process(&t).unwrap();
        assert_eq!(out.value(0, 0), Some(&Value::Number(0.0)));
    }

    #[test]
    fn ratio_clamping_is_optional() {
        let t = QueryResult::new(
            vec![Column::new("avg", ColumnKind::NumericRatio)],
            vec![vec![(-3.0).into()]],
        )
        .unwrap();
        let kept = PostProcessor::default()
            .with_clamp_ratio_columns(false)
            .process(&t)
            .unwrap();
        assert_eq!(kept.value(0, 0), Some(&Value::Number(-3.0)));
        let clamped = PostProcessor::default().process(&t).unwrap();
        assert_eq!(clamped.value(0, 0), Some(&Value::Number(0.0)));
    }

    #[test]
    fn renormalizes_rows_to_one_hundred() {
        let t = persona_table(&[[30.0, -10.0, 50.0], [0.0, 0.0, 0.0]]);
        let out = across().process(&t).unwrap();
        let row0 = shares(&out, 0);
        assert!((row0.iter().sum::<f64>() - 100.0).abs() < 1e-6);
        assert_eq!(row0[1], 0.0);
        assert!((row0[0] - 37.5).abs() < 1e-9);
        assert_eq!(shares(&out, 1), vec![0.0, 0.0, 0.0]);
        // Counts are clamped alongside.
        assert_eq!(out.value(1, 1), Some(&Value::Number(0.0)));
    }

    #[test]
    fn down_column_partition_spans_rows() {
        let t = QueryResult::new(
            vec![
                Column::new("vendor", ColumnKind::Identifier),
                Column::new("pct", ColumnKind::NumericRatio),
            ],
            vec![
                vec!["a".into(), 70.0.into()],
                vec!["b".into(), 50.0.into()],
                vec!["c".into(), (-4.0).into()],
            ],
        )
        .unwrap();
        let pp = PostProcessor::new(vec![PercentagePartition::DownColumn {
            column: "pct".into(),
        }]);
        let out = pp.process(&t).unwrap();
        let pct = out.numeric_values("pct").unwrap();
        assert!((pct.iter().sum::<f64>() - 100.0).abs() < 1e-6);
        assert_eq!(pct[2], 0.0);
    }

    #[test]
    fn unknown_partition_column_is_configuration_error() {
        let t = persona_table(&[[1.0, 2.0, 3.0]]);
        let pp = PostProcessor::new(vec![PercentagePartition::DownColumn {
            column: "missing".into(),
        }]);
        assert!(matches!(
            pp.process(&t),
            Err(DpError::Configuration { .. })
        ));
        let pp = PostProcessor::new(vec![PercentagePartition::DownColumn {
            column: "persona".into(),
        }]);
        assert!(pp.validate(&t).is_err());
    }

    #[test]
    fn overlapping_partitions_are_rejected() {
        let t = QueryResult::new(
            vec![
                Column::new("key", ColumnKind::Identifier),
                Column::new("a", ColumnKind::NumericRatio),
                Column::new("b", ColumnKind::NumericRatio),
            ],
            vec![
                vec!["x".into(), 30.0.into(), 50.0.into()],
                vec!["y".into(), 10.0.into(), 70.0.into()],
            ],
        )
        .unwrap();
        let shared = PostProcessor::new(vec![
            PercentagePartition::AcrossColumns {
                columns: vec!["a".into(), "b".into()],
            },
            PercentagePartition::DownColumn { column: "a".into() },
        ]);
        assert!(matches!(
            shared.process(&t),
            Err(DpError::Configuration { .. })
        ));
        let repeated = PostProcessor::new(vec![PercentagePartition::AcrossColumns {
            columns: vec!["a".into(), "a".into()],
        }]);
        assert!(repeated.check_partitions().is_err());

        let disjoint = PostProcessor::new(vec![
            PercentagePartition::DownColumn { column: "a".into() },
            PercentagePartition::DownColumn { column: "b".into() },
        ]);
        let once = disjoint.process(&t).unwrap();
        assert_eq!(disjoint.process(&once).unwrap(), once);
    }

    proptest! {
        #[test]
        fn prop_process_is_idempotent(
            rows in prop::collection::vec(prop::array::uniform3(-200.0f64..200.0), 1..8),
        ) {
            let t = persona_table(&rows);
            let once = across().process(&t).unwrap();
            let twice = across().process(&once).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_rows_sum_to_one_hundred(
            row in prop::array::uniform3(-50.0f64..500.0),
        ) {
            let out = across().process(&persona_table(&[row])).unwrap();
            let s = shares(&out, 0);
            prop_assert!(s.iter().all(|&v| v >= 0.0));
            let total: f64 = s.iter().sum();
            prop_assert!(total == 0.0 || (total - 100.0).abs() < 1e-6);
        }

        #[test]
        fn prop_clamp_never_negative(v in -1e6f64..1e6) {
            prop_assert!(clamp_non_negative(v) >= 0.0);
            prop_assert_eq!(clamp_non_negative(clamp_non_negative(v)), clamp_non_negative(v));
        }
    }
}
