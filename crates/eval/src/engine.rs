//! Scoring noised results against their baselines.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use telemetry_dp_core::{
    DpError, Epsilon, MechanismKind, NoisedResult, PrivacyBudget, QueryResult, Result, RowKey,
};
use tracing::trace;

use crate::metrics::{
    flagged, iou, kendall_tau_b, kl_divergence, linf_distance, mean_absolute_error,
    top1_accuracy, top_k_overlap, total_variation_distance, z_scores,
};
use crate::shape::{AnalyticalShape, Metric, MetricSelector};

/// One metric value for one (query, mechanism, budget) triple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Query identifier.
    pub query_id: String,
    /// Mechanism family.
    pub mechanism: MechanismKind,
    /// Budget the noised result was produced with.
    pub budget: PrivacyBudget,
    /// Metric name.
    pub metric: Metric,
    /// Metric value.
    pub value: f64,
}

impl MetricRecord {
    /// Epsilon of the record's budget.
    pub fn epsilon(&self) -> Epsilon {
        self.budget.epsilon
    }
}

/// Computes shape-appropriate metrics between noised and baseline results.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvaluationEngine {
    selector: MetricSelector,
}

impl EvaluationEngine {
    /// Engine with the standard shape-to-metric mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metric mapping in use.
    pub fn selector(&self) -> &MetricSelector {
        &self.selector
    }

    /// Score one noised result. Records are returned primary metric first.
    pub fn evaluate(
        &self,
        shape: &AnalyticalShape,
        baseline: &QueryResult,
        noised: &NoisedResult,
    ) -> Result<Vec<MetricRecord>> {
        let values = self.compute(&noised.query_id, shape, baseline, &noised.result)?;
        Ok(values
            .into_iter()
            .map(|(metric, value)| MetricRecord {
                query_id: noised.query_id.clone(),
                mechanism: noised.mechanism,
                budget: noised.budget,
                metric,
                value,
            })
            .collect())
    }

    /// Metric values for a pair of tables, in [`MetricSelector::metrics`] order.
    pub fn compute(
        &self,
        query_id: &str,
        shape: &AnalyticalShape,
        baseline: &QueryResult,
        noised: &QueryResult,
    ) -> Result<Vec<(Metric, f64)>> {
        check_alignment(query_id, baseline, noised)?;
        shape.validate(baseline)?;

        let values = match shape {
            AnalyticalShape::AnomalousGroups {
                value_column,
                z_threshold,
            } => {
                let (b, n) = paired_values(baseline, noised, value_column)?;
                let zb = z_scores(&b);
                let zn = z_scores(&n);
                let fb = flagged(&zb, *z_threshold);
                let fnz = flagged(&zn, *z_threshold);
                vec![
                    iou(&fb, &fnz),
                    linf_distance(&zb, &zn),
                    fb.len() as f64,
                    fnz.len() as f64,
                ]
            }
            AnalyticalShape::PercentageDistribution { share_column } => {
                let (p, q) = paired_values(baseline, noised, share_column)?;
                vec![
                    total_variation_distance(&p, &q),
                    mean_absolute_error(&p, &q),
                ]
            }
            AnalyticalShape::Ranking {
                value_column,
                top_k,
            } => {
                let (b, n) = paired_values(baseline, noised, value_column)?;
                vec![kendall_tau_b(&b, &n), top_k_overlap(&b, &n, *top_k)]
            }
            AnalyticalShape::WinnerPerGroup {
                candidate_column,
                value_column,
            } => {
                let b = winners(baseline, candidate_column, value_column)?;
                let n = winners(noised, candidate_column, value_column)?;
                vec![top1_accuracy(&b, &n)]
            }
            AnalyticalShape::MultiDimensionalDistribution { columns } => {
                let per_row = row_divergences(baseline, noised, columns)?;
                let mean = if per_row.is_empty() {
                    0.0
                } else {
                    per_row.iter().sum::<f64>() / per_row.len() as f64
                };
                let max = per_row.iter().copied().fold(0.0, f64::max);
                vec![mean, max]
            }
        };

        let metrics = self.selector.metrics(shape);
        trace!(query = query_id, ?metrics, ?values, "computed metrics");
        Ok(metrics.into_iter().zip(values).collect())
    }
}

/// Fail unless both tables have the same columns and the same group sequence.
pub fn check_alignment(query_id: &str, baseline: &QueryResult, noised: &QueryResult) -> Result<()> {
    if baseline.columns() != noised.columns() {
        return Err(DpError::shape(
            query_id,
            "column schema differs from the baseline",
        ));
    }
    let expected = baseline.row_keys();
    let actual = noised.row_keys();
    if expected == actual {
        return Ok(());
    }
    let exp: BTreeSet<&RowKey> = expected.iter().collect();
    let act: BTreeSet<&RowKey> = actual.iter().collect();
    let missing: Vec<String> = exp.difference(&act).map(|k| k.to_string()).collect();
    let extra: Vec<String> = act.difference(&exp).map(|k| k.to_string()).collect();
    let msg = if missing.is_empty() && extra.is_empty() {
        format!(
            "groups are ordered differently ({} baseline rows, {} noised rows)",
            expected.len(),
            actual.len()
        )
    } else {
        format!(
            "missing groups [{}], unexpected groups [{}]",
            missing.join(", "),
            extra.join(", ")
        )
    };
    Err(DpError::shape(query_id, msg))
}

/// Values of `column` on both sides, keeping only rows numeric on both.
fn paired_values(
    baseline: &QueryResult,
    noised: &QueryResult,
    column: &str,
) -> Result<(Vec<f64>, Vec<f64>)> {
    Ok(baseline
        .numeric_column(column)?
        .into_iter()
        .zip(noised.numeric_column(column)?)
        .filter_map(|pair| match pair {
            (Some(b), Some(n)) => Some((b, n)),
            _ => None,
        })
        .unzip())
}

/// Winning candidate per group, in order of each group's first row.
///
/// Groups are formed by every key column except the candidate. Ties go to the
/// earliest row; groups without any numeric value have no winner.
fn winners(
    result: &QueryResult,
    candidate_column: &str,
    value_column: &str,
) -> Result<Vec<Option<RowKey>>> {
    let candidate = result.require_column(candidate_column)?;
    let values = result.numeric_column(value_column)?;
    let group_cols: Vec<usize> = result
        .key_columns()
        .into_iter()
        .filter(|&c| c != candidate)
        .collect();

    let mut order: Vec<(Option<usize>, f64)> = Vec::new();
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    for (row, value) in values.iter().enumerate() {
        let key = result.key_for(row, &group_cols);
        let slot = *index.entry(key).or_insert_with(|| {
            order.push((None, f64::NEG_INFINITY));
            order.len() - 1
        });
        if let Some(v) = value {
            let best = &mut order[slot];
            if best.0.is_none() || *v > best.1 {
                *best = (Some(row), *v);
            }
        }
    }
    Ok(order
        .into_iter()
        .map(|(row, _)| row.map(|r| result.key_for(r, &[candidate])))
        .collect())
}

fn row_divergences(
    baseline: &QueryResult,
    noised: &QueryResult,
    columns: &[String],
) -> Result<Vec<f64>> {
    let read = |t: &QueryResult| -> Result<Vec<Vec<f64>>> {
        columns
            .iter()
            .map(|c| t.numeric_values(c))
            .collect::<Result<Vec<_>>>()
    };
    let b = read(baseline)?;
    let n = read(noised)?;
    Ok((0..baseline.len())
        .map(|r| {
            let p: Vec<f64> = b.iter().map(|col| col[r]).collect();
            let q: Vec<f64> = n.iter().map(|col| col[r]).collect();
            kl_divergence(&p, &q)
        })
        .collect())
}
