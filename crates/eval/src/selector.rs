//! Choosing the strongest privacy budget that still meets accuracy targets.

use serde::{Deserialize, Serialize};
use telemetry_dp_core::{DpError, Epsilon, MechanismKind, Result};
use tracing::{info, warn};

use crate::engine::MetricRecord;
use crate::shape::{AccuracyThresholds, Direction, Metric};

/// Whether budgets are chosen per query or once for all queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Each query gets its own epsilon.
    #[default]
    PerQuery,
    /// One epsilon at which every query meets its threshold.
    Global,
}

/// Outcome of epsilon selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedEpsilon {
    /// Query the choice applies to; `None` for a global choice.
    pub query_id: Option<String>,
    /// Mechanism the choice applies to.
    pub mechanism: MechanismKind,
    /// Chosen epsilon.
    pub epsilon: Epsilon,
    /// False when no budget met the threshold and the weakest one was returned.
    pub satisfied: bool,
    /// Metric checked; `None` for a global choice.
    pub metric: Option<Metric>,
    /// Metric value at the chosen epsilon, when recorded.
    pub value: Option<f64>,
}

/// Pick the smallest finite epsilon whose value meets `threshold`.
///
/// Returns the weakest finite epsilon with `false` when none does, and `None`
/// when `records` holds no finite epsilon at all.
pub fn select(
    records: &[(Epsilon, f64)],
    direction: Direction,
    threshold: f64,
) -> Option<(Epsilon, bool)> {
    let mut finite: Vec<(Epsilon, f64)> = records
        .iter()
        .copied()
        .filter(|(e, _)| e.is_finite())
        .collect();
    finite.sort_by(|a, b| a.0.total_cmp(&b.0));
    finite
        .iter()
        .find(|(_, v)| direction.satisfies(*v, threshold))
        .map(|(e, _)| (*e, true))
        .or_else(|| finite.last().map(|(e, _)| (*e, false)))
}

/// Scans an epsilon grid against recorded metrics.
///
/// A grid point without a record (its triple failed) never satisfies.
#[derive(Clone, Debug)]
pub struct EpsilonSelector {
    grid: Vec<Epsilon>,
    thresholds: AccuracyThresholds,
}

impl EpsilonSelector {
    /// Selector over the finite points of `epsilons`.
    pub fn new(epsilons: &[Epsilon], thresholds: AccuracyThresholds) -> Result<Self> {
        let mut grid: Vec<Epsilon> = epsilons.iter().copied().filter(|e| e.is_finite()).collect();
        grid.sort_by(Epsilon::total_cmp);
        grid.dedup();
        if grid.is_empty() {
            return Err(DpError::config(
                "epsilon selection needs at least one finite epsilon",
            ));
        }
        thresholds.validate()?;
        Ok(Self { grid, thresholds })
    }

    /// Finite grid, strongest privacy first.
    pub fn grid(&self) -> &[Epsilon] {
        &self.grid
    }

    fn threshold(&self, metric: Metric) -> Result<f64> {
        self.thresholds.threshold_for(metric).ok_or_else(|| {
            DpError::config(format!("metric `{metric}` has no accuracy threshold"))
        })
    }

    fn lookup(
        records: &[MetricRecord],
        query_id: &str,
        mechanism: MechanismKind,
        metric: Metric,
        epsilon: Epsilon,
    ) -> Option<f64> {
        records
            .iter()
            .find(|r| {
                r.query_id == query_id
                    && r.mechanism == mechanism
                    && r.metric == metric
                    && r.epsilon() == epsilon
            })
            .map(|r| r.value)
    }

    /// Smallest epsilon at which `metric` of one query meets its threshold.
    pub fn select_query(
        &self,
        records: &[MetricRecord],
        query_id: &str,
        mechanism: MechanismKind,
        metric: Metric,
    ) -> Result<SelectedEpsilon> {
        let threshold = self.threshold(metric)?;
        let direction = metric.direction();
        let mut chosen = None;
        for &eps in &self.grid {
            let value = Self::lookup(records, query_id, mechanism, metric, eps);
            if value.is_some_and(|v| direction.satisfies(v, threshold)) {
                chosen = Some((eps, value, true));
                break;
            }
        }
        let (epsilon, value, satisfied) = match chosen {
            Some(c) => c,
            None => {
                let weakest = self.weakest();
                let value = Self::lookup(records, query_id, mechanism, metric, weakest);
                warn!(
                    query = query_id,
                    %mechanism,
                    %metric,
                    threshold,
                    epsilon = %weakest,
                    "no epsilon meets the accuracy threshold, falling back to the weakest"
                );
                (weakest, value, false)
            }
        };
        if satisfied {
            info!(query = query_id, %mechanism, %metric, %epsilon, "selected epsilon");
        }
        Ok(SelectedEpsilon {
            query_id: Some(query_id.to_owned()),
            mechanism,
            epsilon,
            satisfied,
            metric: Some(metric),
            value,
        })
    }

    /// Smallest epsilon at which every target meets its threshold at once.
    pub fn select_global(
        &self,
        records: &[MetricRecord],
        mechanism: MechanismKind,
        targets: &[(String, Metric)],
    ) -> Result<SelectedEpsilon> {
        let thresholds = targets
            .iter()
            .map(|(_, m)| self.threshold(*m))
            .collect::<Result<Vec<_>>>()?;
        let all_met = |eps: Epsilon| {
            targets.iter().zip(&thresholds).all(|((query, metric), &t)| {
                Self::lookup(records, query, mechanism, *metric, eps)
                    .is_some_and(|v| metric.direction().satisfies(v, t))
            })
        };
        let (epsilon, satisfied) = match self.grid.iter().copied().find(|&e| all_met(e)) {
            Some(e) => {
                info!(%mechanism, epsilon = %e, queries = targets.len(), "selected global epsilon");
                (e, true)
            }
            None => {
                let weakest = self.weakest();
                warn!(
                    %mechanism,
                    epsilon = %weakest,
                    "no single epsilon satisfies every query, falling back to the weakest"
                );
                (weakest, false)
            }
        };
        Ok(SelectedEpsilon {
            query_id: None,
            mechanism,
            epsilon,
            satisfied,
            metric: None,
            value: None,
        })
    }

    /// Run selection for every mechanism in `mode`.
    pub fn select_all(
        &self,
        records: &[MetricRecord],
        mode: SelectionMode,
        mechanisms: &[MechanismKind],
        targets: &[(String, Metric)],
    ) -> Result<Vec<SelectedEpsilon>> {
        let mut out = Vec::new();
        for &mechanism in mechanisms {
            match mode {
                SelectionMode::PerQuery => {
                    for (query, metric) in targets {
                        out.push(self.select_query(records, query, mechanism, *metric)?);
                    }
                }
                SelectionMode::Global => {
                    out.push(self.select_global(records, mechanism, targets)?);
                }
            }
        }
        Ok(out)
    }

    fn weakest(&self) -> Epsilon {
        // The constructor guarantees a non-empty grid.
        self.grid[self.grid.len() - 1]
    }
}
