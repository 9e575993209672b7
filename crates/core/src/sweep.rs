//! Applying a mechanism to query results across a set of privacy budgets.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::budget::{MechanismKind, PrivacyBudget};
use crate::error::Result;
use crate::noise::{Mechanism, NoiseMechanism};
use crate::postprocess::PostProcessor;
use crate::sensitivity::{SensitivityModel, SensitivitySpec};
use crate::source::{NoiseCoordinates, NoiseSource};
use crate::table::{QueryResult, Value};

/// A query result together with the mechanism and budget that produced it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoisedResult {
    /// Query identifier.
    pub query_id: String,
    /// Mechanism family.
    pub mechanism: MechanismKind,
    /// Budget spent on each noised column.
    pub budget: PrivacyBudget,
    /// Post-processed table.
    pub result: QueryResult,
}

/// Noises one query result per budget.
///
/// Each numeric column is perturbed row by row from its own stream, keyed by
/// (query, column, epsilon, mechanism), and spends the full budget.
/// Cross-column composition within a query is not tracked.
#[derive(Clone)]
pub struct EpsilonSweepRunner {
    mechanism: Mechanism,
    source: Arc<dyn NoiseSource>,
    model: SensitivityModel,
    post: PostProcessor,
}

impl EpsilonSweepRunner {
    /// Runner with per-column sensitivities and default post-processing.
    pub fn new(mechanism: Mechanism, source: Arc<dyn NoiseSource>) -> Self {
        Self {
            mechanism,
            source,
            model: SensitivityModel::default(),
            post: PostProcessor::default(),
        }
    }

    /// Use a different sensitivity model.
    pub fn with_sensitivity_model(mut self, model: SensitivityModel) -> Self {
        self.model = model;
        self
    }

    /// Use a different post-processor.
    pub fn with_post_processor(mut self, post: PostProcessor) -> Self {
        self.post = post;
        self
    }

    /// Mechanism in use.
    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    /// Produce the noised result for one budget.
    ///
    /// The infinite budget returns an exact copy of `baseline` with no
    /// post-processing.
    pub fn privatize(
        &self,
        query_id: &str,
        baseline: &QueryResult,
        spec: &SensitivitySpec,
        budget: &PrivacyBudget,
    ) -> Result<NoisedResult> {
        let columns = self
            .model
            .resolve(baseline, spec, self.mechanism.sensitivity_norm())?;
        self.post.validate(baseline)?;

        let kind = self.mechanism.kind();
        if budget.is_unbounded() {
            return Ok(NoisedResult {
                query_id: query_id.to_owned(),
                mechanism: kind,
                budget: *budget,
                result: baseline.clone(),
            });
        }

        let mut noised = baseline.clone();
        for column in columns.iter().filter(|c| c.sensitivity > 0.0) {
            let scale = self.mechanism.noise_scale(column.sensitivity, budget)?;
            debug!(
                query = query_id,
                column = %column.name,
                mechanism = %kind,
                epsilon = %budget.epsilon,
                scale,
                "noising column"
            );
            let coords = NoiseCoordinates {
                query: query_id,
                column: &column.name,
                epsilon: budget.epsilon,
                mechanism: kind,
            };
            let mut rng = self.source.stream(&coords);
            for row in noised.rows_mut() {
                if let Value::Number(v) = &mut row[column.index] {
                    *v = self.mechanism.perturb(*v, scale, &mut rng);
                }
            }
        }

        Ok(NoisedResult {
            query_id: query_id.to_owned(),
            mechanism: kind,
            budget: *budget,
            result: self.post.process(&noised)?,
        })
    }

    /// Produce one noised result per budget, in budget order.
    pub fn sweep(
        &self,
        query_id: &str,
        baseline: &QueryResult,
        spec: &SensitivitySpec,
        budgets: &[PrivacyBudget],
    ) -> Result<Vec<NoisedResult>> {
        budgets
            .iter()
            .map(|budget| self.privatize(query_id, baseline, spec, budget))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{budgets_for, default_epsilons, Epsilon};
    use crate::error::DpError;
    use crate::postprocess::PercentagePartition;
    use crate::sensitivity::AggregationKind;
    use crate::source::{EntropySource, SeededSource};
    use crate::table::{Column, ColumnKind};

    fn baseline() -> QueryResult {
        QueryResult::new(
            vec![
                Column::new("country", ColumnKind::Identifier),
                Column::new("number_of_systems", ColumnKind::NumericAdditive),
                Column::new("avg_duration", ColumnKind::NumericRatio),
                Column::new("rank", ColumnKind::Rank),
            ],
            vec![
                vec!["US".into(), 120.0.into(), 45.0.into(), 1.0.into()],
                vec!["DE".into(), 80.0.into(), Value::Null, 2.0.into()],
                vec!["JP".into(), 3.0.into(), 12.5.into(), 3.0.into()],
            ],
        )
        .unwrap()
    }

    fn spec() -> SensitivitySpec {
        SensitivitySpec::new()
            .with("number_of_systems", AggregationKind::Count)
            .with(
                "avg_duration",
                AggregationKind::Average {
                    max_value: 60.0,
                    min_population: 1.0,
                },
            )
    }

    fn runner(kind: MechanismKind, seed: u64) -> EpsilonSweepRunner {
        EpsilonSweepRunner::new(Mechanism::from_kind(kind), Arc::new(SeededSource::new(seed)))
    }

    #[test]
    fn infinite_budget_reproduces_baseline() {
        for kind in [MechanismKind::Laplace, MechanismKind::Gaussian] {
            let budget = PrivacyBudget::for_mechanism(kind, Epsilon::INFINITY, 1e-6).unwrap();
            let out = runner(kind, 1)
                .privatize("q1", &baseline(), &spec(), &budget)
                .unwrap();
            assert_eq!(out.result, baseline());
        }
    }

    #[test]
    fn entropy_source_swaps_in_without_recalibration() {
        let budgets = budgets_for(MechanismKind::Laplace, &default_epsilons(), 1e-6).unwrap();
        let r = EpsilonSweepRunner::new(
            Mechanism::from_kind(MechanismKind::Laplace),
            Arc::new(EntropySource),
        );
        let seeded = runner(MechanismKind::Laplace, 7);
        let out = r.sweep("q1", &baseline(), &spec(), &budgets).unwrap();
        assert_eq!(out.len(), budgets.len());
        for (n, budget) in out.iter().zip(&budgets) {
            assert_eq!(n.budget, *budget);
            assert_eq!(n.result.row_keys(), baseline().row_keys());
            assert_eq!(n.result.value(1, 2), Some(&Value::Null));
            assert_eq!(n.result.numeric_values("rank").unwrap(), vec![1.0, 2.0, 3.0]);
            let counts = n.result.numeric_values("number_of_systems").unwrap();
            assert!(counts.iter().all(|&v| v >= 0.0));
            if !budget.epsilon.is_finite() {
                assert_eq!(n.result, baseline());
            }
        }
        assert_eq!(
            r.mechanism().noise_scale(1.0, &budgets[0]).unwrap(),
            seeded.mechanism().noise_scale(1.0, &budgets[0]).unwrap()
        );
    }

    #[test]
    fn non_numeric_columns_pass_through() {
        let budget = PrivacyBudget::pure(Epsilon::new(0.1).unwrap());
        let out = runner(MechanismKind::Laplace, 3)
            .privatize("q1", &baseline(), &spec(), &budget)
            .unwrap();
        let b = baseline();
        for r in 0..b.len() {
            assert_eq!(out.result.value(r, 0), b.value(r, 0));
            assert_eq!(out.result.value(r, 3), b.value(r, 3));
        }
        assert_eq!(out.result.value(1, 2), Some(&Value::Null));
        assert_ne!(out.result.value(0, 1), b.value(0, 1));
    }

    #[test]
    fn sweep_is_reproducible_and_ordered() {
        let budgets = budgets_for(MechanismKind::Gaussian, &default_epsilons(), 1e-6).unwrap();
        let a = runner(MechanismKind::Gaussian, 42)
            .sweep("q1", &baseline(), &spec(), &budgets)
            .unwrap();
        let b = runner(MechanismKind::Gaussian, 42)
            .sweep("q1", &baseline(), &spec(), &budgets)
            .unwrap();
        assert_eq!(a.len(), 11);
        assert_eq!(a, b);
        for (r, budget) in a.iter().zip(&budgets) {
            assert_eq!(&r.budget, budget);
        }
        let c = runner(MechanismKind::Gaussian, 43)
            .sweep("q1", &baseline(), &spec(), &budgets)
            .unwrap();
        assert_ne!(a[0], c[0]);
    }

    #[test]
    fn budget_order_does_not_change_results() {
        let eps: Vec<Epsilon> = [0.5, 2.0, 10.0]
            .iter()
            .map(|&e| Epsilon::new(e).unwrap())
            .collect();
        let forward = budgets_for(MechanismKind::Laplace, &eps, 1e-6).unwrap();
        let mut backward = forward.clone();
        backward.reverse();
        let r = runner(MechanismKind::Laplace, 5);
        let a = r.sweep("q1", &baseline(), &spec(), &forward).unwrap();
        let mut b = r.sweep("q1", &baseline(), &spec(), &backward).unwrap();
        b.reverse();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_sensitivity_columns_are_not_noised() {
        let spec = SensitivitySpec::new()
            .with("number_of_systems", AggregationKind::Count)
            .with(
                "avg_duration",
                AggregationKind::Sum {
                    max_contribution: 0.0,
                },
            );
        let budget = PrivacyBudget::pure(Epsilon::new(0.01).unwrap());
        let out = runner(MechanismKind::Laplace, 9)
            .privatize("q1", &baseline(), &spec, &budget)
            .unwrap();
        assert_eq!(out.result.value(0, 2), baseline().value(0, 2));
    }

    #[test]
    fn missing_sensitivity_fails_even_for_sentinel() {
        let spec = SensitivitySpec::new().with("number_of_systems", AggregationKind::Count);
        let budget = PrivacyBudget::pure(Epsilon::INFINITY);
        let err = runner(MechanismKind::Laplace, 1)
            .privatize("q1", &baseline(), &spec, &budget)
            .unwrap_err();
        assert!(matches!(err, DpError::Configuration { .. }));
    }

    #[test]
    fn gaussian_without_delta_is_rejected() {
        let budget = PrivacyBudget::pure(Epsilon::new(1.0).unwrap());
        let err = runner(MechanismKind::Gaussian, 1)
            .privatize("q1", &baseline(), &spec(), &budget)
            .unwrap_err();
        assert!(matches!(err, DpError::Configuration { .. }));
    }

    #[test]
    fn outputs_are_post_processed() {
        let t = QueryResult::new(
            vec![
                Column::new("vendor", ColumnKind::Identifier),
                Column::new("pct", ColumnKind::NumericRatio),
            ],
            vec![
                vec!["a".into(), 60.0.into()],
                vec!["b".into(), 30.0.into()],
                vec!["c".into(), 10.0.into()],
            ],
        )
        .unwrap();
        let spec = SensitivitySpec::new().with(
            "pct",
            AggregationKind::Percentage {
                min_population: 100.0,
            },
        );
        let r = runner(MechanismKind::Laplace, 11).with_post_processor(PostProcessor::new(vec![
            PercentagePartition::DownColumn {
                column: "pct".into(),
            },
        ]));
        let budget = PrivacyBudget::pure(Epsilon::new(0.05).unwrap());
        let out = r.privatize("q4", &t, &spec, &budget).unwrap();
        let pct = out.result.numeric_values("pct").unwrap();
        assert!(pct.iter().all(|&v| v >= 0.0));
        let total: f64 = pct.iter().sum();
        assert!(total == 0.0 || (total - 100.0).abs() < 1e-6);
    }
}
