//! The two-phase run: an exploratory sweep with evaluation and epsilon
//! selection, then a production run at the chosen budget.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use telemetry_dp_core::{
    DpError, Epsilon, EpsilonSweepRunner, Mechanism, MechanismKind, NoiseMechanism, NoiseSource,
    NoisedResult, PrivacyBudget, QueryResult, Result, SeededSource,
};
use telemetry_dp_eval::{EpsilonSelector, EvaluationEngine, MetricRecord, SelectedEpsilon};
use tracing::{debug, info, info_span, warn};

use crate::config::{PipelineConfig, QuerySpec, RunMode};

/// Baseline tables keyed by query id.
pub type Baselines = BTreeMap<String, QueryResult>;

/// A (query, mechanism, budget) triple that produced no metrics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TripleFailure {
    /// Query identifier.
    pub query_id: String,
    /// Mechanism family.
    pub mechanism: MechanismKind,
    /// Budget epsilon.
    pub epsilon: Epsilon,
    /// Error description.
    pub error: String,
}

/// Noised results and their scores.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Evaluated {
    /// One entry per successful triple, in task order.
    pub noised: Vec<NoisedResult>,
    /// Metric records of the successful triples.
    pub records: Vec<MetricRecord>,
    /// Triples that were skipped.
    pub failures: Vec<TripleFailure>,
}

/// Output of an exploratory sweep.
#[derive(Clone, Debug, Serialize)]
pub struct SweepReport {
    /// Noised results, metrics and failures across the grid.
    #[serde(flatten)]
    pub evaluated: Evaluated,
    /// Selected epsilon per query or per mechanism.
    pub selected: Vec<SelectedEpsilon>,
}

/// Output of either run mode.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunOutput {
    /// Exploratory sweep.
    Sweep(SweepReport),
    /// Single-budget run.
    SingleEpsilon(Evaluated),
}

#[derive(Clone, Copy)]
struct Task<'a> {
    query: &'a QuerySpec,
    baseline: &'a QueryResult,
    mechanism: MechanismKind,
    budget: PrivacyBudget,
}

/// Drives noising, evaluation and selection for a configured set of queries.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn NoiseSource>,
    engine: EvaluationEngine,
}

impl Pipeline {
    /// Pipeline with a seeded noise source.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(SeededSource::new(config.seed));
        Ok(Self {
            config,
            source,
            engine: EvaluationEngine::new(),
        })
    }

    /// Replace the noise source.
    pub fn with_source(mut self, source: Arc<dyn NoiseSource>) -> Self {
        self.source = source;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn runner(&self, query: &QuerySpec, mechanism: MechanismKind) -> EpsilonSweepRunner {
        EpsilonSweepRunner::new(Mechanism::from_kind(mechanism), Arc::clone(&self.source))
            .with_sensitivity_model(self.config.sensitivity_model())
            .with_post_processor(self.config.post_processor(query))
    }

    /// Check each configured query against its baseline.
    ///
    /// Every configured query needs a baseline, and its shape, sensitivity
    /// declarations and partitions must match the baseline's columns.
    pub fn prepare<'a>(
        &'a self,
        baselines: &'a Baselines,
    ) -> Result<Vec<(&'a QuerySpec, &'a QueryResult)>> {
        self.config
            .queries
            .iter()
            .map(|query| {
                let baseline = baselines.get(&query.id).ok_or_else(|| {
                    DpError::config(format!("no baseline for query `{}`", query.id))
                })?;
                let scoped = |e: DpError| match e {
                    DpError::Configuration { msg } => {
                        DpError::config(format!("query `{}`: {msg}", query.id))
                    }
                    other => other,
                };
                query.shape.validate(baseline).map_err(scoped)?;
                self.config
                    .post_processor(query)
                    .validate(baseline)
                    .map_err(scoped)?;
                for &kind in &self.config.mechanisms {
                    let norm = Mechanism::from_kind(kind).sensitivity_norm();
                    self.config
                        .sensitivity_model()
                        .resolve(baseline, &query.sensitivity, norm)
                        .map_err(scoped)?;
                }
                Ok((query, baseline))
            })
            .collect()
    }

    fn tasks<'a>(
        &self,
        prepared: &[(&'a QuerySpec, &'a QueryResult)],
        budgets: impl Fn(MechanismKind) -> Result<Vec<PrivacyBudget>>,
    ) -> Result<Vec<Task<'a>>> {
        let mut tasks = Vec::new();
        for &(query, baseline) in prepared {
            for &mechanism in &self.config.mechanisms {
                for budget in budgets(mechanism)? {
                    tasks.push(Task {
                        query,
                        baseline,
                        mechanism,
                        budget,
                    });
                }
            }
        }
        Ok(tasks)
    }

    fn execute(&self, tasks: &[Task<'_>]) -> Result<Vec<NoisedResult>> {
        // Collected before folding so the reported error is the first in task order.
        tasks
            .par_iter()
            .map(|t| {
                self.runner(t.query, t.mechanism).privatize(
                    &t.query.id,
                    t.baseline,
                    &t.query.sensitivity,
                    &t.budget,
                )
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    /// Score noised results against their baselines in parallel.
    ///
    /// A triple whose result does not line up with its baseline is recorded
    /// as a failure and the rest continue. Any other error aborts.
    pub fn evaluate(&self, baselines: &Baselines, noised: Vec<NoisedResult>) -> Result<Evaluated> {
        let outcomes: Vec<Result<Vec<MetricRecord>>> = noised
            .par_iter()
            .map(|n| {
                let query = self.config.query(&n.query_id).ok_or_else(|| {
                    DpError::config(format!("query `{}` is not configured", n.query_id))
                })?;
                let baseline = baselines.get(&n.query_id).ok_or_else(|| {
                    DpError::config(format!("no baseline for query `{}`", n.query_id))
                })?;
                self.engine.evaluate(&query.shape, baseline, n)
            })
            .collect();

        let mut out = Evaluated::default();
        for (n, outcome) in noised.into_iter().zip(outcomes) {
            match outcome {
                Ok(records) => {
                    out.records.extend(records);
                    out.noised.push(n);
                }
                Err(e) if !e.is_fatal() => {
                    warn!(
                        query = %n.query_id,
                        mechanism = %n.mechanism,
                        epsilon = %n.budget.epsilon,
                        error = %e,
                        "skipping triple"
                    );
                    out.failures.push(TripleFailure {
                        query_id: n.query_id,
                        mechanism: n.mechanism,
                        epsilon: n.budget.epsilon,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Noise every query at every configured budget, score and select.
    pub fn sweep(&self, baselines: &Baselines) -> Result<SweepReport> {
        let span = info_span!(
            "sweep",
            queries = self.config.queries.len(),
            mechanisms = self.config.mechanisms.len(),
            epsilons = self.config.epsilons.len()
        );
        let _enter = span.enter();

        let prepared = self.prepare(baselines)?;
        let tasks = self.tasks(&prepared, |m| self.config.budgets(m))?;
        info!(tasks = tasks.len(), "running sweep");
        let noised = self.execute(&tasks)?;
        let evaluated = self.evaluate(baselines, noised)?;
        debug!(
            records = evaluated.records.len(),
            failures = evaluated.failures.len(),
            "evaluation finished"
        );

        let selector = EpsilonSelector::new(&self.config.epsilons, self.config.thresholds)?;
        let selected = selector.select_all(
            &evaluated.records,
            self.config.selection,
            &self.config.mechanisms,
            &self.config.selection_targets(),
        )?;
        Ok(SweepReport {
            evaluated,
            selected,
        })
    }

    /// Noise every query once at `epsilon` and score the results.
    pub fn produce(&self, baselines: &Baselines, epsilon: Epsilon) -> Result<Evaluated> {
        let span = info_span!("produce", %epsilon);
        let _enter = span.enter();

        let prepared = self.prepare(baselines)?;
        let tasks = self.tasks(&prepared, |m| Ok(vec![self.config.budget_at(m, epsilon)?]))?;
        info!(tasks = tasks.len(), "running single-epsilon pass");
        let noised = self.execute(&tasks)?;
        self.evaluate(baselines, noised)
    }

    /// Production pass at previously selected budgets.
    ///
    /// A per-query choice applies to its own query and mechanism; a global
    /// choice applies to every query under its mechanism.
    pub fn produce_selected(
        &self,
        baselines: &Baselines,
        selected: &[SelectedEpsilon],
    ) -> Result<Evaluated> {
        let prepared = self.prepare(baselines)?;
        let mut tasks = Vec::new();
        for choice in selected {
            for &(query, baseline) in &prepared {
                if choice.query_id.as_deref().is_some_and(|id| id != query.id) {
                    continue;
                }
                tasks.push(Task {
                    query,
                    baseline,
                    mechanism: choice.mechanism,
                    budget: self.config.budget_at(choice.mechanism, choice.epsilon)?,
                });
            }
        }
        info!(tasks = tasks.len(), "running production pass at selected budgets");
        let noised = self.execute(&tasks)?;
        self.evaluate(baselines, noised)
    }

    /// Run in the configured mode.
    pub fn run(&self, baselines: &Baselines) -> Result<RunOutput> {
        match self.config.mode {
            RunMode::Sweep => self.sweep(baselines).map(RunOutput::Sweep),
            RunMode::SingleEpsilon => {
                let epsilon = self.config.epsilon.ok_or_else(|| {
                    DpError::config("single_epsilon mode needs an `epsilon` value")
                })?;
                self.produce(baselines, epsilon).map(RunOutput::SingleEpsilon)
            }
        }
    }
}
