//! Sensitivity model for aggregate columns.
//!
//! The unit of privacy is one entity (a device `guid`). The reporting layer
//! guarantees each entity contributes at most one row per aggregation key, so
//! the sensitivity of a column is the largest change a single entity can cause
//! in that column's aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::table::QueryResult;

/// How a column was aggregated, with the bounds needed to derive its sensitivity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationKind {
    /// `COUNT` / `COUNT(DISTINCT guid)`: one entity moves the count by one.
    Count,
    /// `SUM` over an entity's rows.
    Sum {
        /// Largest magnitude one entity can contribute.
        max_contribution: f64,
    },
    /// `AVG` over entities, including averages of per-entity averages.
    ///
    /// The bound is `max_value / min_population`: the numerator moves by at most
    /// `max_value` and the denominator is at least `min_population`. This is an
    /// upper-bound approximation, not a tight guarantee. Adding or removing an
    /// entity also changes the denominator, and an average of averages is not
    /// Lipschitz in general. Tightening it would change the privacy semantics
    /// being measured, so it is kept as declared.
    Average {
        /// Largest value a single entity can report.
        max_value: f64,
        /// Smallest number of entities behind any group's average.
        #[serde(default = "one")]
        min_population: f64,
    },
    /// Share of a population expressed in percentage points.
    Percentage {
        /// Smallest population behind any share.
        #[serde(default = "one")]
        min_population: f64,
    },
}

fn one() -> f64 {
    1.0
}

impl AggregationKind {
    /// Sensitivity implied by this aggregation. Zero means "never noised".
    pub fn sensitivity(&self) -> Result<f64> {
        let value = match *self {
            Self::Count => 1.0,
            Self::Sum { max_contribution } => {
                check_bound("max_contribution", max_contribution)?;
                max_contribution
            }
            Self::Average {
                max_value,
                min_population,
            } => {
                check_bound("max_value", max_value)?;
                check_population(min_population)?;
                max_value / min_population
            }
            Self::Percentage { min_population } => {
                check_population(min_population)?;
                100.0 / min_population
            }
        };
        Ok(value)
    }
}

fn check_bound(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(DpError::config(format!(
            "{name} must be finite and non-negative, got {v}"
        )));
    }
    Ok(())
}

fn check_population(v: f64) -> Result<()> {
    if !v.is_finite() || v < 1.0 {
        return Err(DpError::config(format!(
            "min_population must be at least 1, got {v}"
        )));
    }
    Ok(())
}

/// Declared aggregation per column of one query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensitivitySpec {
    columns: BTreeMap<String, AggregationKind>,
}

impl SensitivitySpec {
    /// No declared columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a column's aggregation (builder style).
    pub fn with<S: Into<String>>(mut self, column: S, kind: AggregationKind) -> Self {
        self.columns.insert(column.into(), kind);
        self
    }

    /// Declare a column's aggregation.
    pub fn declare<S: Into<String>>(&mut self, column: S, kind: AggregationKind) {
        self.columns.insert(column.into(), kind);
    }

    /// Declared aggregation for a column.
    pub fn aggregation(&self, column: &str) -> Option<&AggregationKind> {
        self.columns.get(column)
    }

    /// Sensitivity of a column, failing if nothing was declared for it.
    pub fn sensitivity(&self, column: &str) -> Result<f64> {
        self.columns
            .get(column)
            .ok_or_else(|| {
                DpError::config(format!("no sensitivity declared for column `{column}`"))
            })?
            .sensitivity()
    }

    /// Declared column names.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Vector norm a mechanism calibrates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Norm {
    /// Sum of absolute values (Laplace).
    L1,
    /// Euclidean norm (Gaussian).
    L2,
}

impl Norm {
    /// Norm of a sensitivity vector.
    pub fn of(self, values: &[f64]) -> f64 {
        match self {
            Self::L1 => values.iter().map(|v| v.abs()).sum(),
            Self::L2 => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
        }
    }
}

/// How column sensitivities feed the noise scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityScope {
    /// Each column is calibrated to its own sensitivity and budget slice.
    #[default]
    PerColumn,
    /// Every column uses the norm of the query's whole sensitivity vector.
    Joint,
}

/// Resolved sensitivity for one noised column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSensitivity {
    /// Column position in the query result.
    pub index: usize,
    /// Column name.
    pub name: String,
    /// Sensitivity used for calibration. Zero means the column is skipped.
    pub sensitivity: f64,
}

/// Derives per-column sensitivities for a query result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensitivityModel {
    /// Calibration scope.
    pub scope: SensitivityScope,
}

impl SensitivityModel {
    /// Create a model with the given scope.
    pub fn new(scope: SensitivityScope) -> Self {
        Self { scope }
    }

    /// Sensitivity for one column under a declared aggregation.
    pub fn sensitivity(&self, column: &str, aggregation: Option<&AggregationKind>) -> Result<f64> {
        aggregation
            .ok_or_else(|| {
                DpError::config(format!("no sensitivity declared for column `{column}`"))
            })?
            .sensitivity()
    }

    /// Sensitivities for every noisable column of `result`.
    ///
    /// Under [`SensitivityScope::Joint`] all columns share `norm` of the vector of
    /// individual sensitivities.
    pub fn resolve(
        &self,
        result: &QueryResult,
        spec: &SensitivitySpec,
        norm: Norm,
    ) -> Result<Vec<ColumnSensitivity>> {
        let mut out = Vec::new();
        for (index, column) in result.columns().iter().enumerate() {
            if !column.kind.is_noised() {
                continue;
            }
            let sensitivity = self.sensitivity(&column.name, spec.aggregation(&column.name))?;
            out.push(ColumnSensitivity {
                index,
                name: column.name.clone(),
                sensitivity,
            });
        }

        if self.scope == SensitivityScope::Joint {
            let values: Vec<f64> = out.iter().map(|c| c.sensitivity).collect();
            let joint = norm.of(&values);
            for c in out.iter_mut().filter(|c| c.sensitivity > 0.0) {
                c.sensitivity = joint;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnKind};

    fn table() -> QueryResult {
        QueryResult::new(
            vec![
                Column::new("country", ColumnKind::Identifier),
                Column::new("number_of_systems", ColumnKind::NumericAdditive),
                Column::new("avg_duration", ColumnKind::NumericRatio),
                Column::new("rank", ColumnKind::Rank),
            ],
            vec![vec!["US".into(), 10.0.into(), 30.0.into(), 1.0.into()]],
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

    #[test]
    fn aggregation_bounds() {
        assert_eq!(AggregationKind::Count.sensitivity().unwrap(), 1.0);
        let sum = AggregationKind::Sum {
            max_contribution: 100.0,
        };
        assert_eq!(sum.sensitivity().unwrap(), 100.0);
        let avg = AggregationKind::Average {
            max_value: 60.0,
            min_population: 4.0,
        };
        assert_eq!(avg.sensitivity().unwrap(), 15.0);
        let pct = AggregationKind::Percentage {
            min_population: 100.0,
        };
        assert_eq!(pct.sensitivity().unwrap(), 1.0);
    }

    #[test]
    fn rejects_bad_bounds() {
        let neg = AggregationKind::Sum {
            max_contribution: -1.0,
        };
        assert!(matches!(
            neg.sensitivity(),
            Err(DpError::Configuration { .. })
        ));
        let zero_pop = AggregationKind::Percentage {
            min_population: 0.0,
        };
        assert!(zero_pop.sensitivity().is_err());
    }

    #[test]
    fn missing_declaration_is_configuration_error() {
        let spec = SensitivitySpec::new().with("number_of_systems", AggregationKind::Count);
        let err = SensitivityModel::default()
            .resolve(&table(), &spec, Norm::L1)
            .unwrap_err();
        assert!(matches!(err, DpError::Configuration { .. }));
        assert!(err.to_string().contains("avg_duration"));
    }

    #[test]
    fn per_column_scope_keeps_individual_values() {
        let cols = SensitivityModel::default()
            .resolve(&table(), &spec(), Norm::L2)
            .unwrap();
        let values: Vec<f64> = cols.iter().map(|c| c.sensitivity).collect();
        assert_eq!(values, vec![1.0, 60.0]);
        assert_eq!(cols[1].index, 2);
    }

    #[test]
    fn joint_scope_uses_vector_norm() {
        let model = SensitivityModel::new(SensitivityScope::Joint);
        let l1 = model.resolve(&table(), &spec(), Norm::L1).unwrap();
        assert!(l1.iter().all(|c| c.sensitivity == 61.0));
        let l2 = model.resolve(&table(), &spec(), Norm::L2).unwrap();
        let expected = (1.0f64 + 3600.0).sqrt();
        assert!(l2.iter().all(|c| (c.sensitivity - expected).abs() < 1e-12));
    }

    #[test]
    fn spec_deserializes_from_tagged_map() {
        let json = r#"{
            "number_of_systems": {"kind": "count"},
            "avg_duration": {"kind": "average", "max_value": 60.0}
        }"#;
        let spec: SensitivitySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.sensitivity("avg_duration").unwrap(), 60.0);
        assert_eq!(spec.columns().count(), 2);
    }
}
