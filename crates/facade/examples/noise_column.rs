use std::sync::Arc;

use telemetry_dp::core::{budgets_for, default_epsilons, Mechanism};
use telemetry_dp::{
    AggregationKind, Column, ColumnKind, EpsilonSweepRunner, MechanismKind, QueryResult,
    SeededSource, SensitivitySpec,
};

fn main() {
    let baseline = QueryResult::new(
        vec![
            Column::new("country", ColumnKind::Identifier),
            Column::new("number_of_systems", ColumnKind::NumericAdditive),
        ],
        vec![
            vec!["US".into(), 412.0.into()],
            vec!["DE".into(), 97.0.into()],
            vec!["NZ".into(), 5.0.into()],
        ],
    )
    .expect("valid baseline");
    let spec = SensitivitySpec::new().with("number_of_systems", AggregationKind::Count);

    let runner = EpsilonSweepRunner::new(
        Mechanism::from_kind(MechanismKind::Laplace),
        Arc::new(SeededSource::new(42)),
    );
    let budgets = budgets_for(MechanismKind::Laplace, &default_epsilons(), 1e-6).expect("budgets");
    for noised in runner
        .sweep("systems_by_country", &baseline, &spec, &budgets)
        .expect("sweep")
    {
        let counts = noised
            .result
            .numeric_values("number_of_systems")
            .expect("numeric column");
        println!("eps={:<6} {:?}", noised.budget.epsilon, counts);
    }
}
