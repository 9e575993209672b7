use std::path::Path;

use telemetry_dp::{read_baselines, Pipeline, PipelineConfig};

fn main() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
    let config = PipelineConfig::from_path(&root.join("sample.toml")).expect("config");
    let baselines = read_baselines(&root.join("baselines"), &config).expect("baselines");
    let pipeline = Pipeline::new(config).expect("pipeline");

    let report = pipeline.sweep(&baselines).expect("sweep");
    for s in &report.selected {
        println!(
            "{:<18} {:<9} eps={:<5} satisfied={} {}={:?}",
            s.query_id.as_deref().unwrap_or("*"),
            s.mechanism,
            s.epsilon,
            s.satisfied,
            s.metric.map(|m| m.name()).unwrap_or("-"),
            s.value,
        );
    }

    let production = pipeline
        .produce_selected(&baselines, &report.selected)
        .expect("production pass");
    println!("production tables: {}", production.noised.len());
}
