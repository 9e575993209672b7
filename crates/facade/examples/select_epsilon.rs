use telemetry_dp::eval::select;
use telemetry_dp::{Epsilon, Metric};

fn main() {
    let records = [
        (Epsilon::new(0.1).expect("eps"), 0.40),
        (Epsilon::new(1.0).expect("eps"), 0.08),
        (Epsilon::new(10.0).expect("eps"), 0.01),
    ];
    let threshold = 0.10;
    match select(&records, Metric::Tvd.direction(), threshold) {
        Some((eps, true)) => println!("smallest epsilon with TVD <= {threshold}: {eps}"),
        Some((eps, false)) => println!("no epsilon qualifies; falling back to {eps}"),
        None => println!("no finite epsilon recorded"),
    }
}
