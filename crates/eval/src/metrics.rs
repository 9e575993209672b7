//! Accuracy metrics between a baseline and a noised column or table.
//!
//! All functions take already-aligned inputs: position `i` of both arguments
//! describes the same group.

use std::collections::BTreeSet;

use ndarray::Array1;
use statrs::statistics::Statistics;

/// Floor applied to probabilities before taking logarithms.
pub const KL_FLOOR: f64 = 1e-10;

/// Default number of leading positions compared by [`top_k_overlap`].
pub const DEFAULT_TOP_K: usize = 3;

/// Standard scores using the population standard deviation.
///
/// A constant (or empty) column has no spread and yields all zeros.
pub fn z_scores(values: &[f64]) -> Array1<f64> {
    let x = Array1::from(values.to_vec());
    if x.is_empty() {
        return x;
    }
    let mean = values.iter().mean();
    let sd = values.iter().population_std_dev();
    if !sd.is_finite() || sd == 0.0 {
        return Array1::zeros(x.len());
    }
    (x - mean) / sd
}

/// Indices whose z-score is strictly above `threshold`.
pub fn flagged(z: &Array1<f64>, threshold: f64) -> BTreeSet<usize> {
    z.iter()
        .enumerate()
        .filter(|(_, &v)| v > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Intersection over union. Two empty sets agree perfectly.
pub fn iou<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Largest absolute elementwise difference.
pub fn linf_distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    (a - b).fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

fn to_distribution(values: &[f64]) -> Option<Array1<f64>> {
    let x = Array1::from(values.iter().map(|v| v.max(0.0)).collect::<Vec<_>>());
    let total = x.sum();
    if total > 0.0 && total.is_finite() {
        Some(x / total)
    } else {
        None
    }
}

/// Total variation distance `0.5 * sum |p - q|` after scaling both to sum 1.
///
/// Two all-zero inputs are identical (0). If only one of them is all zero
/// they share no mass (1).
pub fn total_variation_distance(p: &[f64], q: &[f64]) -> f64 {
    match (to_distribution(p), to_distribution(q)) {
        (Some(p), Some(q)) => 0.5 * (&p - &q).mapv(f64::abs).sum(),
        (None, None) => 0.0,
        _ => 1.0,
    }
}

/// Mean absolute error on the raw values.
pub fn mean_absolute_error(p: &[f64], q: &[f64]) -> f64 {
    if p.is_empty() {
        return 0.0;
    }
    let a = Array1::from(p.to_vec());
    let b = Array1::from(q.to_vec());
    (&a - &b).mapv(f64::abs).sum() / p.len() as f64
}

/// Kendall's tau-b rank correlation.
///
/// Fewer than two items carry no ordering and score 1. If either side is
/// entirely tied the coefficient is undefined: identical inputs score 1, any
/// other pair scores 0.
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 1.0;
    }
    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut ties_x, mut ties_y) = (0i64, 0i64);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx == 0.0 && dy == 0.0 {
                ties_x += 1;
                ties_y += 1;
            } else if dx == 0.0 {
                ties_x += 1;
            } else if dy == 0.0 {
                ties_y += 1;
            } else if (dx > 0.0) == (dy > 0.0) {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }
    let pairs = (n * (n - 1) / 2) as i64;
    let denom = (((pairs - ties_x) * (pairs - ties_y)) as f64).sqrt();
    if denom == 0.0 {
        return if x[..n] == y[..n] { 1.0 } else { 0.0 };
    }
    (concordant - discordant) as f64 / denom
}

/// Positions of the `k` largest values, earlier position first on ties.
pub fn top_k_indices(values: &[f64], k: usize) -> BTreeSet<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order.into_iter().take(k).collect()
}

/// Share of the baseline's top `k` that the noised top `k` recovers.
pub fn top_k_overlap(baseline: &[f64], noised: &[f64], k: usize) -> f64 {
    let k = k.min(baseline.len());
    if k == 0 {
        return 1.0;
    }
    let a = top_k_indices(baseline, k);
    let b = top_k_indices(noised, k);
    a.intersection(&b).count() as f64 / k as f64
}

/// Fraction of positions where the two winners agree. Empty input scores 1.
pub fn top1_accuracy<T: PartialEq>(baseline: &[T], noised: &[T]) -> f64 {
    if baseline.is_empty() {
        return 1.0;
    }
    let hits = baseline
        .iter()
        .zip(noised)
        .filter(|(a, b)| a == b)
        .count();
    hits as f64 / baseline.len() as f64
}

/// KL divergence `D(p || q)` with both sides floored at [`KL_FLOOR`] and
/// rescaled to sum 1.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    if p.is_empty() {
        return 0.0;
    }
    let floor = |v: &[f64]| {
        let x = Array1::from(v.iter().map(|x| x.max(KL_FLOOR)).collect::<Vec<_>>());
        let total = x.sum();
        x / total
    };
    let p = floor(p);
    let q = floor(q);
    p.iter()
        .zip(q.iter())
        .map(|(&pi, &qi)| pi * (pi / qi).ln())
        .sum::<f64>()
        .max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn z_scores_of_constant_column_are_zero() {
        let z = z_scores(&[4.0, 4.0, 4.0]);
        assert!(z.iter().all(|&v| v == 0.0));
        assert!(z_scores(&[]).is_empty());
    }

    #[test]
    fn z_scores_use_population_std() {
        let z = z_scores(&[1.0, 3.0]);
        assert!(close(z[0], -1.0));
        assert!(close(z[1], 1.0));
        assert_eq!(flagged(&z, 0.0), BTreeSet::from([1]));
    }

    #[test]
    fn iou_handles_empty_sets() {
        let empty: BTreeSet<usize> = BTreeSet::new();
        assert_eq!(iou(&empty, &empty), 1.0);
        let a = BTreeSet::from([1, 2, 3]);
        let b = BTreeSet::from([2, 3, 4]);
        assert!(close(iou(&a, &b), 0.5));
        assert_eq!(iou(&a, &empty), 0.0);
    }

    #[test]
    fn tvd_examples() {
        assert_eq!(total_variation_distance(&[100.0, 50.0, 25.0], &[4.0, 2.0, 1.0]), 0.0);
        assert!(close(
            total_variation_distance(&[1.0, 0.0], &[0.0, 1.0]),
            1.0
        ));
        assert_eq!(total_variation_distance(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(total_variation_distance(&[1.0, 2.0], &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn mae_on_raw_values() {
        assert!(close(mean_absolute_error(&[10.0, 20.0], &[12.0, 17.0]), 2.5));
        assert_eq!(mean_absolute_error(&[], &[]), 0.0);
    }

    #[test]
    fn kendall_known_values() {
        assert!(close(kendall_tau_b(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]), 1.0));
        assert!(close(kendall_tau_b(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0));
        assert!(close(
            kendall_tau_b(&[1.0, 2.0, 3.0, 4.0], &[1.0, 3.0, 2.0, 4.0]),
            4.0 / 6.0
        ));
        // One tie in x.
        assert!(close(
            kendall_tau_b(&[1.0, 1.0, 2.0], &[1.0, 2.0, 3.0]),
            2.0 / 6.0f64.sqrt()
        ));
    }

    #[test]
    fn kendall_degenerate_inputs() {
        assert_eq!(kendall_tau_b(&[5.0], &[1.0]), 1.0);
        assert_eq!(kendall_tau_b(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(kendall_tau_b(&[2.0, 2.0], &[1.0, 3.0]), 0.0);
    }

    #[test]
    fn top_k_prefers_earlier_rows_on_ties() {
        assert_eq!(top_k_indices(&[5.0, 9.0, 5.0, 1.0], 2), BTreeSet::from([0, 1]));
        assert!(close(
            top_k_overlap(&[9.0, 8.0, 7.0, 1.0], &[9.0, 1.0, 7.0, 8.0], 3),
            1.0
        ));
        assert!(close(
            top_k_overlap(&[9.0, 8.0, 7.0, 1.0], &[9.0, 1.0, 7.0, 0.0], 2),
            0.5
        ));
        assert_eq!(top_k_overlap(&[], &[], 3), 1.0);
    }

    #[test]
    fn top1_accuracy_counts_matches() {
        assert!(close(top1_accuracy(&["a", "b", "c", "d"], &["a", "x", "c", "d"]), 0.75));
        let none: [Option<&str>; 0] = [];
        assert_eq!(top1_accuracy(&none, &none), 1.0);
    }

    #[test]
    fn kl_floor_keeps_divergence_finite() {
        assert_eq!(kl_divergence(&[0.2, 0.8], &[2.0, 8.0]), 0.0);
        let d = kl_divergence(&[1.0, 0.0], &[0.5, 0.5]);
        assert!((d - 2f64.ln()).abs() < 1e-6);
        assert!(kl_divergence(&[0.5, 0.5], &[1.0, 0.0]).is_finite());
    }

    proptest! {
        #[test]
        fn prop_tvd_is_bounded(
            p in prop::collection::vec(0.0f64..100.0, 1..12),
            noise in prop::collection::vec(-50.0f64..50.0, 12),
        ) {
            let q: Vec<f64> = p.iter().zip(&noise).map(|(a, b)| a + b).collect();
            let d = total_variation_distance(&p, &q);
            prop_assert!((0.0..=1.0 + 1e-12).contains(&d));
            prop_assert!(total_variation_distance(&p, &p) < 1e-12);
        }

        #[test]
        fn prop_kendall_is_bounded(
            x in prop::collection::vec(-10.0f64..10.0, 0..10),
            y in prop::collection::vec(-10.0f64..10.0, 0..10),
        ) {
            let t = kendall_tau_b(&x, &y);
            prop_assert!((-1.0 - 1e-12..=1.0 + 1e-12).contains(&t));
        }

        #[test]
        fn prop_kl_non_negative(
            p in prop::collection::vec(0.0f64..10.0, 1..8),
            q in prop::collection::vec(0.0f64..10.0, 8),
        ) {
            let d = kl_divergence(&p, &q[..p.len()]);
            prop_assert!(d >= 0.0 && d.is_finite());
        }
    }
}
