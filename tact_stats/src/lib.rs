use rolling_stats::Stats;

// Two tailed t test, assuming infinite degrees of freedom.
const T_TABLE: [(f64, f64); 15] = [
    (10.000, 0.0), // 100% confidence
    (3.91, 0.0001),
    (3.291, 0.001),
    (3.090, 0.002),
    (2.807, 0.005),
    (2.576, 0.01),
    (2.326, 0.02),
    (1.960, 0.05),
    (1.645, 0.1),
    (1.282, 0.2),
    (1.036, 0.3),
    (0.842, 0.4),
    (0.674, 0.5),
    (0.253, 0.6),
    (0.0, 1.0), // 0% confidence
];

/// Welch's t statistic between two sampled distributions, as an absolute value.
/// The bigger the t, the more confident we are that the two distributions are
/// actually different. Returns 0.0 until both sides have at least 2 samples.
pub fn welch_t(first: &Stats<f64>, second: &Stats<f64>) -> f64 {
    if first.count < 2 || second.count < 2 {
        return 0.0;
    }

    let first_variance = first.std_dev * first.std_dev;
    let second_variance = second.std_dev * second.std_dev;

    let first_sample_size = first.count as f64;
    let second_sample_size = second.count as f64;

    let t = (first.mean - second.mean)
        / ((first_variance / first_sample_size) + (second_variance / second_sample_size)).sqrt();

    t.abs()
}

/// Given a t-value, the p-value from it.
///
/// This currently uses t-tables, in the future it will use an actual formula.
pub fn p_value_from_t(t: f64) -> f64 {
    if t <= 0.0 {
        return 1.0; // 0% confidence.
    }

    for (t_value, p_value) in T_TABLE {
        if t > t_value {
            return p_value;
        }
    }

    // NaN compares false against the whole table.
    1.0
}
