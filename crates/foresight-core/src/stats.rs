//! Descriptive statistics over probability samples.
//!
//! All functions take unsorted slices and return `None` instead of NaN
//! when the input is too small for the statistic.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let sorted = sorted(values);
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Sample standard deviation (n - 1 denominator). `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Quantile with linear interpolation between closest ranks, `q` in `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let sorted = sorted(values);
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Mean after dropping `proportion` of the values from each end.
pub fn trimmed_mean(values: &[f64], proportion: f64) -> Option<f64> {
    let sorted = sorted(values);
    let cut = (sorted.len() as f64 * proportion.clamp(0.0, 0.5)).floor() as usize;
    if sorted.len() <= 2 * cut {
        return mean(&sorted);
    }
    mean(&sorted[cut..sorted.len() - cut])
}

/// Values outside the Tukey fences `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
///
/// Returns 0 with fewer than four values, where quartiles are meaningless.
pub fn outlier_count(values: &[f64]) -> usize {
    if values.len() < 4 {
        return 0;
    }
    let (Some(q1), Some(q3)) = (quantile(values, 0.25), quantile(values, 0.75)) else {
        return 0;
    };
    let iqr = q3 - q1;
    let (low, high) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    values.iter().filter(|v| **v < low || **v > high).count()
}

/// Weighted mean of `(value, weight)` pairs. `None` if weights sum to zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if pairs.is_empty() || !total.is_finite() || total <= 0.0 {
        return None;
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_statistics() {
        let values = [40.0, 50.0, 60.0, 70.0];
        assert_eq!(mean(&values), Some(55.0));
        assert_eq!(median(&values), Some(55.0));
        assert_eq!(min(&values), Some(40.0));
        assert_eq!(max(&values), Some(70.0));
        let std = sample_std(&values).unwrap();
        assert!((std - 12.909944487358056).abs() < 1e-9);
    }

    #[test]
    fn test_odd_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_small_inputs() {
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
        assert_eq!(sample_std(&[42.0]), None);
        assert_eq!(min(&[]), None);
        assert_eq!(trimmed_mean(&[], 0.1), None);
        assert_eq!(outlier_count(&[1.0, 99.0]), 0);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile(&values, 0.0), Some(10.0));
        assert_eq!(quantile(&values, 1.0), Some(40.0));
        assert_eq!(quantile(&values, 0.5), Some(25.0));
    }

    #[test]
    fn test_trimmed_mean_drops_extremes() {
        let mut values = vec![50.0; 8];
        values.push(0.0);
        values.push(100.0);
        assert_eq!(trimmed_mean(&values, 0.1), Some(50.0));
    }

    #[test]
    fn test_outliers() {
        let values = [40.0, 41.0, 42.0, 43.0, 44.0, 95.0];
        assert_eq!(outlier_count(&values), 1);
        assert_eq!(outlier_count(&[42.0; 6]), 0);
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean(&[(10.0, 1.0), (40.0, 2.0)]), Some(30.0));
        assert_eq!(weighted_mean(&[(10.0, 0.0)]), None);
        assert_eq!(weighted_mean(&[]), None);
    }
}
