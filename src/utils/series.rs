//! Scalar-series helpers for training statistics and reports

/// Arithmetic mean of a slice; 0 for an empty slice.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Mean of the most recent `n` values (or all of them, if fewer exist).
pub fn recent_mean(values: &[f32], n: usize) -> f32 {
    let start = values.len().saturating_sub(n);
    mean(&values[start..])
}

/// Moving average with a fixed window, "valid" mode.
///
/// Returns one value per fully-covered window position, so the result has
/// `values.len() - window + 1` entries. Empty when the series is shorter
/// than the window.
pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().map(|&v| v as f64).sum();
    out.push((sum / window as f64) as f32);

    for i in window..values.len() {
        sum += values[i] as f64 - values[i - window] as f64;
        out.push((sum / window as f64) as f32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_recent_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
        assert_eq!(recent_mean(&[1.0, 2.0, 3.0, 4.0], 2), 3.5);
        assert_eq!(recent_mean(&[1.0, 2.0], 10), 1.5);
    }

    #[test]
    fn test_moving_average_valid_mode() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let avg = moving_average(&values, 3);

        assert_eq!(avg.len(), 3);
        assert!((avg[0] - 2.0).abs() < 1e-6);
        assert!((avg[1] - 3.0).abs() < 1e-6);
        assert!((avg[2] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_moving_average_short_series() {
        assert!(moving_average(&[1.0, 2.0], 3).is_empty());
        assert!(moving_average(&[1.0], 0).is_empty());
    }
}
