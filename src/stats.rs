//! Pure statistics kernel. No allocation beyond the sorted copies each
//! function needs, no knowledge of `Observation` or the store.

/// Arithmetic mean. Caller must ensure `xs` is non-empty.
pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation. Zero for fewer than two points or when
/// every value is equal.
pub fn stddev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let variance = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    variance.sqrt()
}

/// q-quantile via linear interpolation between order statistics, `q` in
/// `[0, 1]`. Caller must ensure `xs` is non-empty.
pub fn quantile(xs: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    if sorted.len() == 1 {
        return sorted[0];
    }

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Indices of values within `threshold` standard deviations of the mean.
/// Returns every index when `|xs| < 3` or the data has zero spread.
pub fn zscore_filter(xs: &[f64], threshold: f64) -> Vec<usize> {
    if xs.len() < 3 {
        return (0..xs.len()).collect();
    }
    let m = mean(xs);
    let sd = stddev(xs);
    if sd == 0.0 {
        return (0..xs.len()).collect();
    }
    xs.iter()
        .enumerate()
        .filter(|(_, &x)| ((x - m) / sd).abs() <= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Indices of values within `multiplier` IQRs of the inter-quartile range.
/// Returns every index when `|xs| < 4`. Operates on whatever slice it is
/// given — callers that chain this after [`zscore_filter`] get a
/// second-pass filter recomputed on the z-score survivors, which is
/// intentional (see DESIGN.md).
pub fn iqr_filter(xs: &[f64], multiplier: f64) -> Vec<usize> {
    if xs.len() < 4 {
        return (0..xs.len()).collect();
    }
    let q1 = quantile(xs, 0.25);
    let q3 = quantile(xs, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - multiplier * iqr;
    let upper = q3 + multiplier * iqr;
    xs.iter()
        .enumerate()
        .filter(|(_, &x)| x >= lower && x <= upper)
        .map(|(i, _)| i)
        .collect()
}
