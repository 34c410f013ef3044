//! Order statistics and sigma clipping over finite samples.
//!
//! Every function here ignores NaN and infinite inputs; callers never need
//! to pre-filter.

/// Copy out the finite values of `data`.
pub fn finite_values(data: &[f64]) -> Vec<f64> {
    data.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Population standard deviation (ddof = 0).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let (sum_sq, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(acc, count), v| (acc + (v - m).powi(2), count + 1));
    Some((sum_sq / count as f64).sqrt())
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted = finite_values(values);
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub fn median(values: &[f64]) -> Option<f64> {
    median_of_sorted(&sorted_finite(values))
}

fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Percentile with linear interpolation between closest ranks.
/// `percent` is clamped to [0, 100].
pub fn percentile(values: &[f64], percent: f64) -> Option<f64> {
    percentile_of_sorted(&sorted_finite(values), percent)
}

fn percentile_of_sorted(sorted: &[f64], percent: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = percent.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Result of [`sigma_clipped_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Number of values surviving the clipping
    pub retained: usize,
    pub iterations: usize,
}

/// Iterative sigma clipping around the median.
///
/// Each pass keeps values within `sigma` standard deviations of the median of
/// the surviving set; passes stop when nothing more is rejected or after
/// `max_iters` passes (`None` runs until convergence).
pub fn sigma_clipped_stats(
    values: &[f64],
    sigma: f64,
    max_iters: Option<usize>,
) -> Option<ClippedStats> {
    let mut kept = sorted_finite(values);
    if kept.is_empty() {
        return None;
    }

    let mut iterations = 0;
    loop {
        if max_iters.is_some_and(|max| iterations >= max) {
            break;
        }
        let center = median_of_sorted(&kept)?;
        let std = std_dev(&kept)?;
        let (lo, hi) = (center - sigma * std, center + sigma * std);

        // kept is sorted, so the survivors form a contiguous range
        let start = kept.partition_point(|&v| v < lo);
        let end = kept.partition_point(|&v| v <= hi);
        iterations += 1;

        if end - start == kept.len() {
            break;
        }
        kept = kept[start..end].to_vec();
        if kept.is_empty() {
            return None;
        }
    }

    Some(ClippedStats {
        mean: mean(&kept)?,
        median: median_of_sorted(&kept)?,
        std: std_dev(&kept)?,
        retained: kept.len(),
        iterations,
    })
}
