pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// Median of an unsorted slice. Even-length input averages the middle pair.
pub fn median(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Value at the slow end of a cost distribution: sort descending and take
/// the element at `len / denom`. With `denom = 4` this is the top-quartile
/// cost, the pessimistic estimate used for never-seen trigrams.
pub fn upper_quantile(data: &[f64], denom: usize) -> Option<f64> {
    if data.is_empty() || denom == 0 {
        return None;
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    Some(sorted[(sorted.len() / denom).min(sorted.len() - 1)])
}
