//! Small numeric helpers shared by the tracking stages.

/// Similarity of two positive quantities: `1 - |a - b| / (a + b)`.
///
/// 1 for identical values, approaching 0 as they diverge.
pub fn similarity(a: f64, b: f64) -> f64 {
    1.0 - (a - b).abs() / (a + b)
}

/// Relative size difference `|a - b| / max(a, b)`.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.max(b)
}

/// Centroid distance normalized by `max_distance` and capped at 1.
///
/// A zero `max_distance` yields 0 for coincident centroids and 1 otherwise.
pub fn normalized_distance(distance: f64, max_distance: f64) -> f64 {
    if max_distance > 0.0 {
        distance.min(max_distance) / max_distance
    } else if distance > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Check if any value in a slice is true.
pub fn any_true(values: &[bool]) -> bool {
    values.iter().any(|&v| v)
}
