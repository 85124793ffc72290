//! Overlap and cost matrices between two consecutive frames.

use crate::frame::Frame;
use crate::matrix::Matrix;
use crate::tracker::TrackerConfig;
use crate::utils::{normalized_distance, relative_difference};
use crate::Result;

/// Shared pixel counts, `n_prev x n_cur`.
///
/// Only the region both buffers cover is scanned, so frames of different
/// sizes can still be paired.
pub fn compute_overlap(previous: &Frame, current: &Frame) -> Result<Matrix> {
    let prev_image = previous.label_image()?;
    let cur_image = current.label_image()?;

    let mut overlap = Matrix::zeros(
        previous.max_local_label() as usize,
        current.max_local_label() as usize,
    );
    let width = prev_image.width().min(cur_image.width());
    let height = prev_image.height().min(cur_image.height());

    for y in 0..height {
        for x in 0..width {
            let p = prev_image.get(x, y) as usize;
            let c = cur_image.get(x, y) as usize;
            if p > 0 && c > 0 && p <= overlap.rows() && c <= overlap.cols() {
                overlap.increment(p, c);
            }
        }
    }
    Ok(overlap)
}

/// Weighted dissimilarity for every candidate pair, `NaN` elsewhere.
///
/// A pair is a candidate when the objects overlap or their centroids lie
/// within `max_centroid_distance`.
pub fn compute_cost(
    config: &TrackerConfig,
    previous: &Frame,
    current: &Frame,
    overlap: &Matrix,
) -> Matrix {
    let mut cost = Matrix::nan(overlap.rows(), overlap.cols());

    for p in previous.objects() {
        let area_p = p.area as f64;
        for c in current.objects() {
            let (i, j) = (p.local_label as usize, c.local_label as usize);
            let area_c = c.area as f64;
            let shared = overlap.get(i, j);
            let overlap_term = 1.0 - (shared / (2.0 * area_p) + shared / (2.0 * area_c));
            let distance = p.centroid_distance(c);

            if overlap_term == 1.0 && distance > config.max_centroid_distance {
                continue;
            }
            let value = config.weight_overlap * overlap_term
                + config.weight_centroid * normalized_distance(distance, config.max_centroid_distance)
                + config.weight_size * relative_difference(area_p, area_c);
            cost.set(i, j, value);
        }
    }
    cost
}

/// Recompute both matrices from the current pixel buffers.
pub(crate) fn pair_matrices(
    config: &TrackerConfig,
    previous: &Frame,
    current: &Frame,
) -> Result<(Matrix, Matrix)> {
    let overlap = compute_overlap(previous, current)?;
    let cost = compute_cost(config, previous, current, &overlap);
    Ok((overlap, cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label_image::LabelImage;
    use approx::assert_relative_eq;

    fn processed(index: usize, width: usize, height: usize, labels: &[u32]) -> Frame {
        let image = LabelImage::from_unpadded(width, height, labels).unwrap();
        let mut frame = Frame::with_image(index, format!("t{}", index), image);
        frame.process().unwrap();
        frame
    }

    // ===== Test Overlap =====

    #[test]
    fn test_overlap_of_shifted_block() {
        #[rustfmt::skip]
        let prev = processed(0, 4, 4, &[
            1, 1, 0, 0,
            1, 1, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
        ]);
        #[rustfmt::skip]
        let cur = processed(1, 4, 4, &[
            0, 1, 1, 0,
            0, 1, 1, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
        ]);
        let overlap = compute_overlap(&prev, &cur).unwrap();
        assert_eq!((overlap.rows(), overlap.cols()), (1, 1));
        assert_eq!(overlap.get(1, 1), 2.0);
    }

    #[test]
    fn test_overlap_with_different_sizes() {
        let prev = processed(0, 3, 1, &[1, 1, 1]);
        let cur = processed(1, 2, 2, &[1, 1, 2, 2]);
        let overlap = compute_overlap(&prev, &cur).unwrap();
        assert_eq!(overlap.get(1, 1), 2.0);
        assert_eq!(overlap.get(1, 2), 0.0);
    }

    // ===== Test Cost =====

    #[test]
    fn test_cost_terms() {
        let prev = processed(0, 4, 1, &[1, 1, 0, 0]);
        let cur = processed(1, 4, 1, &[0, 1, 1, 0]);
        let config = TrackerConfig::default();
        let (overlap, cost) = pair_matrices(&config, &prev, &cur).unwrap();
        assert_eq!(overlap.get(1, 1), 1.0);
        // overlap term 0.5, centroid 1/50, equal areas
        assert_relative_eq!(cost.get(1, 1), 0.5 + 0.5 * (1.0 / 50.0), epsilon = 1e-12);
    }

    #[test]
    fn test_distant_pairs_have_no_edge() {
        let mut labels = vec![0u32; 80];
        labels[0] = 1;
        let prev = processed(0, 80, 1, &labels);
        let mut labels = vec![0u32; 80];
        labels[2] = 1;
        labels[79] = 2;
        let cur = processed(1, 80, 1, &labels);
        let config = TrackerConfig::default();
        let (_, cost) = pair_matrices(&config, &prev, &cur).unwrap();
        assert!(!cost.get(1, 1).is_nan());
        assert!(cost.get(1, 2).is_nan());
    }

    #[test]
    fn test_zero_max_distance_only_links_overlapping_objects() {
        let prev = processed(0, 5, 1, &[1, 1, 0, 2, 0]);
        let cur = processed(1, 5, 1, &[0, 1, 0, 0, 2]);
        let config = TrackerConfig {
            max_centroid_distance: 0.0,
            ..TrackerConfig::default()
        };
        let (_, cost) = pair_matrices(&config, &prev, &cur).unwrap();
        assert!(!cost.get(1, 1).is_nan());
        assert!(cost.get(2, 2).is_nan());
        assert!(cost.get(1, 2).is_nan());
    }

    #[test]
    fn test_released_frame_cannot_be_paired() {
        let mut prev = processed(0, 2, 1, &[1, 1]);
        let cur = processed(1, 2, 1, &[1, 1]);
        prev.advance(crate::frame::FrameState::Tracked).unwrap();
        prev.mark_written().unwrap();
        prev.release().unwrap();
        assert!(matches!(
            compute_overlap(&prev, &cur),
            Err(crate::Error::ImageReleased { frame: 0 })
        ));
    }
}
