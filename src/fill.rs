//! Nearest-label fill by multi-source wavefront propagation.
//!
//! Each round first grows the frontier through 4-connected neighbours, then
//! lets the frontier pixels that grew nothing reach their diagonal
//! neighbours. Newly filled pixels become the next frontier, sorted by raster
//! index, so among equidistant sources the one earliest in raster order wins.

/// 4-connected offsets in visiting order: left, top, bottom, right.
const EDGE_NEIGHBOURS: [(i64, i64); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

/// Diagonal offsets in visiting order: top-left, bottom-left, top-right, bottom-right.
const CORNER_NEIGHBOURS: [(i64, i64); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

struct Grid {
    width: usize,
    height: usize,
}

impl Grid {
    #[inline]
    fn neighbour(&self, k: usize, (dx, dy): (i64, i64)) -> Option<usize> {
        let x = (k % self.width) as i64 + dx;
        let y = (k / self.width) as i64 + dy;
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }
}

/// Assign every valid unlabeled pixel the label of its nearest labeled pixel.
///
/// # Arguments
/// * `labels` - Row-major labels, 0 meaning unlabeled; filled in place
/// * `mask` - Row-major validity mask; pixels with value 0 are never filled
/// * `width`, `height` - Dimensions shared by both buffers
pub fn fill_nearest_label(labels: &mut [u32], mask: &[u32], width: usize, height: usize) {
    propagate(labels, mask, width, height, |_, _| {});
}

/// Nearest-label fill that also reports the geodesic distance of every pixel.
///
/// The distance of a filled pixel is the round in which it was reached.
/// Initially labeled pixels get 0, pixels outside the mask `NaN` and valid
/// pixels no label could reach `+inf`.
pub fn geodesic_distance(labels: &mut [u32], mask: &[u32], width: usize, height: usize) -> Vec<f64> {
    let mut distance: Vec<f64> = labels
        .iter()
        .zip(mask)
        .map(|(&label, &valid)| {
            if valid == 0 {
                f64::NAN
            } else if label > 0 {
                0.0
            } else {
                f64::INFINITY
            }
        })
        .collect();

    propagate(labels, mask, width, height, |k, round| distance[k] = round as f64);
    distance
}

fn propagate<F>(labels: &mut [u32], mask: &[u32], width: usize, height: usize, mut on_fill: F)
where
    F: FnMut(usize, usize),
{
    debug_assert_eq!(labels.len(), width * height);
    debug_assert_eq!(mask.len(), width * height);
    let grid = Grid { width, height };
    let fillable = |labels: &[u32], k: usize| labels[k] == 0 && mask[k] > 0;

    // Seed with labeled pixels bordering at least one fillable pixel.
    let mut frontier: Vec<usize> = (0..labels.len())
        .filter(|&k| {
            labels[k] > 0
                && EDGE_NEIGHBOURS
                    .iter()
                    .chain(CORNER_NEIGHBOURS.iter())
                    .filter_map(|&d| grid.neighbour(k, d))
                    .any(|n| fillable(labels, n))
        })
        .collect();

    let mut round = 0;
    let mut consumed: Vec<bool> = Vec::new();
    let mut filled: Vec<usize> = Vec::new();

    while !frontier.is_empty() {
        round += 1;
        consumed.clear();
        consumed.resize(frontier.len(), false);

        for (slot, &k) in frontier.iter().enumerate() {
            let label = labels[k];
            for &d in &EDGE_NEIGHBOURS {
                if let Some(n) = grid.neighbour(k, d) {
                    if fillable(labels, n) {
                        labels[n] = label;
                        filled.push(n);
                        on_fill(n, round);
                        consumed[slot] = true;
                    }
                }
            }
        }

        for (slot, &k) in frontier.iter().enumerate() {
            if consumed[slot] {
                continue;
            }
            let label = labels[k];
            for &d in &CORNER_NEIGHBOURS {
                if let Some(n) = grid.neighbour(k, d) {
                    if fillable(labels, n) {
                        labels[n] = label;
                        filled.push(n);
                        on_fill(n, round);
                    }
                }
            }
        }

        filled.sort_unstable();
        std::mem::swap(&mut frontier, &mut filled);
        filled.clear();
    }
}
