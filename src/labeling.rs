//! Connected-component labeling and boundary tracing on row-major label masks.
//!
//! Masks are flat `&[u32]` buffers of `width * height` pixels, 0 being
//! background. Tracing assumes the mask carries at least one background pixel
//! around its border (the padded buffers of [`crate::LabelImage`] do).

use crate::disjoint_set::DisjointSet;

/// Moore neighbourhood, clockwise in image coordinates starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Label the 8-connected foreground components of `mask` in place.
///
/// Any nonzero pixel is foreground. A single raster scan hands out provisional
/// labels from the already visited neighbours (left and the three upper
/// ones), recording equivalences in a [`DisjointSet`]. A second pass replaces
/// every provisional label with its root, numbered densely `1..=count` in
/// ascending root order.
///
/// # Returns
/// The number of components. An all-background mask yields 0.
pub fn label_components(mask: &mut [u32], width: usize, height: usize) -> usize {
    debug_assert_eq!(mask.len(), width * height);
    if width == 0 || height == 0 {
        return 0;
    }

    let mut sets = DisjointSet::new(height.max(2));
    let mut next_label: u32 = 1;
    let mut neighbours: Vec<u32> = Vec::with_capacity(4);

    for y in 0..height {
        for x in 0..width {
            let k = y * width + x;
            if mask[k] == 0 {
                continue;
            }

            neighbours.clear();
            if x > 0 && mask[k - 1] > 0 {
                neighbours.push(mask[k - 1]);
            }
            if y > 0 {
                let up = k - width;
                if x > 0 && mask[up - 1] > 0 {
                    neighbours.push(mask[up - 1]);
                }
                if mask[up] > 0 {
                    neighbours.push(mask[up]);
                }
                if x + 1 < width && mask[up + 1] > 0 {
                    neighbours.push(mask[up + 1]);
                }
            }

            match neighbours.iter().min() {
                None => {
                    mask[k] = next_label;
                    next_label += 1;
                }
                Some(&smallest) => {
                    mask[k] = smallest;
                    for a in 0..neighbours.len() {
                        for b in (a + 1)..neighbours.len() {
                            if neighbours[a] != neighbours[b] {
                                sets.union(neighbours[a] as usize, neighbours[b] as usize);
                            }
                        }
                    }
                }
            }
        }
    }

    // Mark every root, then number the marked ids in ascending order.
    let provisional = next_label as usize;
    let mut is_root = vec![false; provisional];
    for label in 1..provisional {
        is_root[sets.find(label)] = true;
    }
    let mut dense = vec![0u32; provisional];
    let mut count = 0u32;
    for (label, root) in is_root.iter().enumerate().skip(1) {
        if *root {
            count += 1;
            dense[label] = count;
        }
    }

    for px in mask.iter_mut() {
        if *px > 0 {
            let root = sets.find(*px as usize);
            *px = dense[root];
        }
    }

    count as usize
}

#[inline]
fn label_at(mask: &[u32], width: usize, x: i64, y: i64) -> u32 {
    if x < 0 || y < 0 || x as usize >= width {
        return 0;
    }
    mask.get(y as usize * width + x as usize).copied().unwrap_or(0)
}

// Rotate clockwise from `dir` until a pixel of `label` is found, trying at
// most seven directions. Moves `point` there and returns the direction taken
// (or the exhausted direction when nothing was found).
fn next_boundary_point(
    mask: &[u32],
    width: usize,
    label: u32,
    point: &mut (i64, i64),
    mut dir: usize,
) -> usize {
    for _ in 0..7 {
        let (dx, dy) = DIRECTIONS[dir];
        let (x, y) = (point.0 + dx, point.1 + dy);
        if label_at(mask, width, x, y) == label {
            *point = (x, y);
            break;
        }
        dir = (dir + 1) % 8;
    }
    dir
}

/// Moore-neighbour trace of the outer boundary of `label`, starting from
/// `start`, which must be the label's first pixel in raster order.
///
/// The returned list begins and ends at `start` for any region larger than
/// one pixel; an isolated pixel yields just `[start]`.
pub fn boundary_pixels(mask: &[u32], width: usize, start: (usize, usize), label: u32) -> Vec<(usize, usize)> {
    let start = (start.0 as i64, start.1 as i64);
    let mut point = start;
    let mut boundary = vec![start];

    let mut dir = next_boundary_point(mask, width, label, &mut point, 0);
    let second = point;
    let mut done = point == start;

    while !done {
        boundary.push(point);
        let previous = point;
        dir = (dir + 5) % 8;
        dir = next_boundary_point(mask, width, label, &mut point, dir);
        done = previous == start && point == second;
    }

    boundary
        .into_iter()
        .map(|(x, y)| (x as usize, y as usize))
        .collect()
}

/// Perimeter length of every label `1..=max_label`.
///
/// Entry `label - 1` holds the summed Euclidean step length of the label's
/// Moore boundary trace; labels that do not occur, and isolated single pixels,
/// get 0.
pub fn trace_perimeters(mask: &[u32], width: usize, max_label: usize) -> Vec<f64> {
    let mut starts: Vec<Option<(usize, usize)>> = vec![None; max_label];
    for (k, &px) in mask.iter().enumerate() {
        let label = px as usize;
        if label > 0 && label <= max_label && starts[label - 1].is_none() {
            starts[label - 1] = Some((k % width, k / width));
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(idx, start)| match start {
            Some(start) => path_length(&boundary_pixels(mask, width, *start, (idx + 1) as u32)),
            None => 0.0,
        })
        .collect()
}

fn path_length(points: &[(usize, usize)]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let dx = w[1].0 as f64 - w[0].0 as f64;
            let dy = w[1].1 as f64 - w[0].1 as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}
