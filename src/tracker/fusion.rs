//! Fusion detection and resolution.
//!
//! Two or more previous objects tracked onto the same current object form a
//! fusion. With fusion enabled the merged object is kept and treated as newly
//! born. Otherwise it is cut back into one region per parent, each cut region
//! is checked for connectivity, and regions left too small are dissolved into
//! their neighbours.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::fill::fill_nearest_label;
use crate::frame::{Frame, FramePairing};
use crate::label_image::{BoundingBox, LabelImage};
use crate::labeling::label_components;
use crate::matrix::Matrix;
use crate::track_vector::{Track, TrackVector};
use crate::tracker::TrackerConfig;
use crate::Result;

/// Detect fusions and, with fusion disabled, cut the fused objects apart.
///
/// # Returns
/// `true` if the pixels of `current` were rewritten, in which case the
/// overlap and cost matrices are stale and must be recomputed.
pub(crate) fn check_fusion(
    config: &TrackerConfig,
    previous: &Frame,
    current: &mut Frame,
    pairing: &mut FramePairing,
) -> Result<bool> {
    pairing.fusion = Matrix::zeros(pairing.overlap.rows(), pairing.overlap.cols());
    if !populate_fusion(config, previous, pairing) {
        return Ok(false);
    }

    let n_cur = pairing.fusion.cols();
    relabel_fusion(
        &mut pairing.fusion,
        &mut pairing.track_vector,
        n_cur as u32,
        config.enable_fusion,
    );
    if config.enable_fusion {
        return Ok(false);
    }

    let boxes = current.bounding_boxes()?;
    let prev_image = previous.label_image()?;
    let cur_image = current.label_image_mut()?;
    for target in 1..=n_cur {
        if participants(&pairing.fusion, target) < 2 {
            continue;
        }
        if let Some(Some(region)) = boxes.get(target) {
            cut_fused_object(prev_image, cur_image, &pairing.fusion, target, region);
        }
    }

    let fused_labels = fusion_labels(&pairing.fusion);
    check_body_connectivity(cur_image, &fused_labels)?;
    enforce_min_object_size(config, cur_image, pairing);

    current.process()?;
    Ok(true)
}

/// Number of nonzero entries in column `j`.
fn participants(fusion: &Matrix, j: usize) -> usize {
    (1..=fusion.rows()).filter(|&i| fusion.get(i, j) != 0.0).count()
}

/// Distinct positive labels stored in the fusion matrix, ascending.
fn fusion_labels(fusion: &Matrix) -> Vec<u32> {
    let labels: BTreeSet<u32> = fusion
        .iter_nonzero()
        .filter(|&(_, _, v)| v > 0.0)
        .map(|(_, _, v)| v as u32)
        .collect();
    labels.into_iter().collect()
}

fn clear_single_entry_columns(fusion: &mut Matrix) {
    for j in 1..=fusion.cols() {
        if participants(fusion, j) == 1 {
            fusion.fill_col(j, 0.0);
        }
    }
}

/// Mark every previous object whose track shares its target with another.
///
/// Parents covering too little of their own area are cut loose (unassigned)
/// instead. Returns whether any fusion remains.
fn populate_fusion(config: &TrackerConfig, previous: &Frame, pairing: &mut FramePairing) -> bool {
    let n_cur = pairing.fusion.cols();
    for (i, track) in pairing.track_vector.iter() {
        if let Some(t) = track.target() {
            if (t as usize) <= n_cur {
                pairing.fusion.set(i, t as usize, 1.0);
            }
        }
    }

    let counts = pairing.fusion.sum_cols();
    for i in 1..=pairing.fusion.rows() {
        let Some(t) = pairing.track_vector.get(i).target() else {
            continue;
        };
        let t = t as usize;
        if t > n_cur {
            continue;
        }
        if counts.at(t) < 2.0 {
            pairing.fusion.set(i, t, 0.0);
            continue;
        }
        let Some(parent) = previous.object_by_local_label(i as u32) else {
            continue;
        };
        if pairing.overlap.get(i, t) / (parent.area as f64) < config.fusion_overlap_threshold {
            pairing.fusion.set(i, t, 0.0);
            pairing.track_vector.set(i, Track::Unassigned);
        }
    }

    clear_single_entry_columns(&mut pairing.fusion);
    (1..=n_cur).any(|j| participants(&pairing.fusion, j) >= 2)
}

/// Give every parent of a fused object the label its share will carry.
///
/// The first parent keeps the target's own label. With fusion enabled all
/// parents share it and their tracks end; otherwise the other parents get
/// fresh labels above `highest_label` and are tracked to them.
fn relabel_fusion(
    fusion: &mut Matrix,
    track_vector: &mut TrackVector,
    highest_label: u32,
    enable_fusion: bool,
) {
    let mut next = highest_label;
    for j in 1..=fusion.cols() {
        if participants(fusion, j) < 2 {
            continue;
        }
        let mut first = true;
        for i in 1..=fusion.rows() {
            if fusion.get(i, j) == 0.0 {
                continue;
            }
            if enable_fusion {
                track_vector.set(i, Track::Dead);
            }
            if first || enable_fusion {
                fusion.set(i, j, j as f64);
                first = false;
            } else {
                next += 1;
                fusion.set(i, j, next as f64);
                track_vector.set(i, Track::To(next));
            }
        }
        debug!(
            target_label = j,
            parents = participants(fusion, j),
            "fusion detected"
        );
    }
}

/// Value the fusion matrix assigns to `parent` within `target`, 0 if none.
fn share_of(fusion: &Matrix, parent: u32, target: usize) -> f64 {
    let parent = parent as usize;
    if parent == 0 || parent > fusion.rows() {
        return 0.0;
    }
    fusion.get(parent, target)
}

/// Reassign each pixel of `target` to the share of the parent it overlaps,
/// or of the dominant parent in the nearest ring that contains one.
fn cut_fused_object(
    previous: &LabelImage,
    current: &mut LabelImage,
    fusion: &Matrix,
    target: usize,
    region: &BoundingBox,
) {
    let width = previous.width().min(current.width());
    let height = previous.height().min(current.height());
    let fallback = (1..=fusion.rows())
        .find(|&i| fusion.get(i, target) > 0.0)
        .map_or(0.0, |i| fusion.get(i, target));

    for y in region.y_min..=region.y_max {
        for x in region.x_min..=region.x_max {
            if current.get(x, y) as usize != target {
                continue;
            }
            let direct = if x < previous.width() && y < previous.height() {
                previous.get(x, y)
            } else {
                0
            };
            let share = share_of(fusion, direct, target);
            let label = if direct > 0 && share > 0.0 {
                share
            } else {
                match dominant_parent(previous, fusion, target, x, y, width, height) {
                    Some(parent) => fusion.get(parent, target),
                    None => {
                        warn!(x, y, target_label = target, "no fusion parent found around pixel");
                        fallback
                    }
                }
            };
            current.set(x, y, label as u32);
        }
    }
}

/// Most frequent fusion parent on the closest square ring around `(x, y)`.
fn dominant_parent(
    previous: &LabelImage,
    fusion: &Matrix,
    target: usize,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
) -> Option<usize> {
    let mut counts = vec![0usize; fusion.rows() + 1];
    let mut found = false;
    let mut distance = 1;

    loop {
        let x_min = x.saturating_sub(distance);
        let y_min = y.saturating_sub(distance);
        let x_max = (x + distance).min(width - 1);
        let y_max = (y + distance).min(height - 1);

        if x_min <= x_max && y_min <= y_max {
            let mut tally = |px: usize, py: usize| {
                let parent = previous.get(px, py);
                if share_of(fusion, parent, target) > 0.0 {
                    counts[parent as usize] += 1;
                    found = true;
                }
            };
            for k in y_min..=y_max {
                tally(x_min, k);
                tally(x_max, k);
            }
            for k in x_min + 1..x_max {
                tally(k, y_min);
                tally(k, y_max);
            }
        }

        if found {
            break;
        }
        if x_min == 0 && y_min == 0 && x_max == width - 1 && y_max == height - 1 {
            return None;
        }
        distance += 1;
    }

    let mut best = 1;
    for parent in 2..counts.len() {
        if counts[parent] > counts[best] {
            best = parent;
        }
    }
    Some(best)
}

/// Split any label in `labels` that consists of several 8-connected bodies.
///
/// The largest body keeps the label; every other body takes the label it
/// shares the most 4-neighbour contacts with, or becomes background if it
/// touches nothing.
pub(crate) fn check_body_connectivity(image: &mut LabelImage, labels: &[u32]) -> Result<()> {
    if labels.is_empty() {
        return Ok(());
    }
    let highest = image.max_label() as usize;
    let boxes = image.bounding_boxes();

    for &cell in labels {
        let Some(Some(bounds)) = boxes.get(cell as usize) else {
            continue;
        };
        let region = bounds.expanded(1, image.width(), image.height());
        let original = image.sub_image(&region)?;
        let (sub_width, sub_height) = (region.width(), region.height());

        let mut bodies: Vec<u32> = original.iter().map(|&v| u32::from(v == cell)).collect();
        let count = label_components(&mut bodies, sub_width, sub_height);
        if count <= 1 {
            continue;
        }

        let mut sizes = vec![0usize; count + 1];
        for &b in &bodies {
            sizes[b as usize] += 1;
        }
        let mut winner = 1;
        for b in 2..=count {
            if sizes[b] > sizes[winner] {
                winner = b;
            }
        }

        // contacts[b][label]
        let mut contacts = vec![vec![0usize; highest + 1]; count + 1];
        for y in 1..sub_height.saturating_sub(1) {
            for x in 1..sub_width.saturating_sub(1) {
                let k = y * sub_width + x;
                let b = bodies[k] as usize;
                if b == 0 || b == winner {
                    continue;
                }
                for n in [k - 1, k - sub_width, k + 1, k + sub_width] {
                    let other = original[n];
                    if other > 0 && other != cell {
                        contacts[b][other as usize] += 1;
                    }
                }
            }
        }

        let mut renumber = vec![0u32; count + 1];
        for b in 1..=count {
            let mut best = 0;
            for label in 1..=highest {
                if contacts[b][label] > contacts[b][best] {
                    best = label;
                }
            }
            renumber[b] = best as u32;
        }
        renumber[winner] = cell;

        let rewritten: Vec<u32> = original
            .iter()
            .zip(&bodies)
            .map(|(&v, &b)| if b > 0 { renumber[b as usize] } else { v })
            .collect();
        image.overwrite_sub_image(&region, &rewritten)?;
        debug!(label = cell, bodies = count, "split disconnected label");
    }
    Ok(())
}

/// Dissolve fused objects smaller than `min_object_area` into their
/// neighbours and compact the labels.
///
/// Tracks, fusion values and the division vector are renumbered to match.
/// Returns whether anything was dissolved.
pub(crate) fn enforce_min_object_size(
    config: &TrackerConfig,
    image: &mut LabelImage,
    pairing: &mut FramePairing,
) -> bool {
    let sizes = image.object_sizes();
    let highest = sizes.len() - 1;

    let mut invalid = vec![false; highest + 1];
    for label in fusion_labels(&pairing.fusion) {
        let label = label as usize;
        if label <= highest && sizes[label] < config.min_object_area {
            invalid[label] = true;
        }
    }
    if !invalid.iter().any(|&v| v) {
        return false;
    }

    let mut mapping = vec![0u32; highest + 1];
    let mut next = 0u32;
    for label in 1..=highest {
        if !invalid[label] && sizes[label] > 0 {
            next += 1;
            mapping[label] = next;
        }
    }

    for i in 1..=pairing.track_vector.len() {
        let Track::To(t) = pairing.track_vector.get(i) else {
            continue;
        };
        let t = t as usize;
        if invalid.get(t).copied().unwrap_or(false) {
            pairing.track_vector.set(i, Track::Unassigned);
            pairing.fusion.fill_row(i, 0.0);
        } else {
            let renamed = mapping.get(t).copied().unwrap_or(0);
            let track = if renamed > 0 { Track::To(renamed) } else { Track::Unassigned };
            pairing.track_vector.set(i, track);
        }
    }

    clear_single_entry_columns(&mut pairing.fusion);
    for i in 1..=pairing.fusion.rows() {
        for j in 1..=pairing.fusion.cols() {
            let v = pairing.fusion.get(i, j);
            if v > 0.0 {
                let renamed = mapping.get(v as usize).copied().unwrap_or(0);
                pairing.fusion.set(i, j, renamed as f64);
            }
        }
    }

    let mut division = Matrix::zeros(pairing.division.length(), 1);
    for d in 1..=pairing.division.length() {
        let mother = pairing.division.at(d);
        let renamed = mapping.get(d).copied().unwrap_or(0) as usize;
        if mother > 0.0 && renamed > 0 && renamed <= division.length() {
            division.set_at(renamed, mother);
        }
    }
    pairing.division = division;

    let mask = image.pixels().to_vec();
    let dissolved = invalid.iter().filter(|&&v| v).count();
    image.relabel(&mapping);
    let (width, height) = (image.width(), image.height());
    fill_nearest_label(image.pixels_mut(), &mask, width, height);
    debug!(dissolved, remaining = next, "dissolved undersized fused objects");
    true
}
