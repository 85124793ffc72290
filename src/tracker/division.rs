//! Mitosis detection between a frame and its predecessor.
//!
//! A previous object chosen as best match by two or more current objects is a
//! candidate mother. Its candidate daughters are validated on overlap, the
//! mother's recent circularity and the similarity of the daughters to each
//! other. Accepted daughters are recorded in the pairing's `division` vector
//! and the mother's track is ended.
//!
//! With division disabled the same detection runs with the similarity gates
//! relaxed, and every detected daughter group is merged back into one label.

use std::collections::BTreeSet;

use tracing::debug;

use crate::frame::{Frame, FramePairing};
use crate::matrix::Matrix;
use crate::track_vector::Track;
use crate::tracker::TrackerConfig;
use crate::utils::similarity;
use crate::Result;

/// Detect divisions and record them in `pairing`.
///
/// `history` holds every frame before `current`, the last one being the
/// frame `pairing` relates to.
///
/// # Returns
/// `true` if the pixels of `current` were rewritten, in which case the
/// overlap and cost matrices are stale and must be recomputed.
pub(crate) fn check_division(
    config: &TrackerConfig,
    history: &[Frame],
    current: &mut Frame,
    pairing: &mut FramePairing,
) -> Result<bool> {
    let Some(previous) = history.last() else {
        return Ok(false);
    };

    let col_min = pairing.cost.col_min();
    let mut selections = vec![0usize; pairing.cost.rows() + 1];
    for j in 1..=col_min.len() {
        if let Some(i) = col_min.index(j) {
            selections[i] += 1;
        }
    }
    let mothers: Vec<usize> = (1..selections.len()).filter(|&i| selections[i] > 1).collect();
    if mothers.is_empty() {
        return Ok(false);
    }

    if !current.is_aspect_ratio_ready() {
        current.compute_aspect_ratio()?;
    }

    let mut found_mothers = BTreeSet::new();
    for mother_label in mothers {
        let Some(mother) = previous.object_by_local_label(mother_label as u32) else {
            continue;
        };

        let mut daughters: Vec<usize> = (1..=col_min.len())
            .filter(|&d| col_min.index(d) == Some(mother_label))
            .filter(|&d| match current.object_by_local_label(d as u32) {
                Some(daughter) => {
                    pairing.overlap.get(mother_label, d) / daughter.area as f64
                        > config.division_overlap_threshold
                }
                None => false,
            })
            .collect();

        // a daughter already continuing another overlapping track is not a daughter
        daughters.retain(|&d| {
            !pairing.track_vector.iter().any(|(i, track)| {
                i != mother_label
                    && track == Track::To(d as u32)
                    && pairing.overlap.get(i, d) > 0.0
            })
        });
        if daughters.len() <= 1 {
            continue;
        }

        if config.enable_division && config.limit_division_to_two_daughters && daughters.len() > 2 {
            let Some(first) = lowest_cost(&pairing.cost, mother_label, &daughters, None) else {
                continue;
            };
            let Some(second) = lowest_cost(&pairing.cost, mother_label, &daughters, Some(first))
            else {
                continue;
            };
            daughters = vec![first, second];
        }

        let shared: f64 = daughters
            .iter()
            .map(|&d| pairing.overlap.get(mother_label, d))
            .sum();
        if shared / mother.area as f64 <= config.division_overlap_threshold {
            continue;
        }

        if config.enable_division && !was_circular(config, history, mother.global_label) {
            continue;
        }

        for a in 0..daughters.len() {
            for b in a + 1..daughters.len() {
                let (d1, d2) = (daughters[a], daughters[b]);
                let (Some(o1), Some(o2)) = (
                    current.object_by_local_label(d1 as u32),
                    current.object_by_local_label(d2 as u32),
                ) else {
                    continue;
                };
                let similar = similarity(o1.area as f64, o2.area as f64)
                    > config.daughter_size_similarity
                    && similarity(o1.aspect_ratio, o2.aspect_ratio)
                        > config.daughter_aspect_ratio_similarity;
                if config.enable_division && !similar {
                    continue;
                }

                found_mothers.insert(mother_label);
                pairing.division.set_at(d1, mother_label as f64);
                pairing.division.set_at(d2, mother_label as f64);
                pairing.track_vector.set(mother_label, Track::Dead);
                pairing.track_vector.release_target(d1 as u32);
                pairing.track_vector.release_target(d2 as u32);
                debug!(
                    frame = current.index(),
                    mother = mother_label,
                    daughters = ?(d1, d2),
                    "division detected"
                );
            }
        }
    }

    if config.enable_division || pairing.division.nonzero_count() == 0 {
        return Ok(false);
    }

    merge_daughters(current, pairing, &found_mothers)?;
    Ok(true)
}

/// Daughter with the strictly lowest cost to `mother`, skipping `exclude`.
fn lowest_cost(
    cost: &Matrix,
    mother: usize,
    daughters: &[usize],
    exclude: Option<usize>,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &d in daughters {
        if Some(d) == exclude {
            continue;
        }
        let value = cost.get(mother, d);
        if best.map_or(!value.is_nan(), |(_, v)| value < v) {
            best = Some((d, value));
        }
    }
    best.map(|(d, _)| d)
}

/// Whether the object with `global_label` exceeded the circularity threshold
/// in any of the last `frames_to_check_circularity` frames.
///
/// Vacuously true while the window reaches before the start of the sequence.
fn was_circular(config: &TrackerConfig, history: &[Frame], global_label: u32) -> bool {
    let position = history.len();
    if position <= config.frames_to_check_circularity {
        return true;
    }
    let end = position - config.frames_to_check_circularity;
    for frame in history[end..].iter().rev() {
        let Some(object) = frame.object_by_global_label(global_label) else {
            break;
        };
        if object.circularity > config.mother_circularity_threshold {
            return true;
        }
    }
    false
}

/// Fold every daughter of each found mother into the mother's first daughter
/// and compact the labels.
fn merge_daughters(
    current: &mut Frame,
    pairing: &mut FramePairing,
    found_mothers: &BTreeSet<usize>,
) -> Result<()> {
    let n = pairing.division.length();
    let mut renumber: Vec<u32> = (0..=n as u32).collect();

    for &mother in found_mothers {
        let mut first: Option<u32> = None;
        for d in 1..=n {
            if pairing.division.at(d) != mother as f64 {
                continue;
            }
            let daughter = d as u32;
            pairing.track_vector.release_target(daughter);
            match first {
                None => {
                    pairing.track_vector.set(mother, Track::To(daughter));
                    first = Some(daughter);
                }
                Some(kept) => renumber[d] = kept,
            }
        }
    }

    let mut distinct: Vec<u32> = renumber[1..].to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    let mut mapping = vec![0u32; n + 1];
    for d in 1..=n {
        if let Ok(rank) = distinct.binary_search(&renumber[d]) {
            mapping[d] = rank as u32 + 1;
        }
    }

    pairing.track_vector.remap_targets(&mapping);
    current.label_image_mut()?.relabel(&mapping);
    debug!(
        frame = current.index(),
        merged = n - distinct.len(),
        "merged daughters with division disabled"
    );
    current.process()?;
    pairing.division = Matrix::zeros(current.max_local_label() as usize, 1);
    Ok(())
}
