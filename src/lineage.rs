//! Lineage aggregates over a tracked sequence.
//!
//! Everything here is derived from the object lists the frames keep after
//! their pixel buffers are released. Frame numbers are the `index` values the
//! frames were pushed with.

use std::collections::BTreeMap;

use crate::frame::Frame;
use crate::tracker::TrackerConfig;

/// A mother cell and the daughters it divided into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivisionEvent {
    /// Frame in which the daughters first appear.
    pub frame: usize,
    pub mother: u32,
    pub daughters: Vec<u32>,
}

/// A fused cell and the cells it absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionEvent {
    /// Frame in which the fused cell first appears.
    pub frame: usize,
    pub fused: u32,
    pub parents: Vec<u32>,
}

/// First frame in which each global label appears.
pub fn birth_frames(frames: &[Frame]) -> BTreeMap<u32, usize> {
    let mut births = BTreeMap::new();
    for frame in frames {
        for object in frame.objects() {
            births.entry(object.global_label).or_insert(frame.index());
        }
    }
    births
}

/// Last frame in which each global label appears.
pub fn death_frames(frames: &[Frame]) -> BTreeMap<u32, usize> {
    let mut deaths = BTreeMap::new();
    for frame in frames {
        for object in frame.objects() {
            deaths.insert(object.global_label, frame.index());
        }
    }
    deaths
}

/// Every recorded division, ordered by mother label.
///
/// A mother's daughters are looked up in the frame after its last
/// appearance; mothers alive in the final frame never divided.
pub fn division_events(frames: &[Frame]) -> Vec<DivisionEvent> {
    let mut last_seen: BTreeMap<u32, usize> = BTreeMap::new();
    for (position, frame) in frames.iter().enumerate() {
        for object in frame.objects() {
            last_seen.insert(object.global_label, position);
        }
    }

    let mut events = Vec::new();
    for (&mother, &position) in &last_seen {
        let Some(next) = frames.get(position + 1) else {
            continue;
        };
        let (Some(object), Some(pairing)) = (
            frames[position].object_by_global_label(mother),
            next.pairing(),
        ) else {
            continue;
        };
        let local = object.local_label as f64;

        let daughters: Vec<u32> = (1..=pairing.division.length())
            .filter(|&d| pairing.division.at(d) == local)
            .filter_map(|d| next.object_by_local_label(d as u32))
            .map(|o| o.global_label)
            .collect();
        if !daughters.is_empty() {
            events.push(DivisionEvent {
                frame: next.index(),
                mother,
                daughters,
            });
        }
    }
    events
}

/// Every recorded fusion, in frame order.
///
/// Fusions are only kept as events when `enable_fusion` is set; otherwise
/// fused objects were cut apart and no fused cell exists.
pub fn fusion_events(frames: &[Frame], config: &TrackerConfig) -> Vec<FusionEvent> {
    if !config.enable_fusion {
        return Vec::new();
    }

    let mut events = Vec::new();
    for pair in frames.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        let Some(pairing) = current.pairing() else {
            continue;
        };
        let fusion = &pairing.fusion;
        for child in 1..=fusion.cols() {
            let parents: Vec<u32> = (1..=fusion.rows())
                .filter(|&parent| fusion.get(parent, child) > 0.0)
                .filter_map(|parent| previous.object_by_local_label(parent as u32))
                .map(|o| o.global_label)
                .collect();
            if parents.is_empty() {
                continue;
            }
            if let Some(fused) = current.object_by_local_label(child as u32) {
                events.push(FusionEvent {
                    frame: current.index(),
                    fused: fused.global_label,
                    parents,
                });
            }
        }
    }
    events
}

/// Whether each global label ever lay within the border margin.
pub fn border_flags(frames: &[Frame]) -> BTreeMap<u32, bool> {
    let mut flags = BTreeMap::new();
    for frame in frames {
        for object in frame.objects() {
            *flags.entry(object.global_label).or_insert(false) |= object.is_border;
        }
    }
    flags
}

/// Confidence in `[0, 1]` that each global label is a well tracked cell.
///
/// The score is `(1 + border + density + lifespan) / 4`: `border` is 1 for
/// cells never on the border, `density` is `1 / (mean touching count + 1)`,
/// `lifespan` is 1 for cells living longer than `min_cell_life` frames.
/// A term whose `*_affects_confidence` switch is off scores its maximum.
pub fn confidence_index(frames: &[Frame], config: &TrackerConfig) -> BTreeMap<u32, f64> {
    let births = birth_frames(frames);
    let deaths = death_frames(frames);
    let border = border_flags(frames);

    let mut touching: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for frame in frames {
        for object in frame.objects() {
            let entry = touching.entry(object.global_label).or_insert((0, 0));
            entry.0 += object.touching.len();
            entry.1 += 1;
        }
    }

    let mut confidence = BTreeMap::new();
    for (&label, &birth) in &births {
        let death = deaths.get(&label).copied().unwrap_or(birth);
        let lifespan = death.saturating_sub(birth) + 1;

        let mut score = 1.0;
        if !config.border_affects_confidence || !border.get(&label).copied().unwrap_or(false) {
            score += 1.0;
        }
        score += match touching.get(&label) {
            Some(&(total, count)) if config.cell_density_affects_confidence && count > 0 => {
                1.0 / (total as f64 / count as f64 + 1.0)
            }
            _ => 1.0,
        };
        if lifespan > config.min_cell_life {
            score += 1.0;
        }
        confidence.insert(label, score / 4.0);
    }
    confidence
}

/// All lineage aggregates of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageSummary {
    pub births: BTreeMap<u32, usize>,
    pub deaths: BTreeMap<u32, usize>,
    pub divisions: Vec<DivisionEvent>,
    pub fusions: Vec<FusionEvent>,
    pub border: BTreeMap<u32, bool>,
    pub confidence: BTreeMap<u32, f64>,
}

impl LineageSummary {
    pub fn from_frames(frames: &[Frame], config: &TrackerConfig) -> Self {
        Self {
            births: birth_frames(frames),
            deaths: death_frames(frames),
            divisions: division_events(frames),
            fusions: fusion_events(frames, config),
            border: border_flags(frames),
            confidence: confidence_index(frames, config),
        }
    }

    /// Global labels seen anywhere in the run, ascending.
    pub fn labels(&self) -> impl Iterator<Item = u32> + '_ {
        self.births.keys().copied()
    }
}
