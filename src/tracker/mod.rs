//! Frame-pair tracking engine.
//!
//! [`FrameTracker`] consumes label masks in time order. Each new frame is
//! paired with its predecessor: overlap and cost matrices are built, an
//! initial best-match track vector is taken, divisions and fusions are
//! resolved (possibly rewriting the new frame's pixels), the leftover objects
//! are matched by mutual nearest cost, and finally global labels are
//! propagated.

pub mod cost;
pub(crate) mod division;
pub(crate) mod fusion;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frame::{Frame, FramePairing, FrameState, DEFAULT_BORDER_MARGIN};
use crate::label_image::LabelImage;
use crate::lineage::LineageSummary;
use crate::matching::{assign_mutual_nearest, restrict_cost};
use crate::object::Object;
use crate::track_vector::{Track, TrackVector};
use crate::utils::any_true;
use crate::{Error, Result};

/// Configuration for a tracking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Weight of the overlap term of the cost.
    pub weight_overlap: f64,

    /// Weight of the centroid distance term of the cost.
    pub weight_centroid: f64,

    /// Weight of the size difference term of the cost.
    pub weight_size: f64,

    /// Centroid distance (pixels) beyond which non-overlapping objects are
    /// never matched. Also normalizes the centroid term.
    pub max_centroid_distance: f64,

    /// Lifespan (frames) a cell must exceed to gain lineage confidence.
    pub min_cell_life: usize,

    /// Centroid displacement (pixels) under which a cell is considered
    /// stationary.
    ///
    /// Accepted and validated so existing parameter files keep loading, but
    /// ignored: no tracking stage or lineage aggregate reads it.
    pub cell_death_delta_centroid: f64,

    /// Whether crowding lowers the confidence index.
    pub cell_density_affects_confidence: bool,

    /// Whether touching the image border lowers the confidence index.
    pub border_affects_confidence: bool,

    /// Minimum area similarity between two daughters.
    pub daughter_size_similarity: f64,

    /// Minimum fraction of a daughter (and of the mother, for all daughters
    /// together) that must be shared with the mother.
    pub division_overlap_threshold: f64,

    /// Minimum aspect ratio similarity between two daughters.
    pub daughter_aspect_ratio_similarity: f64,

    /// Circularity a mother must have exceeded shortly before dividing.
    pub mother_circularity_threshold: f64,

    /// Number of past frames searched for the mother's circularity.
    pub frames_to_check_circularity: usize,

    /// Record divisions; when false, detected daughters are merged back.
    pub enable_division: bool,

    /// Keep only the two lowest cost daughters of a mother.
    pub limit_division_to_two_daughters: bool,

    /// Objects produced by a fusion cut smaller than this (pixels) are
    /// dissolved into their neighbours.
    pub min_object_area: usize,

    /// Minimum fraction of a parent's area shared with the fused object.
    pub fusion_overlap_threshold: f64,

    /// Keep fused objects; when false they are cut back into their parents.
    pub enable_fusion: bool,

    /// Border distance (padded pixels) within which objects are border objects.
    pub border_margin: usize,
}

impl TrackerConfig {
    /// Create a configuration with the default parameters.
    pub fn new() -> Self {
        Self {
            weight_overlap: 1.0,
            weight_centroid: 0.5,
            weight_size: 0.2,
            max_centroid_distance: 50.0,
            min_cell_life: 32,
            cell_death_delta_centroid: 10.0,
            cell_density_affects_confidence: true,
            border_affects_confidence: true,
            daughter_size_similarity: 0.5,
            division_overlap_threshold: 0.2,
            daughter_aspect_ratio_similarity: 0.7,
            mother_circularity_threshold: 0.3,
            frames_to_check_circularity: 5,
            enable_division: true,
            limit_division_to_two_daughters: true,
            min_object_area: 100,
            fusion_overlap_threshold: 0.2,
            enable_fusion: false,
            border_margin: DEFAULT_BORDER_MARGIN,
        }
    }

    /// Check every parameter range.
    ///
    /// # Errors
    /// `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("weight_overlap", self.weight_overlap),
            ("weight_centroid", self.weight_centroid),
            ("weight_size", self.weight_size),
            ("daughter_size_similarity", self.daughter_size_similarity),
            ("division_overlap_threshold", self.division_overlap_threshold),
            ("daughter_aspect_ratio_similarity", self.daughter_aspect_ratio_similarity),
            ("mother_circularity_threshold", self.mother_circularity_threshold),
            ("fusion_overlap_threshold", self.fusion_overlap_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }

        let distances = [
            ("max_centroid_distance", self.max_centroid_distance),
            ("cell_death_delta_centroid", self.cell_death_delta_centroid),
        ];
        for (name, value) in distances {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation signal shared with the thread driving a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One label mask to be tracked.
#[derive(Debug, Clone)]
pub struct FrameInput {
    pub index: usize,
    pub title: String,
    pub image: LabelImage,
}

impl FrameInput {
    /// Wrap an unpadded row-major label mask.
    pub fn new(
        index: usize,
        title: impl Into<String>,
        width: usize,
        height: usize,
        labels: &[u32],
    ) -> Result<Self> {
        Ok(Self {
            index,
            title: title.into(),
            image: LabelImage::from_unpadded(width, height, labels)?,
        })
    }
}

/// Finished frame: the mask rewritten to global labels, and its objects.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFrame {
    pub index: usize,
    pub title: String,
    /// Unpadded width.
    pub width: usize,
    /// Unpadded height.
    pub height: usize,
    /// Row-major global labels, 0 for background.
    pub labels: Vec<u32>,
    pub objects: Vec<Object>,
}

impl TrackedFrame {
    /// Global label at unpadded position `(x, y)`.
    pub fn label_at(&self, x: usize, y: usize) -> u32 {
        self.labels[y * self.width + x]
    }
}

/// Sequential tracker owning every frame of a run.
///
/// Pixel buffers are released as soon as a frame's successor has been
/// tracked; objects and pairing results stay for lineage queries.
#[derive(Debug)]
pub struct FrameTracker {
    config: TrackerConfig,
    frames: Vec<Frame>,
    highest_global_label: u32,
}

impl FrameTracker {
    /// Create a tracker after validating `config`.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            frames: Vec::new(),
            highest_global_label: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Every frame pushed so far, in time order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Highest global label handed out so far.
    pub fn highest_global_label(&self) -> u32 {
        self.highest_global_label
    }

    /// Track the next frame of the sequence.
    ///
    /// # Returns
    /// The finished predecessor, which no later frame can change any more.
    /// `None` for the first frame.
    ///
    /// # Errors
    /// Any error leaves the tracker as it was before the call.
    pub fn push_frame(
        &mut self,
        index: usize,
        title: impl Into<String>,
        image: LabelImage,
    ) -> Result<Option<TrackedFrame>> {
        let mut frame = Frame::with_image(index, title, image);
        frame.set_border_margin(self.config.border_margin);
        self.frames.push(frame);

        if let Err(e) = self.track_last() {
            self.frames.pop();
            return Err(e);
        }

        let count = self.frames.len();
        if count < 2 {
            return Ok(None);
        }
        self.finalize(count - 2).map(Some)
    }

    /// Finish the last frame of the sequence.
    pub fn finish(&mut self) -> Result<Option<TrackedFrame>> {
        match self.frames.last() {
            Some(frame) if frame.state() == FrameState::Tracked => {
                self.finalize(self.frames.len() - 1).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Track a whole sequence.
    ///
    /// `cancel` is polled before each frame; once set the run stops with
    /// `Error::Cancelled` and the pending frame is not tracked.
    pub fn run<I>(&mut self, inputs: I, cancel: &CancellationFlag) -> Result<Vec<TrackedFrame>>
    where
        I: IntoIterator<Item = FrameInput>,
    {
        let mut outputs = Vec::new();
        for input in inputs {
            if cancel.is_cancelled() {
                warn!(frame = input.index, "tracking cancelled");
                return Err(Error::Cancelled { frame: input.index });
            }
            if let Some(done) = self.push_frame(input.index, input.title, input.image)? {
                outputs.push(done);
            }
        }
        if let Some(done) = self.finish()? {
            outputs.push(done);
        }
        Ok(outputs)
    }

    /// Birth, death, division, fusion and confidence data over the frames
    /// tracked so far.
    pub fn lineage(&self) -> LineageSummary {
        LineageSummary::from_frames(&self.frames, &self.config)
    }

    fn track_last(&mut self) -> Result<()> {
        let position = self.frames.len() - 1;
        let (history, rest) = self.frames.split_at_mut(position);
        let current = &mut rest[0];
        current.process()?;

        let Some(previous) = history.last() else {
            let mut next = self.highest_global_label;
            for object in current.objects_mut() {
                next += 1;
                object.global_label = next;
            }
            current.advance(FrameState::Tracked)?;
            self.highest_global_label = next;
            info!(
                frame = current.index(),
                objects = current.objects().len(),
                highest_label = next,
                "tracked first frame"
            );
            return Ok(());
        };
        previous.require(FrameState::Processed)?;

        let config = &self.config;
        let (overlap, cost) = cost::pair_matrices(config, previous, current)?;
        let track_vector = TrackVector::from_row_min(&cost.row_min());
        let mut pairing = FramePairing::new(overlap, cost, track_vector);

        if division::check_division(config, history, current, &mut pairing)? {
            let (overlap, cost) = cost::pair_matrices(config, previous, current)?;
            pairing.overlap = overlap;
            pairing.cost = cost;
        }
        if fusion::check_fusion(config, previous, current, &mut pairing)? {
            let (overlap, cost) = cost::pair_matrices(config, previous, current)?;
            pairing.overlap = overlap;
            pairing.cost = cost;
        }

        let assigned = assign_residual(&mut pairing);
        debug!(frame = current.index(), assigned, "residual assignment");

        let mut highest = self.highest_global_label;
        commit(previous, current, &pairing.track_vector, &mut highest)?;
        current.set_pairing(pairing);
        self.highest_global_label = highest;

        info!(
            frame = current.index(),
            objects = current.objects().len(),
            highest_label = highest,
            "tracked frame"
        );
        Ok(())
    }

    /// Relabel frame `position` to global labels, hand it out and release
    /// its pixel buffer.
    fn finalize(&mut self, position: usize) -> Result<TrackedFrame> {
        let frame = &mut self.frames[position];
        frame.apply_global_labels()?;
        let labels = frame.labels()?;
        let (width, height) = frame
            .image()
            .map_or((0, 0), |image| (image.width() - 2, image.height() - 2));
        frame.mark_written()?;

        let done = TrackedFrame {
            index: frame.index(),
            title: frame.title().to_string(),
            width,
            height,
            labels,
            objects: frame.objects().to_vec(),
        };
        frame.release()?;
        Ok(done)
    }
}

/// Match the previous objects still unassigned to current objects nobody
/// claimed yet.
///
/// Daughters and fusion shares are excluded on both sides.
///
/// # Returns
/// The number of tracks assigned.
fn assign_residual(pairing: &mut FramePairing) -> usize {
    let (n_prev, n_cur) = (pairing.cost.rows(), pairing.cost.cols());

    let mut targets = vec![true; n_cur];
    for (_, track) in pairing.track_vector.iter() {
        if let Some(t) = track.target() {
            if let Some(slot) = targets.get_mut(t as usize - 1) {
                *slot = false;
            }
        }
    }
    for d in 1..=pairing.division.length().min(n_cur) {
        if pairing.division.at(d) > 0.0 {
            targets[d - 1] = false;
        }
    }
    for (_, _, value) in pairing.fusion.iter_nonzero() {
        let label = value as usize;
        if value > 0.0 && label >= 1 && label <= n_cur {
            targets[label - 1] = false;
        }
    }
    if !any_true(&targets) {
        return 0;
    }

    let mut sources: Vec<bool> = (1..=n_prev)
        .map(|i| pairing.track_vector.get(i).is_unassigned())
        .collect();
    for (i, _, value) in pairing.fusion.iter_nonzero() {
        if value > 0.0 && i <= n_prev {
            sources[i - 1] = false;
        }
    }
    if !any_true(&sources) {
        return 0;
    }

    let mut local = restrict_cost(&pairing.cost, &sources, &targets);
    let matches = assign_mutual_nearest(&mut local);
    for &(i, j) in &matches {
        pairing.track_vector.set(i, Track::To(j as u32));
    }
    matches.len()
}

/// Propagate global labels along the track vector and number the rest.
fn commit(
    previous: &Frame,
    current: &mut Frame,
    track_vector: &TrackVector,
    highest: &mut u32,
) -> Result<()> {
    for parent in previous.objects() {
        let Some(target) = track_vector.get(parent.local_label as usize).target() else {
            continue;
        };
        if let Some(child) = current
            .objects_mut()
            .iter_mut()
            .find(|o| o.local_label == target)
        {
            child.global_label = parent.global_label;
        }
    }

    for object in current.objects_mut() {
        if object.global_label == 0 {
            *highest += 1;
            object.global_label = *highest;
        }
    }
    current.advance(FrameState::Tracked)
}
