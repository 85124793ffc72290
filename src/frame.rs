//! One time step of the sequence: label buffer, derived objects and the
//! matrices relating it to the previous frame.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::label_image::{BoundingBox, LabelImage};
use crate::labeling::trace_perimeters;
use crate::matrix::Matrix;
use crate::object::Object;
use crate::track_vector::TrackVector;
use crate::{Error, Result};

/// Distance (in padded pixels) from the image edge within which an object
/// counts as a border object.
pub const DEFAULT_BORDER_MARGIN: usize = 2;

/// Lifecycle of a frame. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameState {
    Init,
    Read,
    Processed,
    Tracked,
    Written,
    Released,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameState::Init => "init",
            FrameState::Read => "read",
            FrameState::Processed => "processed",
            FrameState::Tracked => "tracked",
            FrameState::Written => "written",
            FrameState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Matrices relating a frame to its predecessor.
///
/// Rows are previous-frame local labels, columns current-frame local labels.
/// `overlap` and `cost` are replaced wholesale whenever the current frame's
/// pixels are rewritten.
#[derive(Debug, Clone)]
pub struct FramePairing {
    /// Shared pixel counts, `n_prev x n_cur`.
    pub overlap: Matrix,
    /// Matching cost, `NaN` where no candidate edge exists.
    pub cost: Matrix,
    /// `n_cur x 1`: mother's previous local label for each daughter, else 0.
    pub division: Matrix,
    /// `n_prev x n_cur`: nonzero where a previous object merged into a
    /// current one; the value is the label assigned to that parent's share.
    pub fusion: Matrix,
    pub track_vector: TrackVector,
}

impl FramePairing {
    pub(crate) fn new(overlap: Matrix, cost: Matrix, track_vector: TrackVector) -> Self {
        let n_cur = overlap.cols();
        let n_prev = overlap.rows();
        Self {
            overlap,
            cost,
            division: Matrix::zeros(n_cur, 1),
            fusion: Matrix::zeros(n_prev, n_cur),
            track_vector,
        }
    }
}

/// A frame and everything derived from its label buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    title: String,
    state: FrameState,
    image: Option<LabelImage>,
    objects: Vec<Object>,
    border_margin: usize,
    aspect_ratios_requested: bool,
    pairing: Option<FramePairing>,
}

impl Frame {
    /// Create an empty frame in the `Init` state.
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            state: FrameState::Init,
            image: None,
            objects: Vec::new(),
            border_margin: DEFAULT_BORDER_MARGIN,
            aspect_ratios_requested: false,
            pairing: None,
        }
    }

    /// Create a frame already holding its label buffer (`Read` state).
    pub fn with_image(index: usize, title: impl Into<String>, image: LabelImage) -> Self {
        let mut frame = Self::new(index, title);
        frame.image = Some(image);
        frame.state = FrameState::Read;
        frame
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn border_margin(&self) -> usize {
        self.border_margin
    }

    pub fn set_border_margin(&mut self, margin: usize) {
        self.border_margin = margin;
    }

    /// Label buffer, `None` before reading and after release.
    pub fn image(&self) -> Option<&LabelImage> {
        self.image.as_ref()
    }

    /// Objects in ascending local label order.
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn pairing(&self) -> Option<&FramePairing> {
        self.pairing.as_ref()
    }

    pub(crate) fn set_pairing(&mut self, pairing: FramePairing) {
        self.pairing = Some(pairing);
    }

    pub(crate) fn objects_mut(&mut self) -> &mut [Object] {
        &mut self.objects
    }

    // ===== State machine =====

    /// Fail unless the frame has reached `required`.
    pub fn require(&self, required: FrameState) -> Result<()> {
        if self.state < required {
            return Err(Error::InvalidState {
                frame: self.index,
                required,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Move strictly forward to `to`.
    pub fn advance(&mut self, to: FrameState) -> Result<()> {
        if to <= self.state {
            return Err(Error::InvalidTransition {
                frame: self.index,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) fn label_image(&self) -> Result<&LabelImage> {
        self.image
            .as_ref()
            .ok_or(Error::ImageReleased { frame: self.index })
    }

    pub(crate) fn label_image_mut(&mut self) -> Result<&mut LabelImage> {
        let index = self.index;
        self.image.as_mut().ok_or(Error::ImageReleased { frame: index })
    }

    /// Load the label buffer (`Init -> Read`).
    pub fn read(&mut self, image: LabelImage) -> Result<()> {
        self.advance(FrameState::Read)?;
        self.image = Some(image);
        Ok(())
    }

    // ===== Feature extraction =====

    /// Derive the object list from the label buffer.
    ///
    /// Requires `Read`; may be repeated while the frame is `Processed` (after
    /// a pixel rewrite) but not once it is tracked. Aspect ratios are
    /// recomputed if they had been requested before.
    pub fn process(&mut self) -> Result<()> {
        self.require(FrameState::Read)?;
        if self.state > FrameState::Processed {
            return Err(Error::InvalidTransition {
                frame: self.index,
                from: self.state,
                to: FrameState::Processed,
            });
        }

        let margin = self.border_margin;
        let image = self.label_image()?;
        let (width, height) = (image.width(), image.height());
        let pixels = image.pixels();
        let max_label = image.max_label() as usize;

        let mut area = vec![0usize; max_label + 1];
        let mut sum_x = vec![0f64; max_label + 1];
        let mut sum_y = vec![0f64; max_label + 1];
        let mut border = vec![false; max_label + 1];
        let mut touching: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); max_label + 1];

        for y in 0..height {
            for x in 0..width {
                let k = y * width + x;
                let label = pixels[k];
                if label == 0 {
                    continue;
                }
                let l = label as usize;
                area[l] += 1;
                sum_x[l] += x as f64 - 1.0;
                sum_y[l] += y as f64 - 1.0;
                if x <= margin || x + margin + 1 >= width || y <= margin || y + margin + 1 >= height {
                    border[l] = true;
                }

                let neighbours = [
                    (x > 0).then(|| k - 1),
                    (x + 1 < width).then(|| k + 1),
                    (y > 0).then(|| k - width),
                    (y + 1 < height).then(|| k + width),
                ];
                for n in neighbours.into_iter().flatten() {
                    let other = pixels[n];
                    if other > 0 && other != label {
                        touching[l].insert(other);
                    }
                }
            }
        }

        let perimeters = trace_perimeters(pixels, width, max_label);

        let mut objects = Vec::new();
        for l in 1..=max_label {
            if area[l] == 0 {
                continue;
            }
            let a = area[l] as f64;
            let mut object = Object::new(l as u32, area[l], sum_x[l] / a, sum_y[l] / a);
            object.set_perimeter(perimeters[l - 1]);
            object.is_border = border[l];
            object.touching = std::mem::take(&mut touching[l]).into_iter().collect();
            objects.push(object);
        }

        debug!(frame = self.index, objects = objects.len(), "processed frame");
        self.objects = objects;
        if self.state == FrameState::Read {
            self.advance(FrameState::Processed)?;
        }
        if self.aspect_ratios_requested {
            self.compute_aspect_ratio()?;
        }
        Ok(())
    }

    /// Fill in `aspect_ratio` for every object from centered second moments.
    ///
    /// Processes the frame first if needed. Once requested, aspect ratios are
    /// recomputed automatically after every later `process()`.
    pub fn compute_aspect_ratio(&mut self) -> Result<()> {
        self.require(FrameState::Read)?;
        self.aspect_ratios_requested = true;
        if self.state < FrameState::Processed {
            return self.process();
        }

        let image = self.label_image()?;
        let width = image.width();
        let max_label = image.max_label() as usize;

        let mut centroid = vec![(0f64, 0f64); max_label + 1];
        for object in &self.objects {
            centroid[object.local_label as usize] = (object.centroid_x, object.centroid_y);
        }

        let mut m11 = vec![0f64; max_label + 1];
        let mut m20 = vec![0f64; max_label + 1];
        let mut m02 = vec![0f64; max_label + 1];
        for (k, &px) in image.pixels().iter().enumerate() {
            if px == 0 {
                continue;
            }
            let l = px as usize;
            let dx = (k % width) as f64 - 1.0 - centroid[l].0;
            let dy = (k / width) as f64 - 1.0 - centroid[l].1;
            m11[l] += dx * dy;
            m20[l] += dx * dx;
            m02[l] += dy * dy;
        }

        for object in self.objects.iter_mut() {
            let l = object.local_label as usize;
            let a = object.area as f64;
            let (m11, m20, m02) = (m11[l] / a, m20[l] / a, m02[l] / a);
            let spread = ((m20 - m02).powi(2) + 4.0 * m11 * m11).sqrt();
            let major = (2.0 * (m20 + m02 + spread) / a).sqrt();
            let minor = (2.0 * (m20 + m02 - spread) / a).sqrt();
            object.aspect_ratio = major / minor;
        }
        Ok(())
    }

    /// Whether every object has a defined aspect ratio.
    pub fn is_aspect_ratio_ready(&self) -> bool {
        self.objects.iter().all(|o| !o.aspect_ratio.is_nan())
    }

    // ===== Queries =====

    pub fn object_by_local_label(&self, label: u32) -> Option<&Object> {
        self.objects
            .binary_search_by_key(&label, |o| o.local_label)
            .ok()
            .map(|k| &self.objects[k])
    }

    pub fn object_by_global_label(&self, label: u32) -> Option<&Object> {
        self.objects.iter().find(|o| o.global_label == label)
    }

    /// Highest local label among the objects.
    pub fn max_local_label(&self) -> u32 {
        self.objects.iter().map(|o| o.local_label).max().unwrap_or(0)
    }

    /// Highest global label among the objects.
    pub fn max_global_label(&self) -> u32 {
        self.objects.iter().map(|o| o.global_label).max().unwrap_or(0)
    }

    /// Per-label bounding boxes of the current buffer, see [`LabelImage::bounding_boxes`].
    pub fn bounding_boxes(&self) -> Result<Vec<Option<BoundingBox>>> {
        self.require(FrameState::Read)?;
        Ok(self.label_image()?.bounding_boxes())
    }

    // ===== Output =====

    /// Rewrite the buffer from local to global labels.
    pub fn apply_global_labels(&mut self) -> Result<()> {
        self.require(FrameState::Tracked)?;
        let mut mapping = vec![0u32; self.max_local_label() as usize + 1];
        for object in &self.objects {
            mapping[object.local_label as usize] = object.global_label;
        }
        self.label_image_mut()?.relabel(&mapping);
        Ok(())
    }

    /// Unpadded copy of the current buffer.
    pub fn labels(&self) -> Result<Vec<u32>> {
        Ok(self.label_image()?.unpadded())
    }

    /// Record that the relabeled buffer has been handed downstream.
    pub fn mark_written(&mut self) -> Result<()> {
        self.require(FrameState::Tracked)?;
        self.advance(FrameState::Written)
    }

    /// Drop the pixel buffer and the overlap/cost matrices.
    ///
    /// Objects, division, fusion and the track vector stay available for
    /// lineage queries.
    pub fn release(&mut self) -> Result<()> {
        self.require(FrameState::Written)?;
        self.advance(FrameState::Released)?;
        self.image = None;
        if let Some(pairing) = self.pairing.as_mut() {
            pairing.overlap = Matrix::zeros(0, 0);
            pairing.cost = Matrix::zeros(0, 0);
        }
        Ok(())
    }
}
