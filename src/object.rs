//! Per-frame feature record of one segmented region.

use std::fmt;

/// One connected label region in one frame.
///
/// Produced by [`crate::Frame::process`]; the tracker only ever writes its
/// `global_label`. Positions are in unpadded image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Pixel value of the region in its frame (1-based, unique per frame).
    pub local_label: u32,

    /// Persistent identity across frames, 0 until the frame is tracked.
    pub global_label: u32,

    /// Pixel count, always positive.
    pub area: usize,

    pub centroid_x: f64,
    pub centroid_y: f64,

    /// Length of the traced outer boundary.
    pub perimeter: f64,

    /// `4 * pi * area / perimeter^2`.
    pub circularity: f64,

    /// Major over minor principal axis length, `NaN` until computed.
    pub aspect_ratio: f64,

    /// Whether any pixel lies within the border margin of the image edge.
    pub is_border: bool,

    /// Local labels of regions sharing an edge with this one, ascending.
    pub touching: Vec<u32>,
}

impl Object {
    /// Create an untracked object with no derived features yet.
    pub fn new(local_label: u32, area: usize, centroid_x: f64, centroid_y: f64) -> Self {
        Self {
            local_label,
            global_label: 0,
            area,
            centroid_x,
            centroid_y,
            perimeter: 0.0,
            circularity: f64::NAN,
            aspect_ratio: f64::NAN,
            is_border: false,
            touching: Vec::new(),
        }
    }

    /// Set the traced perimeter and derive circularity from it.
    pub fn set_perimeter(&mut self, perimeter: f64) {
        self.perimeter = perimeter;
        self.circularity = 4.0 * std::f64::consts::PI * self.area as f64 / (perimeter * perimeter);
    }

    /// Euclidean distance between the centroids of two objects.
    pub fn centroid_distance(&self, other: &Object) -> f64 {
        let dx = self.centroid_x - other.centroid_x;
        let dy = self.centroid_y - other.centroid_y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_tracked(&self) -> bool {
        self.global_label > 0
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Object(local={}, global={}, area={}, centroid=({:.2}, {:.2}))",
            self.local_label, self.global_label, self.area, self.centroid_x, self.centroid_y
        )
    }
}
