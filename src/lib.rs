//! # Lineage - Cell Lineage Tracking Library
//!
//! Assigns persistent identities to segmented objects (typically cells) across
//! a time-ordered sequence of integer label masks. Identities survive object
//! division (mitosis) and merging (fusion).
//!
//! ## Features
//!
//! - Overlap, centroid and size weighted frame-to-frame matching
//! - Division detection with circularity and daughter similarity checks
//! - Fusion detection, with fused objects either kept or cut back apart
//! - Connected-component labeling, perimeter tracing and nearest-label fill
//! - Lineage aggregates: birth and death frames, division and fusion maps,
//!   confidence index
//!
//! ## Example
//!
//! ```rust,ignore
//! use lineage_rs::{CancellationFlag, FrameInput, FrameTracker, TrackerConfig};
//!
//! let mut tracker = FrameTracker::new(TrackerConfig::default())?;
//!
//! let frames = vec![
//!     FrameInput::new(0, "t0", 4, 1, &[1, 1, 0, 0])?,
//!     FrameInput::new(1, "t1", 4, 1, &[0, 1, 1, 0])?,
//! ];
//! let tracked = tracker.run(frames, &CancellationFlag::new())?;
//! assert_eq!(tracked[1].labels, vec![0, 1, 1, 0]);
//!
//! let lineage = tracker.lineage();
//! ```

// Primitives
pub mod matrix;
pub mod disjoint_set;
pub mod labeling;
pub mod fill;
pub mod label_image;

// Tracking
pub mod object;
pub mod frame;
pub mod track_vector;
pub mod matching;
pub mod tracker;
pub mod lineage;
pub mod utils;

// Re-exports for convenience
pub use disjoint_set::DisjointSet;
pub use fill::{fill_nearest_label, geodesic_distance};
pub use frame::{Frame, FramePairing, FrameState};
pub use label_image::{BoundingBox, LabelImage};
pub use labeling::{boundary_pixels, label_components, trace_perimeters};
pub use lineage::{DivisionEvent, FusionEvent, LineageSummary};
pub use matrix::{Extrema, Matrix};
pub use object::Object;
pub use track_vector::{Track, TrackVector};
pub use tracker::{CancellationFlag, FrameInput, FrameTracker, TrackedFrame, TrackerConfig};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    use crate::frame::FrameState;

    /// Errors that can occur in the lineage library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Frame {frame} is {actual}, requires at least {required}")]
        InvalidState {
            frame: usize,
            required: FrameState,
            actual: FrameState,
        },

        #[error("Frame {frame} cannot move from {from} to {to}")]
        InvalidTransition {
            frame: usize,
            from: FrameState,
            to: FrameState,
        },

        #[error("Frame {frame} has no pixel buffer")]
        ImageReleased { frame: usize },

        #[error("Shape mismatch: expected {expected}, got {got}")]
        ShapeMismatch { expected: String, got: String },

        #[error("Invalid label image: {0}")]
        InvalidLabelImage(String),

        #[error("Invalid region: {0}")]
        InvalidRegion(String),

        #[error("Tracking cancelled before frame {frame}")]
        Cancelled { frame: usize },
    }

    /// Result type for lineage operations
    pub type Result<T> = std::result::Result<T, Error>;
}
