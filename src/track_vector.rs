//! Previous-to-current label mapping for one frame pair.

use std::fmt;

use crate::matrix::Extrema;

/// Where a previous-frame object went in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    /// No candidate yet; eligible for residual assignment.
    Unassigned,
    /// Deliberately ended (a mother that divided, a parent absorbed by fusion).
    Dead,
    /// Continues as the current-frame object with this local label.
    To(u32),
}

impl Track {
    pub fn target(self) -> Option<u32> {
        match self {
            Track::To(label) if label > 0 => Some(label),
            _ => None,
        }
    }

    pub fn is_unassigned(self) -> bool {
        matches!(self, Track::Unassigned)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Unassigned => write!(f, "NaN"),
            Track::Dead => write!(f, "0"),
            Track::To(label) => write!(f, "{}", label),
        }
    }
}

/// One [`Track`] per previous-frame local label, addressed 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackVector {
    entries: Vec<Track>,
}

impl TrackVector {
    /// `len` unassigned entries.
    pub fn unassigned(len: usize) -> Self {
        Self {
            entries: vec![Track::Unassigned; len],
        }
    }

    /// Initial mapping from the row-wise minimum of a cost matrix.
    pub fn from_row_min(row_min: &Extrema) -> Self {
        Self {
            entries: row_min
                .indices
                .iter()
                .map(|idx| idx.map_or(Track::Unassigned, |col| Track::To(col as u32)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track of previous-frame label `prev`; labels past the end are unassigned.
    pub fn get(&self, prev: usize) -> Track {
        if prev == 0 {
            return Track::Unassigned;
        }
        self.entries.get(prev - 1).copied().unwrap_or(Track::Unassigned)
    }

    pub fn set(&mut self, prev: usize, track: Track) {
        assert!(
            prev >= 1 && prev <= self.entries.len(),
            "track vector index {} outside 1..={}",
            prev,
            self.entries.len()
        );
        self.entries[prev - 1] = track;
    }

    /// `(previous label, track)` pairs in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Track)> + '_ {
        self.entries.iter().enumerate().map(|(k, &t)| (k + 1, t))
    }

    /// Unassign every entry currently pointing at `current`.
    pub fn release_target(&mut self, current: u32) {
        for entry in self.entries.iter_mut() {
            if *entry == Track::To(current) {
                *entry = Track::Unassigned;
            }
        }
    }

    /// Whether some entry points at `current`.
    pub fn is_targeted(&self, current: u32) -> bool {
        self.entries.contains(&Track::To(current))
    }

    /// Rewrite every live target through `mapping` (indexed by old label).
    /// Targets mapped to 0 or beyond the mapping become unassigned.
    pub fn remap_targets(&mut self, mapping: &[u32]) {
        for entry in self.entries.iter_mut() {
            if let Track::To(label) = *entry {
                *entry = match mapping.get(label as usize).copied() {
                    Some(new) if new > 0 => Track::To(new),
                    _ => Track::Unassigned,
                };
            }
        }
    }
}
