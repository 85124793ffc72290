//! Padded label buffer owned by a frame.
//!
//! Input masks are wrapped in one background pixel on every side so that
//! neighbourhood scans never need edge cases. All coordinates in this module
//! are padded coordinates: the first image pixel sits at `(1, 1)`.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Error, Result};

/// Inclusive rectangle in padded pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl BoundingBox {
    pub fn width(&self) -> usize {
        self.x_max - self.x_min + 1
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min + 1
    }

    /// Grow by `margin` pixels on every side, clamped to `width x height`.
    pub fn expanded(&self, margin: usize, width: usize, height: usize) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.saturating_sub(margin),
            x_max: (self.x_max + margin).min(width.saturating_sub(1)),
            y_min: self.y_min.saturating_sub(margin),
            y_max: (self.y_max + margin).min(height.saturating_sub(1)),
        }
    }

    fn include(&mut self, x: usize, y: usize) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }
}

/// Row-major label buffer with a one-pixel background border.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
}

impl LabelImage {
    /// Pad an unpadded row-major mask and renumber its labels to `1..=N`.
    ///
    /// Present labels keep their relative order; gaps in the input numbering
    /// are closed.
    ///
    /// # Errors
    /// * `Error::InvalidLabelImage` for a zero-sized image
    /// * `Error::ShapeMismatch` if `labels.len() != width * height`
    pub fn from_unpadded(width: usize, height: usize, labels: &[u32]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidLabelImage(format!(
                "image must be at least 1x1, got {}x{}",
                width, height
            )));
        }
        if labels.len() != width * height {
            return Err(Error::ShapeMismatch {
                expected: format!("{} pixels for a {}x{} image", width * height, width, height),
                got: format!("{} pixels", labels.len()),
            });
        }

        let padded_width = width + 2;
        let padded_height = height + 2;
        let mut pixels = vec![0u32; padded_width * padded_height];
        for (y, row) in labels.chunks_exact(width).enumerate() {
            let start = (y + 1) * padded_width + 1;
            pixels[start..start + width].copy_from_slice(row);
        }

        let mut image = Self {
            width: padded_width,
            height: padded_height,
            pixels,
        };
        image.renumber_sequential();
        Ok(image)
    }

    /// Padded width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Padded height.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, label: u32) {
        self.pixels[y * self.width + x] = label;
    }

    pub fn max_label(&self) -> u32 {
        self.pixels.iter().copied().max().unwrap_or(0)
    }

    /// Map every pixel value `v` to `mapping[v]`.
    ///
    /// Values beyond the end of `mapping` become background.
    pub fn relabel(&mut self, mapping: &[u32]) {
        for px in self.pixels.iter_mut() {
            *px = mapping.get(*px as usize).copied().unwrap_or(0);
        }
    }

    /// Close gaps in the label numbering, keeping relative order.
    ///
    /// Works from the labels actually present, so sparse or very large input
    /// values cost no more than dense ones.
    ///
    /// # Returns
    /// The mapping applied, from old label to new label.
    pub fn renumber_sequential(&mut self) -> BTreeMap<u32, u32> {
        let present: BTreeSet<u32> = self.pixels.iter().copied().filter(|&px| px > 0).collect();
        let mapping: BTreeMap<u32, u32> = present.into_iter().zip(1..).collect();
        for px in self.pixels.iter_mut() {
            if *px > 0 {
                *px = mapping.get(px).copied().unwrap_or(0);
            }
        }
        mapping
    }

    /// Pixel count per label; entry 0 is the background.
    pub fn object_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.max_label() as usize + 1];
        for &px in &self.pixels {
            sizes[px as usize] += 1;
        }
        sizes
    }

    /// Bounding box per label; entry 0 and absent labels are `None`.
    pub fn bounding_boxes(&self) -> Vec<Option<BoundingBox>> {
        let mut boxes: Vec<Option<BoundingBox>> = vec![None; self.max_label() as usize + 1];
        for (k, &px) in self.pixels.iter().enumerate() {
            if px == 0 {
                continue;
            }
            let (x, y) = (k % self.width, k / self.width);
            let label = px as usize;
            if let Some(bb) = boxes[label].as_mut() {
                bb.include(x, y);
            } else {
                boxes[label] = Some(BoundingBox {
                    x_min: x,
                    x_max: x,
                    y_min: y,
                    y_max: y,
                });
            }
        }
        boxes
    }

    fn check_region(&self, region: &BoundingBox) -> Result<()> {
        if region.x_min > region.x_max || region.x_max >= self.width {
            return Err(Error::InvalidRegion(format!(
                "x range {}..={} outside 0..{}",
                region.x_min, region.x_max, self.width
            )));
        }
        if region.y_min > region.y_max || region.y_max >= self.height {
            return Err(Error::InvalidRegion(format!(
                "y range {}..={} outside 0..{}",
                region.y_min, region.y_max, self.height
            )));
        }
        Ok(())
    }

    /// Copy of the pixels inside `region`, row-major.
    pub fn sub_image(&self, region: &BoundingBox) -> Result<Vec<u32>> {
        self.check_region(region)?;
        let mut out = Vec::with_capacity(region.width() * region.height());
        for y in region.y_min..=region.y_max {
            let start = y * self.width + region.x_min;
            out.extend_from_slice(&self.pixels[start..start + region.width()]);
        }
        Ok(out)
    }

    /// Write `data` (row-major, exactly the size of `region`) back into the image.
    pub fn overwrite_sub_image(&mut self, region: &BoundingBox, data: &[u32]) -> Result<()> {
        self.check_region(region)?;
        let sub_width = region.width();
        if data.len() != sub_width * region.height() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} pixels", sub_width * region.height()),
                got: format!("{} pixels", data.len()),
            });
        }
        for (row, y) in data.chunks_exact(sub_width).zip(region.y_min..=region.y_max) {
            let start = y * self.width + region.x_min;
            self.pixels[start..start + sub_width].copy_from_slice(row);
        }
        Ok(())
    }

    /// The image without its padding, row-major.
    pub fn unpadded(&self) -> Vec<u32> {
        let inner_width = self.width - 2;
        let mut out = Vec::with_capacity(inner_width * (self.height - 2));
        for y in 1..self.height - 1 {
            let start = y * self.width + 1;
            out.extend_from_slice(&self.pixels[start..start + inner_width]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> LabelImage {
        #[rustfmt::skip]
        let labels = [
            0, 7, 7,
            3, 0, 7,
        ];
        LabelImage::from_unpadded(3, 2, &labels).unwrap()
    }

    // ===== Test Construction =====

    #[test]
    fn test_padding_and_renumbering() {
        let img = image();
        assert_eq!((img.width(), img.height()), (5, 4));
        assert!(img.pixels()[..5].iter().all(|&v| v == 0));
        // 3 -> 1, 7 -> 2
        assert_eq!(img.get(2, 1), 2);
        assert_eq!(img.get(1, 2), 1);
        assert_eq!(img.max_label(), 2);
        assert_eq!(img.unpadded(), vec![0, 2, 2, 1, 0, 2]);
    }

    #[test]
    fn test_renumbering_handles_huge_labels() {
        let mut img = LabelImage::from_unpadded(3, 1, &[u32::MAX, 0, 5]).unwrap();
        assert_eq!(img.unpadded(), vec![2, 0, 1]);
        assert_eq!(img.max_label(), 2);
        assert_eq!(img.object_sizes().len(), 3);

        img.set(1, 1, 9);
        let mapping = img.renumber_sequential();
        assert_eq!(mapping.into_iter().collect::<Vec<_>>(), vec![(1, 1), (9, 2)]);
        assert_eq!(img.unpadded(), vec![2, 0, 1]);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(matches!(
            LabelImage::from_unpadded(0, 3, &[]),
            Err(Error::InvalidLabelImage(_))
        ));
        assert!(matches!(
            LabelImage::from_unpadded(2, 2, &[1, 2, 3]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    // ===== Test Statistics =====

    #[test]
    fn test_object_sizes() {
        let sizes = image().object_sizes();
        assert_eq!(sizes, vec![20 - 4, 1, 3]);
    }

    #[test]
    fn test_bounding_boxes() {
        let boxes = image().bounding_boxes();
        assert_eq!(boxes[0], None);
        assert_eq!(
            boxes[2],
            Some(BoundingBox { x_min: 2, x_max: 3, y_min: 1, y_max: 2 })
        );
        assert_eq!(boxes[1].map(|b| (b.width(), b.height())), Some((1, 1)));
    }

    #[test]
    fn test_expanded_box_is_clamped() {
        let bb = BoundingBox { x_min: 0, x_max: 3, y_min: 1, y_max: 2 };
        let grown = bb.expanded(1, 5, 4);
        assert_eq!(grown, BoundingBox { x_min: 0, x_max: 4, y_min: 0, y_max: 3 });
    }

    // ===== Test Sub-images =====

    #[test]
    fn test_sub_image_round_trip() {
        let mut img = image();
        let region = BoundingBox { x_min: 1, x_max: 2, y_min: 1, y_max: 2 };
        assert_eq!(img.sub_image(&region).unwrap(), vec![0, 2, 1, 0]);
        img.overwrite_sub_image(&region, &[5, 5, 5, 5]).unwrap();
        assert_eq!(img.get(1, 1), 5);
        assert_eq!(img.get(3, 1), 2);
    }

    #[test]
    fn test_sub_image_bounds_checked() {
        let mut img = image();
        let outside = BoundingBox { x_min: 3, x_max: 5, y_min: 0, y_max: 1 };
        assert!(matches!(img.sub_image(&outside), Err(Error::InvalidRegion(_))));
        let region = BoundingBox { x_min: 0, x_max: 1, y_min: 0, y_max: 0 };
        assert!(matches!(
            img.overwrite_sub_image(&region, &[1, 2, 3]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_relabel_drops_unmapped_values() {
        let mut img = image();
        img.relabel(&[0, 4]);
        assert_eq!(img.unpadded(), vec![0, 0, 0, 4, 0, 0]);
    }
}
