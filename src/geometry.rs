//! Box geometry shared by every stage of the cascade.
//!
//! A `BoundingBox` carries no frame tag of its own; callers keep track of
//! whether a box is image-local or crop-local. Everything that leaves the
//! cascade is image-local.

use anyhow::{anyhow, Result};
use serde::{Serialize, Serializer};

/// Minimum clamped width and height (pixels) of a region worth cropping.
pub const MIN_REGION_SIDE: f32 = 10.0;

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
///
/// Fields are private so every box in circulation has passed validation:
/// all coordinates finite, `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return Err(anyhow!(
                "bounding box has non-finite coordinates ({}, {}, {}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        if x1 > x2 || y1 > y2 {
            return Err(anyhow!(
                "bounding box corners out of order ({}, {}, {}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> f32 {
        self.x1
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn x2(&self) -> f32 {
        self.x2
    }

    pub fn y2(&self) -> f32 {
        self.y2
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Shift by `(dx, dy)`. Float addition is monotonic, so corner order survives.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}

/// Clamped crop rectangle of the source image, in image-local coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    /// Translation from crop-local back to image-local coordinates.
    pub offset: (f32, f32),
}

impl Region {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Clamp `bbox` to `[0, image_width] x [0, image_height]`.
///
/// Returns `None` when the clamped rectangle is narrower or shorter than
/// `MIN_REGION_SIDE`; that includes boxes lying entirely outside the image.
pub fn extract_region(image_width: f32, image_height: f32, bbox: &BoundingBox) -> Option<Region> {
    let left = bbox.x1.max(0.0);
    let top = bbox.y1.max(0.0);
    let right = bbox.x2.min(image_width);
    let bottom = bbox.y2.min(image_height);

    if right - left < MIN_REGION_SIDE || bottom - top < MIN_REGION_SIDE {
        return None;
    }

    Some(Region {
        left,
        top,
        right,
        bottom,
        offset: (left, top),
    })
}

/// Map a crop-local box into the original image frame. Pure translation.
pub fn to_original_frame(local: &BoundingBox, offset: (f32, f32)) -> BoundingBox {
    local.translate(offset.0, offset.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn bounding_box_rejects_inverted_corners() {
        assert!(BoundingBox::new(10.0, 0.0, 5.0, 5.0).is_err());
        assert!(BoundingBox::new(0.0, 10.0, 5.0, 5.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f32::NAN, 5.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f32::INFINITY, 5.0).is_err());
    }

    #[test]
    fn bounding_box_allows_degenerate_box() {
        let b = bbox(3.0, 3.0, 3.0, 3.0);
        assert_eq!(b.width(), 0.0);
        assert_eq!(b.height(), 0.0);
    }

    #[test]
    fn bounding_box_serializes_as_array() {
        let json = serde_json::to_string(&bbox(1.0, 2.5, 3.0, 4.0)).unwrap();
        assert_eq!(json, "[1.0,2.5,3.0,4.0]");
    }

    #[test]
    fn region_inside_image_is_unchanged() {
        let region = extract_region(100.0, 100.0, &bbox(10.0, 10.0, 90.0, 90.0)).unwrap();
        assert_eq!(region.left, 10.0);
        assert_eq!(region.top, 10.0);
        assert_eq!(region.right, 90.0);
        assert_eq!(region.bottom, 90.0);
        assert_eq!(region.offset, (10.0, 10.0));
    }

    #[test]
    fn region_is_clamped_to_image_bounds() {
        let region = extract_region(100.0, 50.0, &bbox(-20.0, -5.0, 140.0, 70.0)).unwrap();
        assert_eq!(region.left, 0.0);
        assert_eq!(region.top, 0.0);
        assert_eq!(region.right, 100.0);
        assert_eq!(region.bottom, 50.0);
        assert_eq!(region.offset, (0.0, 0.0));
    }

    #[test]
    fn region_rejected_when_too_small() {
        assert!(extract_region(100.0, 100.0, &bbox(0.0, 0.0, 5.0, 5.0)).is_none());
        // Wide enough but too short.
        assert!(extract_region(100.0, 100.0, &bbox(0.0, 0.0, 50.0, 9.9)).is_none());
        // Large box that only overlaps the image by a sliver.
        assert!(extract_region(100.0, 100.0, &bbox(95.0, 0.0, 300.0, 80.0)).is_none());
    }

    #[test]
    fn region_accepted_at_exact_threshold() {
        let region = extract_region(100.0, 100.0, &bbox(20.0, 30.0, 30.0, 40.0)).unwrap();
        assert_eq!(region.width(), MIN_REGION_SIDE);
        assert_eq!(region.height(), MIN_REGION_SIDE);
    }

    #[test]
    fn region_rejected_when_box_outside_image() {
        assert!(extract_region(100.0, 100.0, &bbox(150.0, 150.0, 200.0, 200.0)).is_none());
        assert!(extract_region(100.0, 100.0, &bbox(-80.0, -80.0, -20.0, -20.0)).is_none());
    }

    #[test]
    fn extraction_matches_clamped_size_rule() {
        let (w, h) = (64.0_f32, 48.0_f32);
        let coords = [-30.0_f32, -1.0, 0.0, 4.5, 9.0, 10.0, 20.0, 47.0, 54.0, 63.0, 64.0, 90.0];
        for &x1 in &coords {
            for &x2 in coords.iter().filter(|&&x2| x2 >= x1) {
                for &y1 in &coords {
                    for &y2 in coords.iter().filter(|&&y2| y2 >= y1) {
                        let b = bbox(x1, y1, x2, y2);
                        let cw = x2.min(w) - x1.max(0.0);
                        let ch = y2.min(h) - y1.max(0.0);
                        let expected = cw >= MIN_REGION_SIDE && ch >= MIN_REGION_SIDE;
                        assert_eq!(
                            extract_region(w, h, &b).is_some(),
                            expected,
                            "box {:?}",
                            b
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn remap_is_pure_translation() {
        let local = bbox(5.0, 5.0, 15.0, 15.0);
        assert_eq!(to_original_frame(&local, (10.0, 10.0)), bbox(15.0, 15.0, 25.0, 25.0));
        assert_eq!(to_original_frame(&local, (0.0, 0.0)), local);
        assert_eq!(
            to_original_frame(&local, (0.5, 120.25)),
            bbox(5.5, 125.25, 15.5, 135.25)
        );
    }
}
