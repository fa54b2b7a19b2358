use serde::Serialize;

use crate::geometry::BoundingBox;

/// Detector output before class resolution, in the frame of the detector's input.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Where a detection came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provenance {
    Primary,
    Secondary {
        /// Name of the secondary detector that produced the detection.
        detector: String,
        /// Image-local box of the owning primary detection.
        #[serde(rename = "parent_person_bbox")]
        parent_box: BoundingBox,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionKind {
    Primary,
    Secondary,
}

/// Output record. `bbox` is always in the original image frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Detection {
    pub fn primary(label: String, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label,
            confidence,
            bbox,
            provenance: Provenance::Primary,
        }
    }

    pub fn secondary(
        label: String,
        confidence: f32,
        bbox: BoundingBox,
        detector: &str,
        parent_box: BoundingBox,
    ) -> Self {
        Self {
            label,
            confidence,
            bbox,
            provenance: Provenance::Secondary {
                detector: detector.to_string(),
                parent_box,
            },
        }
    }

    pub fn kind(&self) -> DetectionKind {
        match self.provenance {
            Provenance::Primary => DetectionKind::Primary,
            Provenance::Secondary { .. } => DetectionKind::Secondary,
        }
    }

    pub fn detector_name(&self) -> Option<&str> {
        match &self.provenance {
            Provenance::Primary => None,
            Provenance::Secondary { detector, .. } => Some(detector),
        }
    }

    pub fn parent_box(&self) -> Option<&BoundingBox> {
        match &self.provenance {
            Provenance::Primary => None,
            Provenance::Secondary { parent_box, .. } => Some(parent_box),
        }
    }
}

/// Ordered cascade output: each primary followed by its secondaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CascadeResult {
    detections: Vec<Detection>,
}

impl CascadeResult {
    pub(crate) fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub(crate) fn extend(&mut self, detections: Vec<Detection>) {
        self.detections.extend(detections);
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    pub fn into_vec(self) -> Vec<Detection> {
        self.detections
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(|d| d.kind() == DetectionKind::Primary)
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(|d| d.kind() == DetectionKind::Secondary)
    }
}

impl<'a> IntoIterator for &'a CascadeResult {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}
