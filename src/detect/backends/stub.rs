use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Scripted backend for tests and dry runs.
///
/// Returns the same detections for every frame and records the dimensions of
/// each frame it was called with.
#[derive(Default)]
pub struct StubBackend {
    detections: Vec<RawDetection>,
    labels: BTreeMap<u32, String>,
    failure: Option<String>,
    calls: Mutex<Vec<(u32, u32)>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_label(mut self, class_id: u32, label: impl Into<String>) -> Self {
        self.labels.insert(class_id, label.into());
        self
    }

    /// Make every `detect` call fail with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Frame dimensions seen so far, in call order.
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

impl Detector for StubBackend {
    fn backend(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("stub call log lock poisoned"))?
            .push((frame.width(), frame.height()));
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.detections.clone())
    }

    fn native_label(&self, class_id: u32) -> String {
        self.labels
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn stub_backend_replays_detections() -> Result<()> {
        let det = RawDetection::new(2, 0.7, BoundingBox::new(0.0, 0.0, 4.0, 4.0)?);
        let backend = StubBackend::new()
            .with_detections(vec![det.clone()])
            .with_label(2, "vest");
        let frame = Frame::from_rgb(3, 2, vec![0u8; 18])?;

        assert_eq!(backend.detect(&frame)?, vec![det.clone()]);
        assert_eq!(backend.detect(&frame)?, vec![det]);
        assert_eq!(backend.calls(), vec![(3, 2), (3, 2)]);
        assert_eq!(backend.native_label(2), "vest");
        assert_eq!(backend.native_label(5), "class5");
        Ok(())
    }

    #[test]
    fn failing_stub_reports_message() -> Result<()> {
        let backend = StubBackend::new().failing("gpu fell over");
        let frame = Frame::from_rgb(1, 1, vec![0u8; 3])?;
        let err = backend.detect(&frame).unwrap_err();
        assert_eq!(err.to_string(), "gpu fell over");
        assert_eq!(backend.call_count(), 1);
        Ok(())
    }
}
