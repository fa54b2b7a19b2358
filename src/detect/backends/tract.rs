#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a model exported with its post-processing included, producing one
/// output of shape `[1, N, 6]` where each row is
/// `(x1, y1, x2, y2, score, class)` in network input pixels. Zero-score
/// padding rows are dropped by the confidence threshold.
///
/// Frames are stretched to the square network input and boxes scaled back to
/// the frame's own pixel grid.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("input size must be greater than zero"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            labels: Vec::new(),
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Native class names, indexed by class id.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame.rgb(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn extract_detections(&self, output: &Tensor, frame: &Frame) -> Result<Vec<RawDetection>> {
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = rows.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[2] < 6 {
            return Err(anyhow!(
                "unexpected detector output shape {:?}; expected [1, N, 6]",
                shape
            ));
        }
        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for row in rows.index_axis(tract_ndarray::Axis(0), 0).outer_iter() {
            let score = row[4];
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (ax, bx) = (row[0] * scale_x, row[2] * scale_x);
            let (ay, by) = (row[1] * scale_y, row[3] * scale_y);
            let bbox = BoundingBox::new(ax.min(bx), ay.min(by), ax.max(bx), ay.max(by))?;
            let class = row[5];
            if !class.is_finite() || class < 0.0 {
                return Err(anyhow!("detector produced invalid class index {}", class));
            }
            detections.push(RawDetection::new(
                class.round() as u32,
                score.clamp(0.0, 1.0),
                bbox,
            ));
        }
        Ok(detections)
    }
}

impl Detector for TractBackend {
    fn backend(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.extract_detections(output, frame)
    }

    fn native_label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    fn warm_up(&self) -> Result<()> {
        let blank = Frame::from_rgb(
            self.input_size,
            self.input_size,
            vec![0u8; (self.input_size * self.input_size * 3) as usize],
        )?;
        self.detect(&blank).map(|_| ())
    }
}
