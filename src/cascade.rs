//! Two-stage cascade: primary detection, then secondary detection inside each
//! primary region.
//!
//! Output order is fixed: primaries in the primary detector's native order,
//! each followed by its secondaries grouped by secondary registration order and
//! then by each secondary detector's native order. Running secondaries in
//! parallel does not change that order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::{
    CascadeResult, Detection, Detector, DetectorConfig, DetectorRegistry, RawDetection,
};
use crate::error::CascadeError;
use crate::frame::Frame;
use crate::geometry::{extract_region, to_original_frame, BoundingBox, Region};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CascadeOptions {
    /// Run the secondary detectors of one primary region on scoped threads.
    pub parallel_secondaries: bool,
    /// Per-run budget, checked before each detector invocation.
    pub timeout: Option<Duration>,
}

/// Secondary detector resolved for one run.
struct Stage<'r> {
    name: &'r str,
    config: &'r DetectorConfig,
    detector: Arc<dyn Detector>,
}

pub struct CascadeOrchestrator {
    registry: Arc<DetectorRegistry>,
    options: CascadeOptions,
}

impl CascadeOrchestrator {
    pub fn new(registry: Arc<DetectorRegistry>) -> Self {
        Self {
            registry,
            options: CascadeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CascadeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn options(&self) -> CascadeOptions {
        self.options
    }

    /// Run the cascade over `frame`.
    ///
    /// Fails with `DetectorUnavailable` if `primary` is not loaded. Secondary
    /// names that are unknown or not loaded are skipped. Any detector error
    /// aborts the whole run; no partial result is returned.
    pub fn run<S: AsRef<str>>(
        &self,
        frame: &Frame,
        primary: &str,
        secondaries: &[S],
    ) -> Result<CascadeResult, CascadeError> {
        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);

        let (primary_detector, primary_config) = match (
            self.registry.get(primary),
            self.registry.config_for(primary),
        ) {
            (Some(detector), Some(config)) => (detector, config),
            _ => {
                return Err(CascadeError::DetectorUnavailable {
                    detector: primary.to_string(),
                })
            }
        };
        let stages = self.resolve_stages(secondaries);

        check_deadline(deadline, primary)?;
        let raw_primaries = invoke(primary, primary_detector.as_ref(), frame)?;
        let image_width = frame.width() as f32;
        let image_height = frame.height() as f32;

        let mut result = CascadeResult::default();
        for raw in raw_primaries {
            let label = match primary_config.resolve(
                raw.class_id,
                &primary_detector.native_label(raw.class_id),
            ) {
                Some(label) => label,
                None => {
                    log::debug!(
                        "{}: class {} not in class map, dropped",
                        primary,
                        raw.class_id
                    );
                    continue;
                }
            };
            let parent_box = raw.bbox;
            result.push(Detection::primary(label, raw.confidence, parent_box));

            let region = match extract_region(image_width, image_height, &parent_box) {
                Some(region) => region,
                None => {
                    log::debug!(
                        "{}: region {:?} too small for secondary detection",
                        primary,
                        parent_box.to_array()
                    );
                    continue;
                }
            };
            if stages.is_empty() {
                continue;
            }

            let crop = frame.crop(&region);
            let secondaries = if self.options.parallel_secondaries && stages.len() > 1 {
                run_stages_parallel(&stages, &crop, &region, &parent_box, deadline)?
            } else {
                run_stages_sequential(&stages, &crop, &region, &parent_box, deadline)?
            };
            result.extend(secondaries);
        }

        log::debug!(
            "cascade {} over {}x{}: {} detections",
            primary,
            frame.width(),
            frame.height(),
            result.len()
        );
        Ok(result)
    }

    fn resolve_stages<'r, S: AsRef<str>>(&'r self, secondaries: &'r [S]) -> Vec<Stage<'r>> {
        let mut stages = Vec::with_capacity(secondaries.len());
        for name in secondaries {
            let name = name.as_ref();
            match (self.registry.get(name), self.registry.config_for(name)) {
                (Some(detector), Some(config)) => stages.push(Stage {
                    name,
                    config,
                    detector,
                }),
                _ => log::warn!("secondary detector '{}' unavailable, skipping", name),
            }
        }
        stages
    }
}

fn run_stages_sequential(
    stages: &[Stage<'_>],
    crop: &Frame,
    region: &Region,
    parent_box: &BoundingBox,
    deadline: Option<Instant>,
) -> Result<Vec<Detection>, CascadeError> {
    let mut out = Vec::new();
    for stage in stages {
        out.extend(run_stage(stage, crop, region, parent_box, deadline)?);
    }
    Ok(out)
}

/// Scoped threads, one per stage. Results are joined in stage order, so the
/// earliest-registered failure wins and output matches the sequential path.
fn run_stages_parallel(
    stages: &[Stage<'_>],
    crop: &Frame,
    region: &Region,
    parent_box: &BoundingBox,
    deadline: Option<Instant>,
) -> Result<Vec<Detection>, CascadeError> {
    let per_stage: Vec<Result<Vec<Detection>, CascadeError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = stages
            .iter()
            .map(|stage| {
                scope.spawn(move || run_stage(stage, crop, region, parent_box, deadline))
            })
            .collect();
        handles
            .into_iter()
            .zip(stages)
            .map(|(handle, stage)| {
                handle.join().unwrap_or_else(|_| {
                    Err(CascadeError::DetectorInvocation {
                        detector: stage.name.to_string(),
                        source: anyhow::anyhow!("detector thread panicked"),
                    })
                })
            })
            .collect()
    });

    let mut out = Vec::new();
    for stage_result in per_stage {
        out.extend(stage_result?);
    }
    Ok(out)
}

fn run_stage(
    stage: &Stage<'_>,
    crop: &Frame,
    region: &Region,
    parent_box: &BoundingBox,
    deadline: Option<Instant>,
) -> Result<Vec<Detection>, CascadeError> {
    check_deadline(deadline, stage.name)?;
    let raw = invoke(stage.name, stage.detector.as_ref(), crop)?;
    let mut out = Vec::with_capacity(raw.len());
    for det in raw {
        let label = match stage
            .config
            .resolve(det.class_id, &stage.detector.native_label(det.class_id))
        {
            Some(label) => label,
            None => {
                log::debug!(
                    "{}: class {} not in class map, dropped",
                    stage.name,
                    det.class_id
                );
                continue;
            }
        };
        out.push(Detection::secondary(
            label,
            det.confidence,
            to_original_frame(&det.bbox, region.offset),
            stage.name,
            *parent_box,
        ));
    }
    Ok(out)
}

fn invoke(name: &str, detector: &dyn Detector, frame: &Frame) -> Result<Vec<RawDetection>, CascadeError> {
    detector
        .detect(frame)
        .map_err(|source| CascadeError::DetectorInvocation {
            detector: name.to_string(),
            source,
        })
}

fn check_deadline(deadline: Option<Instant>, detector: &str) -> Result<(), CascadeError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(CascadeError::DeadlineExceeded {
            detector: detector.to_string(),
        }),
        _ => Ok(()),
    }
}
