use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::cascade::{CascadeOptions, CascadeOrchestrator};
use crate::config::ServiceConfig;
use crate::detect::{Detection, DetectorRegistry};
use crate::error::CascadeError;
use crate::frame::Frame;

pub const SERVICE_MESSAGE: &str = "Cascade Object Detection Service is running";

/// Successful prediction payload.
#[derive(Clone, Debug, Serialize)]
pub struct PredictResponse {
    pub filename: String,
    pub detections: Vec<Detection>,
    pub count: usize,
}

/// Service metadata: configured detector name to model reference.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    pub models: BTreeMap<String, String>,
}

/// One configured cascade (primary + ordered secondaries) over a shared registry.
pub struct CascadeService {
    orchestrator: CascadeOrchestrator,
    primary: String,
    secondaries: Vec<String>,
}

impl CascadeService {
    pub fn new(
        registry: Arc<DetectorRegistry>,
        primary: impl Into<String>,
        secondaries: Vec<String>,
        options: CascadeOptions,
    ) -> Self {
        Self {
            orchestrator: CascadeOrchestrator::new(registry).with_options(options),
            primary: primary.into(),
            secondaries,
        }
    }

    pub fn from_config(config: &ServiceConfig, registry: Arc<DetectorRegistry>) -> Self {
        Self::new(
            registry,
            config.cascade.primary.clone(),
            config.cascade.secondaries.clone(),
            config.cascade.options(),
        )
    }

    pub fn registry(&self) -> &DetectorRegistry {
        self.orchestrator.registry()
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            message: SERVICE_MESSAGE.to_string(),
            models: self
                .registry()
                .model_refs()
                .into_iter()
                .map(|(name, model)| (name.to_string(), model.to_string()))
                .collect(),
        }
    }

    /// Decode `bytes` and run the cascade.
    ///
    /// Primary availability is checked before decoding.
    pub fn predict(&self, filename: &str, bytes: &[u8]) -> Result<PredictResponse, CascadeError> {
        if !self.registry().is_available(&self.primary) {
            return Err(CascadeError::DetectorUnavailable {
                detector: self.primary.clone(),
            });
        }
        let frame = Frame::decode(bytes)?;
        let result = self
            .orchestrator
            .run(&frame, &self.primary, self.secondaries.as_slice())?;
        let detections = result.into_vec();
        log::info!(
            "{}: {}x{} image, {} detections",
            filename,
            frame.width(),
            frame.height(),
            detections.len()
        );
        Ok(PredictResponse {
            filename: filename.to_string(),
            count: detections.len(),
            detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorConfig, StubBackend};

    #[test]
    fn unavailable_primary_is_reported_before_decoding() -> anyhow::Result<()> {
        let mut builder = DetectorRegistry::builder();
        builder
            .register_absent(DetectorConfig::pass_through("person"), "models/p.onnx")?
            .register(
                DetectorConfig::pass_through("ppe"),
                "models/s.onnx",
                Arc::new(StubBackend::new()),
            )?;
        let service = CascadeService::new(
            Arc::new(builder.build()),
            "person",
            vec!["ppe".to_string()],
            CascadeOptions::default(),
        );

        let err = service.predict("x.jpg", b"not an image").unwrap_err();
        assert_eq!(err.code(), "detector_unavailable");

        let info = service.info();
        assert_eq!(info.message, SERVICE_MESSAGE);
        assert_eq!(info.models.get("person").map(String::as_str), Some("models/p.onnx"));
        assert_eq!(info.models.get("ppe").map(String::as_str), Some("models/s.onnx"));
        Ok(())
    }
}
