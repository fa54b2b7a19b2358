//! Builds the detector registry from configuration.
//!
//! A detector whose model cannot be loaded is registered as absent rather
//! than failing startup; the cascade decides later whether that is fatal
//! (primary) or skippable (secondary).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::config::{DetectorSettings, ServiceConfig};
use crate::detect::{Detector, DetectorRegistry};

/// Model path to load: the configured one, or the fallback when it is missing.
pub fn resolve_model_path(settings: &DetectorSettings) -> PathBuf {
    if settings.model.exists() {
        return settings.model.clone();
    }
    match &settings.fallback_model {
        Some(fallback) => {
            log::warn!(
                "{}: model {} not found, falling back to {}",
                settings.name,
                settings.model.display(),
                fallback.display()
            );
            fallback.clone()
        }
        None => settings.model.clone(),
    }
}

/// Load every configured detector, in declaration order.
pub fn load_registry(config: &ServiceConfig) -> Result<DetectorRegistry> {
    load_registry_with(config, load_detector)
}

/// Like `load_registry`, with a caller-supplied backend constructor.
pub fn load_registry_with<F>(config: &ServiceConfig, mut load: F) -> Result<DetectorRegistry>
where
    F: FnMut(&DetectorSettings, &Path) -> Result<Arc<dyn Detector>>,
{
    let mut builder = DetectorRegistry::builder();
    for settings in &config.detectors {
        let path = resolve_model_path(settings);
        let model_ref = path.display().to_string();
        log::info!("loading {} detector from {}", settings.name, model_ref);
        match load(settings, &path).and_then(|detector| {
            detector.warm_up()?;
            Ok(detector)
        }) {
            Ok(detector) => {
                log::info!("{} detector ready ({})", settings.name, detector.backend());
                builder.register(settings.detector_config(), model_ref, detector)?;
            }
            Err(err) => {
                log::error!("error loading {} detector: {:#}", settings.name, err);
                builder.register_absent(settings.detector_config(), model_ref)?;
            }
        }
    }
    Ok(builder.build())
}

#[cfg(feature = "backend-tract")]
fn load_detector(settings: &DetectorSettings, path: &Path) -> Result<Arc<dyn Detector>> {
    let backend = crate::detect::TractBackend::new(path, settings.input_size)?
        .with_threshold(settings.confidence_threshold)
        .with_labels(settings.labels.clone());
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_detector(settings: &DetectorSettings, path: &Path) -> Result<Arc<dyn Detector>> {
    Err(anyhow::anyhow!(
        "cannot load {} model {}: built without an inference backend (enable feature backend-tract)",
        settings.name,
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use crate::detect::StubBackend;

    fn settings(model: PathBuf, fallback: Option<PathBuf>) -> DetectorSettings {
        let mut s = ServiceConfig::default().detectors.remove(1);
        s.model = model;
        s.fallback_model = fallback;
        s
    }

    #[test]
    fn existing_model_is_used_as_is() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let s = settings(file.path().to_path_buf(), Some(PathBuf::from("yolov8n.onnx")));
        assert_eq!(resolve_model_path(&s), file.path());
        Ok(())
    }

    #[test]
    fn missing_model_falls_back() {
        let s = settings(
            PathBuf::from("models/definitely_missing.onnx"),
            Some(PathBuf::from("yolov8n.onnx")),
        );
        assert_eq!(resolve_model_path(&s), PathBuf::from("yolov8n.onnx"));

        let s = settings(PathBuf::from("models/definitely_missing.onnx"), None);
        assert_eq!(
            resolve_model_path(&s),
            PathBuf::from("models/definitely_missing.onnx")
        );
    }

    #[test]
    fn failed_loads_register_absent() -> Result<()> {
        let config = ServiceConfig::default();
        let registry = load_registry_with(&config, |settings, _path| {
            if settings.name == "person" {
                Ok(Arc::new(StubBackend::new()) as Arc<dyn Detector>)
            } else {
                Err(anyhow!("corrupt model"))
            }
        })?;

        assert_eq!(registry.names(), vec!["person", "ppe"]);
        assert!(registry.is_available("person"));
        assert!(!registry.is_available("ppe"));
        assert_eq!(
            registry.model_refs()[1],
            ("ppe", "yolov8n.onnx")
        );
        Ok(())
    }
}
