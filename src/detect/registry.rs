use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::class_map::DetectorConfig;

struct RegistryEntry {
    config: DetectorConfig,
    model_ref: String,
    detector: Option<Arc<dyn Detector>>,
}

/// Named detectors and their configs, in registration order.
///
/// Built once through `RegistryBuilder` and immutable afterwards, so it can be
/// shared behind an `Arc` without locking. An entry may be registered without a
/// detector (model failed to load); lookups then report it as absent.
pub struct DetectorRegistry {
    entries: Vec<RegistryEntry>,
}

impl DetectorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.config.name == name)
    }

    /// Loaded detector by name. `None` for unknown names and absent detectors.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.entry(name).and_then(|entry| entry.detector.clone())
    }

    pub fn config_for(&self, name: &str) -> Option<&DetectorConfig> {
        self.entry(name).map(|entry| &entry.config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|entry| entry.detector.is_some())
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.config.name.as_str())
            .collect()
    }

    /// `(name, model reference)` pairs, in registration order.
    pub fn model_refs(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.config.name.as_str(), entry.model_ref.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl RegistryBuilder {
    /// Register a loaded detector.
    pub fn register(
        &mut self,
        config: DetectorConfig,
        model_ref: impl Into<String>,
        detector: Arc<dyn Detector>,
    ) -> Result<&mut Self> {
        self.push(config, model_ref.into(), Some(detector))
    }

    /// Register a configured detector whose model could not be loaded.
    pub fn register_absent(
        &mut self,
        config: DetectorConfig,
        model_ref: impl Into<String>,
    ) -> Result<&mut Self> {
        self.push(config, model_ref.into(), None)
    }

    fn push(
        &mut self,
        config: DetectorConfig,
        model_ref: String,
        detector: Option<Arc<dyn Detector>>,
    ) -> Result<&mut Self> {
        config.validate()?;
        if self.entries.iter().any(|e| e.config.name == config.name) {
            return Err(anyhow!("detector '{}' registered twice", config.name));
        }
        self.entries.push(RegistryEntry {
            config,
            model_ref,
            detector,
        });
        Ok(self)
    }

    pub fn build(self) -> DetectorRegistry {
        DetectorRegistry {
            entries: self.entries,
        }
    }
}
