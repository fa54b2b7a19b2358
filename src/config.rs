use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cascade::CascadeOptions;
use crate::detect::{parse_class_map, validate_detector_name, ClassMap, DetectorConfig};

const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_IN_FLIGHT: usize = 8;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_FALLBACK_MODEL: &str = "yolov8n.onnx";
const DEFAULT_PERSON_MODEL: &str = "models/human_detector.onnx";
const DEFAULT_PPE_MODEL: &str = "models/ppe_detector.onnx";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    cascade: Option<CascadeConfigFile>,
    detectors: Option<Vec<DetectorConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    max_in_flight: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CascadeConfigFile {
    primary: Option<String>,
    secondaries: Option<Vec<String>>,
    parallel_secondaries: Option<bool>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    name: String,
    model: Option<PathBuf>,
    model_env: Option<String>,
    fallback_model: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    labels: Option<Vec<String>>,
    class_map: Option<BTreeMap<String, String>>,
}

/// Service configuration: API surface, cascade plan and detector models.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    /// Requests served concurrently by the API.
    pub max_in_flight: usize,
    pub cascade: CascadeSettings,
    /// Detectors in registration order.
    pub detectors: Vec<DetectorSettings>,
}

#[derive(Debug, Clone)]
pub struct CascadeSettings {
    pub primary: String,
    pub secondaries: Vec<String>,
    pub parallel_secondaries: bool,
    pub timeout: Option<Duration>,
}

impl CascadeSettings {
    pub fn options(&self) -> CascadeOptions {
        CascadeOptions {
            parallel_secondaries: self.parallel_secondaries,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub name: String,
    pub model: PathBuf,
    /// Environment variable that overrides `model`.
    pub model_env: String,
    /// Used when `model` does not exist on disk.
    pub fallback_model: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    /// Native class names by id; empty means `class<id>`.
    pub labels: Vec<String>,
    pub class_map: Option<ClassMap>,
}

impl DetectorSettings {
    fn with_defaults(name: &str, model: &str, class_map: Option<ClassMap>) -> Self {
        Self {
            name: name.to_string(),
            model: PathBuf::from(model),
            model_env: default_model_env(name),
            fallback_model: Some(PathBuf::from(DEFAULT_FALLBACK_MODEL)),
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            labels: Vec::new(),
            class_map,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            name: self.name.clone(),
            class_map: self.class_map.clone(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            cascade: CascadeSettings {
                primary: "person".to_string(),
                secondaries: vec!["ppe".to_string()],
                parallel_secondaries: false,
                timeout: None,
            },
            detectors: default_detectors(),
        }
    }
}

impl ServiceConfig {
    /// Load from `$CASCADE_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CASCADE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let max_body_bytes = file
            .api
            .as_ref()
            .and_then(|api| api.max_body_bytes)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let max_in_flight = file
            .api
            .as_ref()
            .and_then(|api| api.max_in_flight)
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT);

        let declared = file.detectors.is_some();
        let detectors = match file.detectors {
            Some(detectors) => detectors
                .into_iter()
                .map(detector_from_file)
                .collect::<Result<Vec<_>>>()?,
            None => default_detectors(),
        };

        let cascade_file = file.cascade.unwrap_or_default();
        let primary = match cascade_file.primary {
            Some(primary) => primary,
            None if declared => detectors
                .first()
                .map(|d| d.name.clone())
                .ok_or_else(|| anyhow!("config declares no detectors"))?,
            None => "person".to_string(),
        };
        let secondaries = cascade_file.secondaries.unwrap_or_else(|| {
            detectors
                .iter()
                .filter(|d| d.name != primary)
                .map(|d| d.name.clone())
                .collect()
        });
        let timeout = cascade_file
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            api_addr,
            max_body_bytes,
            max_in_flight,
            cascade: CascadeSettings {
                primary,
                secondaries,
                parallel_secondaries: cascade_file.parallel_secondaries.unwrap_or(false),
                timeout,
            },
            detectors,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CASCADE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(bytes) = std::env::var("CASCADE_MAX_BODY_BYTES") {
            self.max_body_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("CASCADE_MAX_BODY_BYTES must be an integer byte count"))?;
        }
        if let Ok(limit) = std::env::var("CASCADE_MAX_IN_FLIGHT") {
            self.max_in_flight = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("CASCADE_MAX_IN_FLIGHT must be an integer request count"))?;
        }
        if let Ok(ms) = std::env::var("CASCADE_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| anyhow!("CASCADE_TIMEOUT_MS must be an integer number of milliseconds"))?;
            self.cascade.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(flag) = std::env::var("CASCADE_PARALLEL_SECONDARIES") {
            self.cascade.parallel_secondaries = parse_bool(&flag).ok_or_else(|| {
                anyhow!("CASCADE_PARALLEL_SECONDARIES must be true/false, yes/no or 1/0")
            })?;
        }
        for detector in &mut self.detectors {
            if let Ok(model) = std::env::var(&detector.model_env) {
                if !model.trim().is_empty() {
                    detector.model = PathBuf::from(model.trim());
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        if self.max_in_flight == 0 {
            return Err(anyhow!("max_in_flight must be greater than zero"));
        }
        if self.detectors.is_empty() {
            return Err(anyhow!("at least one detector must be configured"));
        }

        let mut seen = HashSet::new();
        for detector in &self.detectors {
            validate_detector_name(&detector.name)?;
            if !seen.insert(detector.name.as_str()) {
                return Err(anyhow!("detector '{}' declared twice", detector.name));
            }
            if detector.input_size == 0 {
                return Err(anyhow!(
                    "detector '{}': input_size must be greater than zero",
                    detector.name
                ));
            }
            if !(0.0..=1.0).contains(&detector.confidence_threshold) {
                return Err(anyhow!(
                    "detector '{}': confidence_threshold must be within [0, 1]",
                    detector.name
                ));
            }
            detector.detector_config().validate()?;
        }

        if !seen.contains(self.cascade.primary.as_str()) {
            return Err(anyhow!(
                "primary detector '{}' is not declared",
                self.cascade.primary
            ));
        }
        let mut secondaries = HashSet::new();
        for name in &self.cascade.secondaries {
            if name == &self.cascade.primary {
                return Err(anyhow!(
                    "detector '{}' cannot be both primary and secondary",
                    name
                ));
            }
            if !seen.contains(name.as_str()) {
                return Err(anyhow!("secondary detector '{}' is not declared", name));
            }
            if !secondaries.insert(name.as_str()) {
                return Err(anyhow!("secondary detector '{}' listed twice", name));
            }
        }
        Ok(())
    }

    pub fn detector(&self, name: &str) -> Option<&DetectorSettings> {
        self.detectors.iter().find(|d| d.name == name)
    }
}

fn default_detectors() -> Vec<DetectorSettings> {
    vec![
        DetectorSettings::with_defaults(
            "person",
            DEFAULT_PERSON_MODEL,
            Some(ClassMap::from([(0, "person".to_string())])),
        ),
        DetectorSettings::with_defaults("ppe", DEFAULT_PPE_MODEL, None),
    ]
}

fn detector_from_file(file: DetectorConfigFile) -> Result<DetectorSettings> {
    let class_map = match &file.class_map {
        Some(raw) => Some(parse_class_map(&file.name, raw)?),
        None => None,
    };
    let model = file
        .model
        .ok_or_else(|| anyhow!("detector '{}': model path is required", file.name))?;
    Ok(DetectorSettings {
        model_env: file
            .model_env
            .unwrap_or_else(|| default_model_env(&file.name)),
        model,
        fallback_model: file.fallback_model,
        input_size: file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        confidence_threshold: file
            .confidence_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        labels: file.labels.unwrap_or_default(),
        class_map,
        name: file.name,
    })
}

/// `MODEL_<NAME>` with dashes turned into underscores.
pub fn default_model_env(name: &str) -> String {
    format!("MODEL_{}", name.to_uppercase().replace('-', "_"))
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
